//! Quoting and swap execution
//!
//! Quotes come from the HoldStation-style aggregator when enabled, with
//! Uniswap V3 as the fallback. `ChainExecutor` signs and submits swaps on
//! Worldchain.

pub mod aggregator;
pub mod chain;
pub mod liquidity;
pub mod types;
pub mod uniswap;

pub use aggregator::AggregatorClient;
pub use chain::{ChainClient, ChainExecutor};
pub use liquidity::LiquiditySizer;
pub use types::{
    QuoteRequest, QuoteSource, Route, SwapExecutor, SwapOrder, SwapQuote, TradeOutcome, TradeSide,
};
pub use uniswap::UniswapV3;
