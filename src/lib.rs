//! Worldchain Trader Library
//!
//! Dip-buy and profit-target strategies for ERC-20 tokens on World Chain,
//! priced through a swap aggregator with a Uniswap V3 fallback.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod notify;
pub mod position;
pub mod price;
pub mod storage;
pub mod strategy;
pub mod trigger;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
