//! Quote and swap request/response shapes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Quote request, in human units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub slippage_pct: f64,
    /// Recipient of the swap output; required for executable calldata
    pub receiver: Option<String>,
}

impl QuoteRequest {
    pub fn new(token_in: impl Into<String>, token_out: impl Into<String>, amount_in: f64) -> Self {
        Self {
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount_in,
            slippage_pct: 0.5,
            receiver: None,
        }
    }

    pub fn with_slippage(mut self, slippage_pct: f64) -> Self {
        self.slippage_pct = slippage_pct;
        self
    }

    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_amount(&self, amount_in: f64) -> Self {
        Self {
            amount_in,
            ..self.clone()
        }
    }
}

/// Where a quote was sourced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    Aggregator,
    UniswapV3 { fee: u32 },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Aggregator => write!(f, "aggregator"),
            Route::UniswapV3 { fee } => write!(f, "uniswap-v3/{}", fee),
        }
    }
}

/// Executable quote: expected output plus the router call that realises it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub expected_output: f64,
    /// Output floor after slippage
    pub min_output: f64,
    /// Router address
    pub to: String,
    /// Hex calldata; empty when no receiver was given
    pub data: String,
    /// Native value in wei, decimal string
    pub value: String,
    pub gas_estimate: Option<u64>,
    pub route: Route,
}

impl SwapQuote {
    /// Output per unit of input
    pub fn rate(&self) -> f64 {
        if self.amount_in <= 0.0 {
            return 0.0;
        }
        self.expected_output / self.amount_in
    }

    pub fn is_executable(&self) -> bool {
        !self.data.is_empty() && !self.to.is_empty()
    }
}

/// Trade direction relative to the base currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A swap to sign and submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapOrder {
    /// Registry name of the signing wallet
    pub wallet: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub slippage_pct: f64,
}

impl SwapOrder {
    pub fn quote_request(&self, receiver: &str) -> QuoteRequest {
        QuoteRequest::new(&self.token_in, &self.token_out, self.amount_in)
            .with_slippage(self.slippage_pct)
            .with_receiver(receiver)
    }
}

/// Result of a confirmed, successful swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// Input actually spent
    pub amount_in: f64,
    /// Output actually received
    pub amount_out: f64,
    pub route: Route,
}

impl TradeOutcome {
    pub fn execution_price(&self, side: TradeSide) -> f64 {
        match side {
            TradeSide::Buy if self.amount_out > 0.0 => self.amount_in / self.amount_out,
            TradeSide::Sell if self.amount_in > 0.0 => self.amount_out / self.amount_in,
            _ => 0.0,
        }
    }
}

/// Anything that can price a swap
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote>;
}

/// Signs and submits swaps.
///
/// Failures before submission are pre-flight errors and never touch chain
/// state; a non-success receipt is `ExecutionReverted`.
#[async_trait]
pub trait SwapExecutor: QuoteSource {
    /// Token balance of `owner` in human units
    async fn balance_of(&self, owner: &str, token: &str) -> Result<f64>;

    /// Address of a registered wallet
    fn wallet_address(&self, wallet: &str) -> Result<String>;

    async fn execute(&self, order: &SwapOrder) -> Result<TradeOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_price() {
        let outcome = TradeOutcome {
            tx_hash: "0x1".into(),
            block_number: None,
            gas_used: None,
            amount_in: 1.0,
            amount_out: 10.0,
            route: Route::Aggregator,
        };
        assert!((outcome.execution_price(TradeSide::Buy) - 0.1).abs() < 1e-12);
        assert!((outcome.execution_price(TradeSide::Sell) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::UniswapV3 { fee: 3000 }.to_string(), "uniswap-v3/3000");
        let json = serde_json::to_string(&Route::UniswapV3 { fee: 500 }).unwrap();
        assert_eq!(json, r#"{"kind":"uniswap_v3","fee":500}"#);
    }
}
