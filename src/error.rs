//! Error types for the trading bot

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Quote errors
    #[error("No liquidity for {token_in} -> {token_out}")]
    NoLiquidity { token_in: String, token_out: String },

    #[error("No route: {0}")]
    NoRoute(String),

    #[error("Quote timed out after {0}ms")]
    QuoteTimeout(u64),

    #[error("Price data is stale: last sample {age_secs}s old")]
    StaleData { age_secs: i64 },

    // Pre-flight errors
    #[error("Insufficient balance of {token}: {available} available, {required} required")]
    InsufficientBalance {
        token: String,
        available: f64,
        required: f64,
    },

    #[error("Slippage {requested}% exceeds maximum {max}%")]
    SlippageTooHigh { requested: f64, max: f64 },

    // Execution errors
    #[error("Transaction reverted: {0}")]
    ExecutionReverted(String),

    #[error("Transaction not confirmed after {0}s")]
    ExecutionTimeout(u64),

    #[error("Chain RPC error: {0}")]
    Chain(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Ledger / strategy errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Trade {0} already recorded")]
    DuplicateTrade(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("Strategy already active: {0}")]
    StrategyActive(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Trigger {0} is inactive or at its fire limit")]
    TriggerSpent(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // Wallet errors
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet {0} has no signing key in the environment")]
    WalletKeyMissing(String),

    // Persistence errors
    #[error("Persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Quote-side failure: skip this tick and keep state
    pub fn is_skip_tick(&self) -> bool {
        matches!(
            self,
            Error::NoLiquidity { .. }
                | Error::NoRoute(_)
                | Error::QuoteTimeout(_)
                | Error::StaleData { .. }
                | Error::Http(_)
        )
    }

    /// Check if the trade was rejected before anything was submitted
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::SlippageTooHigh { .. }
                | Error::InvalidAmount(_)
                | Error::WalletKeyMissing(_)
        )
    }

    /// Trade was submitted (or attempted) and failed on chain
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Error::ExecutionReverted(_) | Error::ExecutionTimeout(_) | Error::Chain(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}
