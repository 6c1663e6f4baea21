//! Wallet registry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet entry from the wallets.json registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    /// Unique identifier (lowercase, no spaces): "main"
    pub name: String,

    /// Human-readable name: "Trading Wallet"
    #[serde(default)]
    pub alias: String,

    #[serde(rename = "type")]
    pub wallet_type: WalletType,

    /// Checksummed or lowercase 0x address
    pub address: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub notes: String,
}

/// Type of wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    /// Signs trades; its key comes from the environment
    Hot,

    /// Balances only, never signs
    WatchOnly,
}

impl WalletType {
    /// Check if this wallet can be used for trading
    pub fn can_trade(&self) -> bool {
        matches!(self, WalletType::Hot)
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletType::Hot => write!(f, "hot"),
            WalletType::WatchOnly => write!(f, "watch-only"),
        }
    }
}

/// On-disk registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRegistry {
    pub version: String,
    pub wallets: Vec<WalletEntry>,
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            wallets: Vec::new(),
        }
    }
}
