//! Wallet registry
//!
//! Named wallets with addresses live in `wallets.json`; signing keys come
//! from the environment only.

pub mod credentials;
pub mod types;

pub use credentials::CredentialManager;
pub use types::{WalletEntry, WalletRegistry, WalletType};
