//! Credential management for wallets
//!
//! The registry (wallets.json) holds names and addresses only. Private keys
//! are read from `WTRADE_PRIVATE_KEY_<NAME>` when a wallet signs.

use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::is_address;
use crate::error::{Error, Result};

use super::types::{WalletEntry, WalletRegistry, WalletType};

/// Prefix of the per-wallet private key variables
pub const KEY_ENV_PREFIX: &str = "WTRADE_PRIVATE_KEY_";

/// Manages wallet credentials and registry
pub struct CredentialManager {
    registry_path: PathBuf,

    /// Wallet entries by name
    wallets: DashMap<String, WalletEntry>,

    /// Signers loaded on demand
    loaded_signers: DashMap<String, LocalWallet>,
}

impl CredentialManager {
    /// Load the registry. A missing file yields an empty registry.
    pub fn load(registry_path: &Path) -> Result<Self> {
        let registry = if registry_path.exists() {
            let content = std::fs::read_to_string(registry_path)
                .map_err(|e| Error::Config(format!("Failed to read wallets.json: {}", e)))?;

            serde_json::from_str::<WalletRegistry>(&content)
                .map_err(|e| Error::Config(format!("Failed to parse wallets.json: {}", e)))?
        } else {
            warn!("wallets.json not found, starting with an empty registry");
            WalletRegistry::default()
        };

        let wallets: DashMap<String, WalletEntry> = registry
            .wallets
            .into_iter()
            .map(|w| (w.name.clone(), w))
            .collect();

        info!("Loaded {} wallet entries", wallets.len());

        Ok(Self {
            registry_path: registry_path.to_path_buf(),
            wallets,
            loaded_signers: DashMap::new(),
        })
    }

    /// Environment variable holding a wallet's key
    pub fn key_env_var(name: &str) -> String {
        format!(
            "{}{}",
            KEY_ENV_PREFIX,
            name.to_uppercase().replace(['-', ' ', '.'], "_")
        )
    }

    pub fn get_wallet(&self, name: &str) -> Option<WalletEntry> {
        self.wallets.get(name).map(|w| w.clone())
    }

    pub fn get_address(&self, name: &str) -> Result<String> {
        self.wallets
            .get(name)
            .map(|w| w.address.to_lowercase())
            .ok_or_else(|| Error::WalletNotFound(name.to_string()))
    }

    /// Whether the wallet's key is present in the environment
    pub fn has_key(&self, name: &str) -> bool {
        std::env::var(Self::key_env_var(name))
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    /// Load and cache the signer for a hot wallet
    pub fn signer(&self, name: &str, chain_id: u64) -> Result<LocalWallet> {
        if let Some(signer) = self.loaded_signers.get(name) {
            return Ok(signer.clone());
        }

        let wallet = self
            .get_wallet(name)
            .ok_or_else(|| Error::WalletNotFound(name.to_string()))?;

        if !wallet.wallet_type.can_trade() {
            return Err(Error::Config(format!("Wallet {} is watch-only", name)));
        }

        let var = Self::key_env_var(name);
        let key = std::env::var(&var).map_err(|_| Error::WalletKeyMissing(name.to_string()))?;

        let signer: LocalWallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| Error::Config(format!("Invalid private key in {}: {}", var, e)))?
            .with_chain_id(chain_id);

        let registered: Address = wallet
            .address
            .parse()
            .map_err(|_| Error::InvalidAddress(wallet.address.clone()))?;
        if signer.address() != registered {
            return Err(Error::Config(format!(
                "Key in {} does not match registered address of {}",
                var, name
            )));
        }

        debug!("Loaded signer for {}", name);
        self.loaded_signers.insert(name.to_string(), signer.clone());
        Ok(signer)
    }

    /// List all wallet entries, sorted by name
    pub fn list_wallets(&self) -> Vec<WalletEntry> {
        let mut all: Vec<WalletEntry> = self.wallets.iter().map(|w| w.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Add a new wallet to the registry
    pub fn add_wallet(&self, entry: WalletEntry) -> Result<()> {
        if !is_address(&entry.address) {
            return Err(Error::InvalidAddress(entry.address));
        }
        if self.wallets.contains_key(&entry.name) {
            return Err(Error::Config(format!(
                "Wallet already exists: {}",
                entry.name
            )));
        }

        self.wallets.insert(entry.name.clone(), entry);
        self.save_registry()?;

        Ok(())
    }

    /// Remove a wallet from the registry
    pub fn remove_wallet(&self, name: &str) -> Result<()> {
        if self.wallets.remove(name).is_none() {
            return Err(Error::WalletNotFound(name.to_string()));
        }

        self.loaded_signers.remove(name);
        self.save_registry()?;

        Ok(())
    }

    /// Save registry to wallets.json
    fn save_registry(&self) -> Result<()> {
        let registry = WalletRegistry {
            version: "1.0".to_string(),
            wallets: self.list_wallets(),
        };

        let json = serde_json::to_string_pretty(&registry)
            .map_err(|e| Error::Config(format!("Failed to serialize registry: {}", e)))?;

        if let Some(parent) = self.registry_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.registry_path, json)
            .map_err(|e| Error::Config(format!("Failed to write wallets.json: {}", e)))?;

        info!("Saved wallet registry");
        Ok(())
    }

    /// Hot wallets whose key is absent from the environment
    pub fn missing_keys(&self) -> Vec<String> {
        self.list_wallets()
            .into_iter()
            .filter(|w| w.wallet_type == WalletType::Hot && !self.has_key(&w.name))
            .map(|w| w.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    // Well-known test key (hardhat account #0); never holds funds
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn entry(name: &str, address: &str, wallet_type: WalletType) -> WalletEntry {
        WalletEntry {
            name: name.into(),
            alias: String::new(),
            wallet_type,
            address: address.into(),
            created_at: Utc::now(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_load_empty_registry() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::load(&dir.path().join("wallets.json")).unwrap();
        assert!(manager.list_wallets().is_empty());
    }

    #[test]
    fn test_add_remove_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let manager = CredentialManager::load(&path).unwrap();

        manager
            .add_wallet(entry("main", TEST_ADDRESS, WalletType::Hot))
            .unwrap();
        assert!(manager
            .add_wallet(entry("main", TEST_ADDRESS, WalletType::Hot))
            .is_err());
        assert!(manager
            .add_wallet(entry("bad", "0x123", WalletType::Hot))
            .is_err());

        let reloaded = CredentialManager::load(&path).unwrap();
        assert_eq!(reloaded.get_address("main").unwrap(), TEST_ADDRESS);

        reloaded.remove_wallet("main").unwrap();
        assert!(matches!(
            reloaded.remove_wallet("main"),
            Err(Error::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_key_env_var_name() {
        assert_eq!(
            CredentialManager::key_env_var("hot-trading"),
            "WTRADE_PRIVATE_KEY_HOT_TRADING"
        );
    }

    #[test]
    fn test_signer_from_env() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::load(&dir.path().join("wallets.json")).unwrap();
        manager
            .add_wallet(entry("signer-test", TEST_ADDRESS, WalletType::Hot))
            .unwrap();
        manager
            .add_wallet(entry("watch", TEST_ADDRESS, WalletType::WatchOnly))
            .unwrap();

        assert!(matches!(
            manager.signer("signer-test", 480),
            Err(Error::WalletKeyMissing(_))
        ));
        assert!(manager.missing_keys().contains(&"signer-test".to_string()));

        std::env::set_var(CredentialManager::key_env_var("signer-test"), TEST_KEY);
        let signer = manager.signer("signer-test", 480).unwrap();
        assert_eq!(signer.chain_id(), 480);
        assert_eq!(
            format!("{:?}", signer.address()),
            TEST_ADDRESS
        );

        assert!(manager.signer("watch", 480).is_err());
    }
}
