//! Process-wide application context
//!
//! Built once at startup and shared by every command: configuration, the
//! chain client, the executor, the persisted stores and the runner.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::execution::{ChainClient, ChainExecutor, QuoteSource, SwapExecutor};
use crate::notify::{self, Notifier};
use crate::position::PositionLedger;
use crate::price::{PriceDatabase, PriceSampler};
use crate::strategy::{StrategyRunner, StrategyStore};
use crate::wallet::CredentialManager;

pub struct AppContext {
    pub config: Config,
    pub chain: Arc<ChainClient>,
    pub executor: Arc<dyn SwapExecutor>,
    pub quotes: Arc<dyn QuoteSource>,
    pub credentials: Arc<CredentialManager>,
    pub ledger: Arc<PositionLedger>,
    pub store: Arc<StrategyStore>,
    pub prices: Arc<PriceDatabase>,
    pub notifier: Arc<dyn Notifier>,
    pub runner: Arc<StrategyRunner>,
}

impl AppContext {
    /// Connect to the chain and load every persisted store
    pub async fn build(config: Config) -> Result<Self> {
        let storage = &config.storage;

        let credentials = Arc::new(CredentialManager::load(&storage.wallets_path())?);
        let missing = credentials.missing_keys();
        if !missing.is_empty() {
            warn!("No signing key in the environment for: {}", missing.join(", "));
        }

        let chain = Arc::new(ChainClient::connect(&config.chain).await?);
        let executor = Arc::new(ChainExecutor::new(chain.clone(), &config, credentials.clone())?);

        let ledger = Arc::new(PositionLedger::new(Some(storage.positions_path())));
        ledger.load().await?;

        let store = Arc::new(StrategyStore::new(
            Some(storage.strategies_path()),
            config.security.max_slippage_pct,
        ));
        store.load().await?;

        let sampler = Arc::new(PriceSampler::new(
            executor.clone(),
            &config.tokens.base_token,
            &config.sampler,
        ));
        let prices = Arc::new(
            PriceDatabase::new(sampler, config.sampler.clone())
                .with_paths(storage.price_db_path(), storage.triggers_path())
                .with_ledger(ledger.clone()),
        );
        prices.load().await?;

        let notifier: Arc<dyn Notifier> =
            Arc::from(notify::from_config(&config.notifications, &config.tokens.base_symbol));

        let runner = Arc::new(StrategyRunner::new(
            store.clone(),
            ledger.clone(),
            prices.clone(),
            executor.clone(),
            notifier.clone(),
            &config.tokens.base_token,
            config.notifications.clone(),
        ));

        info!("Context ready (data dir {})", storage.data_dir.display());

        Ok(Self {
            config,
            chain,
            executor: executor.clone(),
            quotes: executor,
            credentials,
            ledger,
            store,
            prices,
            notifier,
            runner,
        })
    }

    /// Resolve a symbol or address to `(address, symbol)`
    pub fn resolve_token(&self, symbol_or_address: &str) -> Result<(String, String)> {
        let address = self
            .config
            .tokens
            .resolve(symbol_or_address)
            .ok_or_else(|| Error::InvalidAddress(symbol_or_address.to_string()))?;
        let symbol = self.config.tokens.symbol_for(&address);
        Ok((address, symbol))
    }

    pub fn base_token(&self) -> &str {
        &self.config.tokens.base_token
    }

    pub fn base_symbol(&self) -> &str {
        &self.config.tokens.base_symbol
    }

    /// `wallet` or the configured default
    pub fn wallet_name(&self, wallet: Option<&str>) -> String {
        wallet
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.config.wallet.default_wallet)
            .to_string()
    }

    pub async fn save_all(&self) -> Result<()> {
        self.ledger.save().await?;
        self.store.save().await?;
        self.prices.save().await?;
        Ok(())
    }
}
