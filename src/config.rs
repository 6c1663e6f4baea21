//! Configuration loading and validation

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable holding the aggregator partner code
pub const PARTNER_CODE_ENV: &str = "WTRADE_PARTNER_CODE";
/// Environment variable holding the Telegram bot token
pub const TELEGRAM_TOKEN_ENV: &str = "WTRADE_TELEGRAM_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub uniswap: UniswapConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub strategy_defaults: StrategyDefaults,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub rpc_endpoint: String,
    /// Used when the primary endpoint fails its connectivity check
    #[serde(default = "default_fallback_rpc")]
    pub fallback_rpc_endpoint: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: default_rpc_endpoint(),
            fallback_rpc_endpoint: default_fallback_rpc(),
            chain_id: default_chain_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    /// Base currency every price is quoted in
    #[serde(default = "default_base_token")]
    pub base_token: String,
    #[serde(default = "default_base_symbol")]
    pub base_symbol: String,
    /// Symbol -> address
    #[serde(default = "default_symbols")]
    pub symbols: HashMap<String, String>,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            base_token: default_base_token(),
            base_symbol: default_base_symbol(),
            symbols: default_symbols(),
        }
    }
}

impl TokensConfig {
    /// Resolve a symbol (case-insensitive) or raw address to a lowercase address
    pub fn resolve(&self, symbol_or_address: &str) -> Option<String> {
        if is_address(symbol_or_address) {
            return Some(symbol_or_address.to_lowercase());
        }

        if symbol_or_address.eq_ignore_ascii_case(&self.base_symbol) {
            return Some(self.base_token.to_lowercase());
        }

        self.symbols
            .iter()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(symbol_or_address))
            .map(|(_, address)| address.to_lowercase())
    }

    /// Reverse lookup for display
    pub fn symbol_for(&self, address: &str) -> String {
        if address.eq_ignore_ascii_case(&self.base_token) {
            return self.base_symbol.clone();
        }
        self.symbols
            .iter()
            .find(|(_, a)| a.eq_ignore_ascii_case(address))
            .map(|(s, _)| s.clone())
            .unwrap_or_else(|| short_address(address))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HTTP endpoint answering HoldStation-shaped quote requests
    #[serde(default)]
    pub quote_url: String,
    /// Router every aggregator quote is forced through
    #[serde(default = "default_holdstation_router")]
    pub router: String,
    #[serde(default = "default_fee_pct")]
    pub fee_pct: f64,
    #[serde(default = "default_quote_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quote_url: String::new(),
            router: default_holdstation_router(),
            fee_pct: default_fee_pct(),
            timeout_ms: default_quote_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniswapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_uniswap_quoter")]
    pub quoter: String,
    #[serde(default = "default_uniswap_router")]
    pub router: String,
    #[serde(default = "default_fee_tiers")]
    pub fee_tiers: Vec<u32>,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for UniswapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quoter: default_uniswap_quoter(),
            router: default_uniswap_router(),
            fee_tiers: default_fee_tiers(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_slippage_pct")]
    pub default_slippage_pct: f64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_approve_gas_limit")]
    pub approve_gas_limit: u64,
    #[serde(default = "default_base_gas_gwei")]
    pub base_gas_gwei: String,
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: String,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// Cap trade size to what the pool absorbs within slippage
    #[serde(default = "default_true")]
    pub liquidity_cap: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_slippage_pct: default_slippage_pct(),
            gas_limit: default_gas_limit(),
            approve_gas_limit: default_approve_gas_limit(),
            base_gas_gwei: default_base_gas_gwei(),
            priority_fee_gwei: default_priority_fee_gwei(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            liquidity_cap: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Background price database refresh
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Cached sample older than this is not served on failure
    #[serde(default = "default_staleness_secs")]
    pub staleness_ceiling_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_min_sma_samples")]
    pub min_sma_samples: usize,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    /// SMA cache refresh period
    #[serde(default = "default_sma_interval_secs")]
    pub sma_interval_secs: u64,
    /// Token amount quoted to derive a spot price
    #[serde(default = "default_quote_notional")]
    pub quote_notional: f64,
    #[serde(default = "default_sampler_timeout_ms")]
    pub quote_timeout_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            retention_secs: default_retention_secs(),
            staleness_ceiling_secs: default_staleness_secs(),
            max_consecutive_failures: default_max_failures(),
            min_sma_samples: default_min_sma_samples(),
            save_interval_secs: default_save_interval_secs(),
            sma_interval_secs: default_sma_interval_secs(),
            quote_notional: default_quote_notional(),
            quote_timeout_ms: default_sampler_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyDefaults {
    #[serde(default = "default_dip_threshold")]
    pub dip_threshold_pct: f64,
    #[serde(default = "default_profit_target")]
    pub profit_target_pct: f64,
    #[serde(default = "default_trade_amount")]
    pub trade_amount: f64,
    #[serde(default = "default_strategy_slippage")]
    pub max_slippage_pct: f64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_dip_timeframe_ms")]
    pub dip_timeframe_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            dip_threshold_pct: default_dip_threshold(),
            profit_target_pct: default_profit_target(),
            trade_amount: default_trade_amount(),
            max_slippage_pct: default_strategy_slippage(),
            check_interval_ms: default_check_interval_ms(),
            dip_timeframe_ms: default_dip_timeframe_ms(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn strategies_path(&self) -> PathBuf {
        self.data_dir.join("strategies.json")
    }

    pub fn positions_path(&self) -> PathBuf {
        self.data_dir.join("positions.json")
    }

    pub fn price_db_path(&self) -> PathBuf {
        self.data_dir.join("price-database.json")
    }

    pub fn triggers_path(&self) -> PathBuf {
        self.data_dir.join("price-triggers.json")
    }

    pub fn wallets_path(&self) -> PathBuf {
        self.data_dir.join("wallets.json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub chat_id: String,
    /// Profit % on an open holding that raises an alert
    #[serde(default = "default_profit_alert")]
    pub profit_alert_pct: f64,
    /// Loss % on an open holding that raises an alert
    #[serde(default = "default_loss_alert")]
    pub loss_alert_pct: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chat_id: String::new(),
            profit_alert_pct: default_profit_alert(),
            loss_alert_pct: default_loss_alert(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_slippage")]
    pub max_slippage_pct: f64,
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
    /// Trades above this base amount always prompt
    #[serde(default = "default_confirm_above")]
    pub confirm_above: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_slippage_pct: default_max_slippage(),
            require_confirmation: true,
            confirm_above: default_confirm_above(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Wallet name used when a command does not pick one
    #[serde(default = "default_wallet_name")]
    pub default_wallet: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_wallet: default_wallet_name(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("WORLDCHAIN_RPC").unwrap_or_else(|_| "https://worldchain-mainnet.g.alchemy.com/public".into())
}

fn default_fallback_rpc() -> String {
    "https://worldchain-mainnet.drpc.org/public".into()
}

fn default_chain_id() -> u64 {
    480
}

fn default_base_token() -> String {
    "0x2cfc85d8e48f8eab294be644d9e25c3030863003".into()
}

fn default_base_symbol() -> String {
    "WLD".into()
}

fn default_symbols() -> HashMap<String, String> {
    HashMap::from([
        ("ORO".to_string(), "0xcd1e32b86953d79a6ac58e813d2ea7a1790cab63".to_string()),
        ("YIELD".to_string(), "0x1a16f733b813a59815a76293dac835ad1c7fedff".to_string()),
        ("RAMEN".to_string(), "0xc6f44893a558d9ae0576a2bb6bfa9c1c3f313815".to_string()),
    ])
}

fn default_holdstation_router() -> String {
    "0x0281c83c8f53314dff3ebe24a90ee2412a2aa970".into()
}

fn default_fee_pct() -> f64 {
    0.2
}

fn default_quote_timeout_ms() -> u64 {
    10_000
}

fn default_uniswap_quoter() -> String {
    "0x61ffe014ba17989e743c5f6cb21bf9697530b21e".into()
}

fn default_uniswap_router() -> String {
    "0xe592427a0aece92de3edee1f18e0157c05861564".into()
}

fn default_fee_tiers() -> Vec<u32> {
    vec![500, 3000, 10000]
}

fn default_deadline_secs() -> u64 {
    1800
}

fn default_slippage_pct() -> f64 {
    0.5
}

fn default_gas_limit() -> u64 {
    280_000
}

fn default_approve_gas_limit() -> u64 {
    60_000
}

fn default_base_gas_gwei() -> String {
    "0.001".into()
}

fn default_priority_fee_gwei() -> String {
    "0.0001".into()
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_update_interval_ms() -> u64 {
    30_000
}

fn default_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_staleness_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_failures() -> u32 {
    10
}

fn default_min_sma_samples() -> usize {
    3
}

fn default_save_interval_secs() -> u64 {
    300
}

fn default_sma_interval_secs() -> u64 {
    300
}

fn default_quote_notional() -> f64 {
    1.0
}

fn default_sampler_timeout_ms() -> u64 {
    15_000
}

fn default_dip_threshold() -> f64 {
    15.0
}

fn default_profit_target() -> f64 {
    1.0
}

fn default_trade_amount() -> f64 {
    0.1
}

fn default_strategy_slippage() -> f64 {
    1.0
}

fn default_check_interval_ms() -> u64 {
    60_000
}

fn default_dip_timeframe_ms() -> u64 {
    300_000
}

fn default_max_entries() -> u32 {
    3
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_profit_alert() -> f64 {
    5.0
}

fn default_loss_alert() -> f64 {
    5.0
}

fn default_max_slippage() -> f64 {
    10.0
}

fn default_confirm_above() -> f64 {
    1.0
}

fn default_wallet_name() -> String {
    "main".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("chain.rpc_endpoint", default_rpc_endpoint())?
            .set_default("chain.chain_id", default_chain_id() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WTRADE_)
            .add_source(
                config::Environment::with_prefix("WTRADE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !is_address(&self.tokens.base_token) {
            anyhow::bail!("Invalid base_token address: {}", self.tokens.base_token);
        }

        for (symbol, address) in &self.tokens.symbols {
            if !is_address(address) {
                anyhow::bail!("Invalid address for token {}: {}", symbol, address);
            }
        }

        if self.aggregator.enabled {
            if self.aggregator.quote_url.is_empty() {
                anyhow::bail!("aggregator.quote_url is required when the aggregator is enabled");
            }
            if !is_address(&self.aggregator.router) {
                anyhow::bail!("Invalid aggregator router: {}", self.aggregator.router);
            }
        }

        if self.uniswap.enabled {
            if !is_address(&self.uniswap.quoter) || !is_address(&self.uniswap.router) {
                anyhow::bail!("Invalid Uniswap quoter/router address");
            }
            if self.uniswap.fee_tiers.is_empty() {
                anyhow::bail!("uniswap.fee_tiers cannot be empty");
            }
        }

        if !self.aggregator.enabled && !self.uniswap.enabled {
            anyhow::bail!("At least one quote source (aggregator or uniswap) must be enabled");
        }

        // Validate slippage
        let max = self.security.max_slippage_pct;
        if max <= 0.0 || max > 100.0 {
            anyhow::bail!("security.max_slippage_pct must be in (0, 100]");
        }
        for (name, value) in [
            ("trading.default_slippage_pct", self.trading.default_slippage_pct),
            ("strategy_defaults.max_slippage_pct", self.strategy_defaults.max_slippage_pct),
        ] {
            if value <= 0.0 || value > max {
                anyhow::bail!("{} must be in (0, {}]", name, max);
            }
        }

        if self.strategy_defaults.trade_amount <= 0.0 {
            anyhow::bail!("strategy_defaults.trade_amount must be positive");
        }

        if self.sampler.update_interval_ms == 0 || self.strategy_defaults.check_interval_ms == 0 {
            anyhow::bail!("Polling intervals must be non-zero");
        }

        if self.sampler.quote_notional <= 0.0 {
            anyhow::bail!("sampler.quote_notional must be positive");
        }

        if self.notifications.enabled && self.notifications.chat_id.is_empty() {
            tracing::warn!("Notifications enabled without chat_id - they will be skipped");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Chain:
    rpc: {}
    fallback_rpc: {}
    chain_id: {}
  Tokens:
    base: {} ({})
    known symbols: {}
  Aggregator:
    enabled: {}
    quote_url: {}
    router: {}
    fee: {}%
    partner_code: {}
  Uniswap:
    enabled: {}
    fee_tiers: {:?}
  Trading:
    default_slippage: {}%
    gas_limit: {}
    liquidity_cap: {}
  Sampler:
    interval: {}ms
    retention: {}s
    staleness_ceiling: {}s
    max_failures: {}
  Strategy defaults:
    dip: {}%  profit: {}%  amount: {}  interval: {}ms
  Storage:
    data_dir: {}
  Notifications:
    enabled: {}
    bot_token: {}
"#,
            mask_url(&self.chain.rpc_endpoint),
            mask_url(&self.chain.fallback_rpc_endpoint),
            self.chain.chain_id,
            self.tokens.base_symbol,
            self.tokens.base_token,
            self.tokens.symbols.len(),
            self.aggregator.enabled,
            mask_url(&self.aggregator.quote_url),
            self.aggregator.router,
            self.aggregator.fee_pct,
            secret_state(PARTNER_CODE_ENV),
            self.uniswap.enabled,
            self.uniswap.fee_tiers,
            self.trading.default_slippage_pct,
            self.trading.gas_limit,
            self.trading.liquidity_cap,
            self.sampler.update_interval_ms,
            self.sampler.retention_secs,
            self.sampler.staleness_ceiling_secs,
            self.sampler.max_consecutive_failures,
            self.strategy_defaults.dip_threshold_pct,
            self.strategy_defaults.profit_target_pct,
            self.strategy_defaults.trade_amount,
            self.strategy_defaults.check_interval_ms,
            self.storage.data_dir.display(),
            self.notifications.enabled,
            secret_state(TELEGRAM_TOKEN_ENV),
        )
    }
}

/// Check for a 20-byte hex address
pub fn is_address(value: &str) -> bool {
    Regex::new(r"^0x[0-9a-fA-F]{40}$")
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Shorten an address for logs and tables
pub fn short_address(address: &str) -> String {
    if address.len() > 12 {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

fn secret_state(var: &str) -> &'static str {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => "***",
        _ => "(not set)",
    }
}

/// Mask URL for display (hide API keys in path or query)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        return format!("{}?***", &url[..idx]);
    }
    // Alchemy-style keys live in the last path segment after /v2/
    if let Some(idx) = url.find("/v2/") {
        return format!("{}/v2/***", &url[..idx]);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chain.chain_id, 480);
        assert_eq!(config.trading.gas_limit, 280_000);
        assert_eq!(config.sampler.min_sma_samples, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_symbols() {
        let tokens = TokensConfig::default();
        assert_eq!(
            tokens.resolve("oro").as_deref(),
            Some("0xcd1e32b86953d79a6ac58e813d2ea7a1790cab63")
        );
        assert_eq!(tokens.resolve("wld").as_deref(), Some(default_base_token().as_str()));
        assert_eq!(
            tokens.resolve("0xABCDEFabcdef0123456789012345678901234567").as_deref(),
            Some("0xabcdefabcdef0123456789012345678901234567")
        );
        assert!(tokens.resolve("NOPE").is_none());
        assert_eq!(tokens.symbol_for("0xcd1E32B86953D79a6AC58e813D2EA7a1790cAb63"), "ORO");
    }

    #[test]
    fn test_validate_rejects_bad_slippage() {
        let mut config = Config::default();
        config.trading.default_slippage_pct = 25.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_quote_source() {
        let mut config = Config::default();
        config.uniswap.enabled = false;
        assert!(config.validate().is_err());

        config.aggregator.enabled = true;
        assert!(config.validate().is_err()); // no quote_url

        config.aggregator.quote_url = "http://127.0.0.1:8787/quote".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://worldchain-mainnet.g.alchemy.com/v2/abc123"),
            "https://worldchain-mainnet.g.alchemy.com/v2/***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wtrade.toml");
        std::fs::write(
            &path,
            r#"
[strategy_defaults]
dip_threshold_pct = 12.5
trade_amount = 2.0

[storage]
data_dir = "state"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.strategy_defaults.dip_threshold_pct, 12.5);
        assert_eq!(config.strategy_defaults.trade_amount, 2.0);
        assert_eq!(config.storage.data_dir, PathBuf::from("state"));
        assert_eq!(config.storage.positions_path(), PathBuf::from("state/positions.json"));
    }
}
