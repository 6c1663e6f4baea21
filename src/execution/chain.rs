//! On-chain access and swap submission
//!
//! `ChainClient` wraps the JSON-RPC provider with token helpers (decimals
//! cache, unit conversion, balances, allowances, gas fees). `ChainExecutor`
//! quotes through the aggregator with a Uniswap V3 fallback and signs,
//! submits and confirms swaps.

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::*;
use ethers::utils::{format_units, parse_units};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, Config, TradingConfig};
use crate::error::{Error, Result};
use crate::execution::aggregator::AggregatorClient;
use crate::execution::liquidity::LiquiditySizer;
use crate::execution::types::{QuoteRequest, SwapOrder, SwapQuote, TradeOutcome};
use crate::execution::uniswap::UniswapV3;
use crate::execution::{QuoteSource, SwapExecutor};
use crate::wallet::CredentialManager;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

/// Balances below this are treated as equal to the requirement
const BALANCE_TOLERANCE: f64 = 1e-12;

const RPC_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn parse_address(value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| Error::InvalidAddress(value.to_string()))
}

/// Human amount to raw token units
pub fn units_from_f64(amount: f64, decimals: u8) -> Result<U256> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::InvalidAmount(amount.to_string()));
    }
    let text = format!("{:.*}", decimals as usize, amount);
    parse_units(text, decimals as u32)
        .map(Into::into)
        .map_err(|e| Error::InvalidAmount(format!("{}: {}", amount, e)))
}

/// Raw token units to a human amount
pub fn f64_from_units(units: U256, decimals: u8) -> Result<f64> {
    let text = format_units(units, decimals as u32)
        .map_err(|e| Error::Internal(format!("format_units: {}", e)))?;
    text.parse::<f64>()
        .map_err(|e| Error::Internal(format!("Invalid unit string {}: {}", text, e)))
}

/// Human amount that spends at most `balance` raw units. A request at or
/// above the balance is walked down from the balance until both its unit
/// conversion and its decimal text stay within it.
pub fn spendable_amount(requested: f64, balance: U256, decimals: u8) -> Result<f64> {
    if units_from_f64(requested, decimals)? <= balance {
        return Ok(requested);
    }

    let within = |amount: f64| -> bool {
        let as_text = parse_units(amount.to_string(), decimals as u32)
            .map(U256::from)
            .map_or(false, |units| units <= balance);
        as_text && units_from_f64(amount, decimals).map_or(false, |units| units <= balance)
    };

    let mut amount = f64_from_units(balance, decimals)?.min(requested);
    for _ in 0..64 {
        if amount <= 0.0 {
            break;
        }
        if within(amount) {
            return Ok(amount);
        }
        amount = f64::from_bits(amount.to_bits() - 1);
    }
    Err(Error::InvalidAmount(format!(
        "{} does not fit a balance of {} units",
        requested, balance
    )))
}

/// `max(network, floor) + priority`
pub fn max_fee_per_gas(network: U256, floor: U256, priority: U256) -> U256 {
    network.max(floor) + priority
}

/// Native value from a quote: decimal or 0x-hex
pub fn parse_value(value: &str) -> Result<U256> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(U256::zero());
    }
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(value).ok(),
    };
    parsed.ok_or_else(|| Error::InvalidAmount(format!("transaction value {}", value)))
}

fn chain_err(e: impl std::fmt::Display) -> Error {
    Error::Chain(e.to_string())
}

pub struct ChainClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
    endpoint: String,
    decimals: DashMap<Address, u8>,
}

impl ChainClient {
    /// Provider for `endpoint` without contacting it
    pub fn from_endpoint(endpoint: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| Error::Config(format!("Invalid RPC endpoint: {}", e)))?;
        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
            endpoint: endpoint.to_string(),
            decimals: DashMap::new(),
        })
    }

    /// Connect to the primary endpoint, falling back to the secondary one
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let mut endpoints = vec![config.rpc_endpoint.as_str()];
        if !config.fallback_rpc_endpoint.is_empty() {
            endpoints.push(config.fallback_rpc_endpoint.as_str());
        }

        let mut last_err = None;
        for endpoint in endpoints {
            let client = Self::from_endpoint(endpoint, config.chain_id)?;
            match tokio::time::timeout(RPC_CHECK_TIMEOUT, client.provider.get_chainid()).await {
                Ok(Ok(id)) => {
                    if id.as_u64() != config.chain_id {
                        warn!(
                            "RPC reports chain id {}, expected {}",
                            id, config.chain_id
                        );
                    }
                    info!("Connected to chain {}", id);
                    return Ok(client);
                }
                Ok(Err(e)) => {
                    warn!("RPC endpoint unavailable: {}", e);
                    last_err = Some(chain_err(e));
                }
                Err(_) => {
                    warn!("RPC endpoint timed out");
                    last_err = Some(Error::Chain("RPC check timed out".into()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Config("No RPC endpoint configured".into())))
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Latest block and round-trip latency
    pub async fn health(&self) -> Result<(u64, Duration)> {
        let started = Instant::now();
        let block = self.provider.get_block_number().await.map_err(chain_err)?;
        Ok((block.as_u64(), started.elapsed()))
    }

    pub async fn decimals(&self, token: Address) -> Result<u8> {
        if let Some(d) = self.decimals.get(&token) {
            return Ok(*d);
        }
        let decimals = Erc20::new(token, self.provider())
            .decimals()
            .call()
            .await
            .map_err(chain_err)?;
        self.decimals.insert(token, decimals);
        Ok(decimals)
    }

    pub async fn symbol(&self, token: Address) -> Result<String> {
        Erc20::new(token, self.provider())
            .symbol()
            .call()
            .await
            .map_err(chain_err)
    }

    pub async fn to_units(&self, token: Address, amount: f64) -> Result<U256> {
        units_from_f64(amount, self.decimals(token).await?)
    }

    pub async fn from_units(&self, token: Address, units: U256) -> Result<f64> {
        f64_from_units(units, self.decimals(token).await?)
    }

    pub async fn balance_units(&self, owner: Address, token: Address) -> Result<U256> {
        Erc20::new(token, self.provider())
            .balance_of(owner)
            .call()
            .await
            .map_err(chain_err)
    }

    pub async fn balance_of(&self, owner: Address, token: Address) -> Result<f64> {
        let units = self.balance_units(owner, token).await?;
        self.from_units(token, units).await
    }

    pub async fn allowance(&self, owner: Address, token: Address, spender: Address) -> Result<U256> {
        Erc20::new(token, self.provider())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(chain_err)
    }

    /// (maxFeePerGas, maxPriorityFeePerGas) under the configured floor
    pub async fn gas_fees(&self, trading: &TradingConfig) -> Result<(U256, U256)> {
        let network = self.provider.get_gas_price().await.map_err(chain_err)?;
        let floor: U256 = parse_units(&trading.base_gas_gwei, "gwei")
            .map_err(|e| Error::Config(format!("base_gas_gwei: {}", e)))?
            .into();
        let priority: U256 = parse_units(&trading.priority_fee_gwei, "gwei")
            .map_err(|e| Error::Config(format!("priority_fee_gwei: {}", e)))?
            .into();
        Ok((max_fee_per_gas(network, floor, priority), priority))
    }
}

type SigningClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct ChainExecutor {
    chain: Arc<ChainClient>,
    aggregator: Option<AggregatorClient>,
    uniswap: Option<UniswapV3>,
    wallets: Arc<CredentialManager>,
    trading: TradingConfig,
    max_slippage_pct: f64,
    sizer: LiquiditySizer,
}

impl ChainExecutor {
    pub fn new(chain: Arc<ChainClient>, config: &Config, wallets: Arc<CredentialManager>) -> Result<Self> {
        let aggregator = config
            .aggregator
            .enabled
            .then(|| AggregatorClient::new(&config.aggregator));
        let uniswap = if config.uniswap.enabled {
            Some(UniswapV3::new(chain.clone(), &config.uniswap)?)
        } else {
            None
        };

        Ok(Self {
            chain,
            aggregator,
            uniswap,
            wallets,
            trading: config.trading.clone(),
            max_slippage_pct: config.security.max_slippage_pct,
            sizer: LiquiditySizer::default(),
        })
    }

    pub fn chain(&self) -> &Arc<ChainClient> {
        &self.chain
    }

    /// Sign, submit and wait for a successful receipt
    async fn submit(
        &self,
        client: &SigningClient,
        to: Address,
        data: Bytes,
        value: U256,
        gas_limit: u64,
    ) -> Result<TransactionReceipt> {
        let (max_fee, priority) = self.chain.gas_fees(&self.trading).await?;
        let tx = Eip1559TransactionRequest::new()
            .to(to)
            .data(data)
            .value(value)
            .gas(gas_limit)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority)
            .chain_id(self.chain.chain_id());

        let pending = client.send_transaction(tx, None).await.map_err(chain_err)?;
        let hash = pending.tx_hash();
        info!("Submitted {:?}", hash);

        let timeout = self.trading.receipt_timeout_secs;
        let receipt = tokio::time::timeout(Duration::from_secs(timeout), pending)
            .await
            .map_err(|_| Error::ExecutionTimeout(timeout))?
            .map_err(chain_err)?
            .ok_or_else(|| Error::ExecutionReverted(format!("{:?} dropped from mempool", hash)))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(Error::ExecutionReverted(format!("{:?}", hash)));
        }

        Ok(receipt)
    }

    async fn ensure_allowance(
        &self,
        client: &SigningClient,
        owner: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<()> {
        let current = self.chain.allowance(owner, token, spender).await?;
        if current >= amount {
            return Ok(());
        }

        info!("Approving {:?} to spend {} of {:?}", spender, amount, token);
        let data = Erc20::new(token, self.chain.provider())
            .approve(spender, amount)
            .calldata()
            .ok_or_else(|| Error::Internal("approve calldata".into()))?;
        self.submit(client, token, data, U256::zero(), self.trading.approve_gas_limit)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QuoteSource for ChainExecutor {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        if let Some(aggregator) = &self.aggregator {
            match aggregator.quote(request).await {
                Ok(quote) => return Ok(quote),
                Err(e) if e.is_skip_tick() && self.uniswap.is_some() => {
                    debug!("Aggregator quote failed ({}), falling back to Uniswap V3", e);
                }
                Err(e) => return Err(e),
            }
        }

        match &self.uniswap {
            Some(uniswap) => uniswap.quote(request).await,
            None => Err(Error::NoRoute("no quote source enabled".into())),
        }
    }
}

#[async_trait]
impl SwapExecutor for ChainExecutor {
    async fn balance_of(&self, owner: &str, token: &str) -> Result<f64> {
        self.chain
            .balance_of(parse_address(owner)?, parse_address(token)?)
            .await
    }

    fn wallet_address(&self, wallet: &str) -> Result<String> {
        self.wallets.get_address(wallet)
    }

    async fn execute(&self, order: &SwapOrder) -> Result<TradeOutcome> {
        if order.slippage_pct <= 0.0 || order.slippage_pct > self.max_slippage_pct {
            return Err(Error::SlippageTooHigh {
                requested: order.slippage_pct,
                max: self.max_slippage_pct,
            });
        }
        if !order.amount_in.is_finite() || order.amount_in <= 0.0 {
            return Err(Error::InvalidAmount(order.amount_in.to_string()));
        }

        let signer = self.wallets.signer(&order.wallet, self.chain.chain_id())?;
        let owner = signer.address();
        let token_in = parse_address(&order.token_in)?;
        let token_out = parse_address(&order.token_out)?;

        let decimals_in = self.chain.decimals(token_in).await?;
        let balance_units = self.chain.balance_units(owner, token_in).await?;
        let available = f64_from_units(balance_units, decimals_in)?;
        if available + BALANCE_TOLERANCE < order.amount_in {
            return Err(Error::InsufficientBalance {
                token: order.token_in.clone(),
                available,
                required: order.amount_in,
            });
        }

        let mut request = order.quote_request(&format!("{:?}", owner));
        request.amount_in = spendable_amount(order.amount_in, balance_units, decimals_in)?;
        if self.trading.liquidity_cap {
            request.amount_in = self.sizer.cap_amount(self, &request).await?;
        }

        let quote = self.quote(&request).await?;
        if !quote.is_executable() {
            return Err(Error::NoRoute(format!("{} returned no calldata", quote.route)));
        }

        let router = parse_address(&quote.to)?;
        let amount_units = units_from_f64(request.amount_in, decimals_in)?.min(balance_units);
        let client = SignerMiddleware::new((*self.chain.provider()).clone(), signer);

        self.ensure_allowance(&client, owner, token_in, router, amount_units)
            .await?;

        let in_before = self.chain.balance_units(owner, token_in).await?;
        let out_before = self.chain.balance_units(owner, token_out).await?;

        let data: Bytes = quote
            .data
            .parse()
            .map_err(|e| Error::NoRoute(format!("Invalid calldata: {}", e)))?;
        let value = parse_value(&quote.value)?;
        let gas_limit = quote
            .gas_estimate
            .map_or(self.trading.gas_limit, |g| g.max(self.trading.gas_limit));

        info!(
            "Swapping {} {} -> {} via {}",
            request.amount_in, order.token_in, order.token_out, quote.route
        );
        let receipt = self.submit(&client, router, data, value, gas_limit).await?;

        let in_after = self.chain.balance_units(owner, token_in).await?;
        let out_after = self.chain.balance_units(owner, token_out).await?;

        let mut amount_in = self
            .chain
            .from_units(token_in, in_before.saturating_sub(in_after))
            .await?;
        let mut amount_out = self
            .chain
            .from_units(token_out, out_after.saturating_sub(out_before))
            .await?;
        if amount_in <= 0.0 {
            amount_in = request.amount_in;
        }
        if amount_out <= 0.0 {
            warn!("Balance delta not visible yet, using quoted output");
            amount_out = quote.expected_output;
        }

        Ok(TradeOutcome {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used.map(|g| g.as_u64()),
            amount_in,
            amount_out,
            route: quote.route,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(
            units_from_f64(1.5, 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(units_from_f64(0.1, 6).unwrap(), U256::from(100_000u64));
        assert!(units_from_f64(-1.0, 18).is_err());
        assert!(units_from_f64(f64::NAN, 18).is_err());

        let back = f64_from_units(U256::from(2_500_000u64), 6).unwrap();
        assert!((back - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_sell_all_never_exceeds_raw_balance() {
        let raw = U256::from_dec_str("23857000002947354959369").unwrap();
        let held = f64_from_units(raw, 18).unwrap();
        assert!(units_from_f64(held, 18).unwrap() > raw);

        let amount = spendable_amount(held, raw, 18).unwrap();
        assert!(units_from_f64(amount, 18).unwrap() <= raw);
        assert!(U256::from(parse_units(amount.to_string(), 18).unwrap()) <= raw);
        assert!((amount - held).abs() / held < 1e-12);

        // Realistic 18-decimal balances with noisy low digits
        let mut seed = 0x9e37_79b9_7f4a_7c15u64;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let raw = U256::from(seed % 100_000) * U256::exp10(18) + U256::from(seed);
            let held = f64_from_units(raw, 18).unwrap();
            let amount = spendable_amount(held, raw, 18).unwrap();
            assert!(units_from_f64(amount, 18).unwrap() <= raw, "raw {}", raw);
        }

        // Requests inside the balance pass through
        assert_eq!(spendable_amount(1.5, raw, 18).unwrap(), 1.5);
        assert_eq!(spendable_amount(2.5, U256::from(2_500_000u64), 6).unwrap(), 2.5);
    }

    #[test]
    fn test_gas_policy() {
        let gwei = U256::from(1_000_000_000u64);
        let floor = U256::from(1_000_000u64);
        let priority = U256::from(100_000u64);

        assert_eq!(max_fee_per_gas(gwei, floor, priority), gwei + priority);
        assert_eq!(
            max_fee_per_gas(U256::from(10u64), floor, priority),
            floor + priority
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("0").unwrap(), U256::zero());
        assert_eq!(parse_value("").unwrap(), U256::zero());
        assert_eq!(parse_value("0x10").unwrap(), U256::from(16u64));
        assert_eq!(parse_value("1000").unwrap(), U256::from(1000u64));
        assert!(parse_value("abc").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0x2cfc85d8e48f8eab294be644d9e25c3030863003").is_ok());
        assert!(matches!(
            parse_address("0x123"),
            Err(Error::InvalidAddress(_))
        ));
    }
}
