//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::{fmt_pct, Amount};
use crate::config::{short_address, Config};
use crate::context::AppContext;
use crate::execution::{ChainClient, QuoteRequest, TradeSide};
use crate::position::MANUAL_OWNER;
use crate::price::SmaWindow;
use crate::strategy::{NewStrategy, ProfitMode, StepDistribution};
use crate::trigger::{TriggerCondition, TriggerParams};
use crate::wallet::{CredentialManager, WalletEntry, WalletType};

/// Daily summary check period while running
const DAILY_CHECK: Duration = Duration::from_secs(3600);

/// Run active strategies, the price database and triggers until Ctrl-C
pub async fn start(ctx: Arc<AppContext>) -> Result<()> {
    info!("Starting Worldchain trader...");

    let (fired_tx, mut fired_rx) = mpsc::channel(64);
    ctx.prices.start(fired_tx).await?;

    let resumed = ctx.runner.resume_active().await;
    info!("Resumed {} active strategies", resumed);

    let status = ctx.prices.status().await;
    info!(
        "Tracking {} tokens, {} active triggers",
        status.tracked_tokens, status.active_triggers
    );

    let mut daily = tokio::time::interval(DAILY_CHECK);

    loop {
        tokio::select! {
            Some(fire) = fired_rx.recv() => {
                match ctx.runner.execute_trigger(&fire).await {
                    Ok(outcome) => info!(
                        "Trigger {} executed: {} -> {} ({})",
                        fire.trigger.name, outcome.amount_in, outcome.amount_out, outcome.tx_hash
                    ),
                    Err(e) => warn!("Trigger {} not executed: {}", fire.trigger.name, e),
                }
            }
            _ = daily.tick() => {
                ctx.runner.daily_report().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    ctx.runner.stop_all().await;
    ctx.prices.stop();
    ctx.save_all().await?;
    info!("Shutdown complete");
    Ok(())
}

fn confirm_trade(ctx: &AppContext, amount_base: f64, prompt: String, force: bool) -> Result<bool> {
    let security = &ctx.config.security;
    if force || !security.require_confirmation || amount_base < security.confirm_above {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Buy `token` with base currency
pub async fn buy(
    ctx: &AppContext,
    token: &str,
    amount: Amount,
    wallet: Option<&str>,
    slippage: Option<f64>,
    force: bool,
) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(token)?;
    let wallet = ctx.wallet_name(wallet);
    let slippage = slippage.unwrap_or(ctx.config.trading.default_slippage_pct);

    let amount = if amount.needs_balance() {
        let owner = ctx.executor.wallet_address(&wallet)?;
        let available = ctx.executor.balance_of(&owner, ctx.base_token()).await?;
        amount.resolve(available)
    } else {
        amount.resolve(0.0)
    };
    if amount <= 0.0 {
        anyhow::bail!("No {} available to spend", ctx.base_symbol());
    }

    let prompt = format!("Buy {} with {} {}?", symbol, amount, ctx.base_symbol());
    if !confirm_trade(ctx, amount, prompt, force)? {
        info!("Buy cancelled by user");
        return Ok(());
    }

    let outcome = ctx
        .runner
        .manual_trade(TradeSide::Buy, &wallet, &address, &symbol, Some(amount), slippage)
        .await?;

    println!("\nBuy confirmed!");
    println!("Spent:    {:.6} {}", outcome.amount_in, ctx.base_symbol());
    println!("Received: {:.6} {}", outcome.amount_out, symbol);
    println!("Price:    {:.8} {}", outcome.execution_price(TradeSide::Buy), ctx.base_symbol());
    println!("Route:    {}", outcome.route);
    println!("Tx:       {}", outcome.tx_hash);
    Ok(())
}

/// Sell `token` for base currency
pub async fn sell(
    ctx: &AppContext,
    token: &str,
    amount: Amount,
    wallet: Option<&str>,
    slippage: Option<f64>,
    force: bool,
) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(token)?;
    let wallet = ctx.wallet_name(wallet);
    let slippage = slippage.unwrap_or(ctx.config.trading.default_slippage_pct);

    let owner = ctx.executor.wallet_address(&wallet)?;
    let available = ctx.executor.balance_of(&owner, &address).await?;
    let tokens = amount.resolve(available);
    if tokens <= 0.0 {
        anyhow::bail!("No {} to sell", symbol);
    }

    let value = ctx
        .quotes
        .quote(&QuoteRequest::new(&address, ctx.base_token(), tokens))
        .await
        .map(|q| q.expected_output)
        .unwrap_or(0.0);

    let prompt = format!(
        "Sell {:.6} {} (~{:.4} {})? This cannot be undone.",
        tokens,
        symbol,
        value,
        ctx.base_symbol()
    );
    if !confirm_trade(ctx, value, prompt, force)? {
        info!("Sell cancelled by user");
        return Ok(());
    }

    let outcome = ctx
        .runner
        .manual_trade(TradeSide::Sell, &wallet, &address, &symbol, Some(tokens), slippage)
        .await?;

    println!("\nSell confirmed!");
    println!("Sold:     {:.6} {}", outcome.amount_in, symbol);
    println!("Received: {:.6} {}", outcome.amount_out, ctx.base_symbol());
    println!("Price:    {:.8} {}", outcome.execution_price(TradeSide::Sell), ctx.base_symbol());
    println!("Route:    {}", outcome.route);
    println!("Tx:       {}", outcome.tx_hash);
    Ok(())
}

/// Price a swap without executing it
pub async fn quote(ctx: &AppContext, from: &str, to: &str, amount: f64) -> Result<()> {
    let (from_address, from_symbol) = ctx.resolve_token(from)?;
    let (to_address, to_symbol) = ctx.resolve_token(to)?;

    let request = QuoteRequest::new(&from_address, &to_address, amount)
        .with_slippage(ctx.config.trading.default_slippage_pct);
    let quote = ctx.quotes.quote(&request).await?;

    println!("\n=== QUOTE ===\n");
    println!("{} {} -> {:.6} {}", amount, from_symbol, quote.expected_output, to_symbol);
    println!("Rate:        1 {} = {:.8} {}", from_symbol, quote.rate(), to_symbol);
    println!("Minimum out: {:.6} {} ({}% slippage)", quote.min_output, to_symbol, request.slippage_pct);
    println!("Route:       {}", quote.route);
    if let Some(gas) = quote.gas_estimate {
        println!("Gas:         {}", gas);
    }
    println!();
    Ok(())
}

/// Positions, P&L and strategy summary
pub async fn status(ctx: &AppContext) -> Result<()> {
    let positions = ctx.ledger.open_positions(None).await;
    let daily = ctx.ledger.daily_stats().await;
    let summary = ctx.store.statistics().await;
    let db = ctx.prices.status().await;
    let base = ctx.base_symbol();

    println!("\n=== TRADER STATUS ===\n");
    println!("Strategies: {} ({} active)", summary.strategies, summary.active);
    println!(
        "Tracked tokens: {}  Samples: {}  Triggers: {}/{} active",
        db.tracked_tokens, db.total_samples, db.active_triggers, db.total_triggers
    );

    let cost: f64 = positions.iter().map(|p| p.remaining_base).sum();
    let unrealized: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
    println!("\nOpen positions: {}", positions.len());
    println!("Cost basis: {:.6} {}", cost, base);
    println!("Unrealized P&L: {:+.6} {}", unrealized, base);

    println!("\nDaily Stats ({}):", daily.date);
    println!("  Trades: {}", daily.total_trades);
    println!("  Wins: {}", daily.winning_trades);
    println!("  Losses: {}", daily.losing_trades);
    println!("  Net P&L: {:+.6} {}", daily.net_pnl, base);

    println!("\n=== OPEN POSITIONS ===\n");
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    println!(
        "{:<10} {:<18} {:>14} {:>14} {:>14} {:>10}",
        "TOKEN", "OWNER", "TOKENS", "COST", "ENTRY", "P&L"
    );
    println!("{}", "-".repeat(86));
    for p in &positions {
        let owner = if p.owner == MANUAL_OWNER {
            p.owner.clone()
        } else {
            short_address(&p.owner)
        };
        let pnl = p.last_price.map(|_| p.unrealized_pnl_pct);
        println!(
            "{:<10} {:<18} {:>14.6} {:>14.6} {:>14.8} {:>10}",
            p.symbol,
            owner,
            p.remaining_token,
            p.remaining_base,
            p.entry_price(),
            fmt_pct(pnl)
        );
    }
    println!();
    Ok(())
}

/// Balances of the base token and every known symbol
pub async fn balance(ctx: &AppContext, wallet: Option<&str>) -> Result<()> {
    let wallet = ctx.wallet_name(wallet);
    let owner = ctx.executor.wallet_address(&wallet)?;

    println!("\n=== BALANCES: {} ({}) ===\n", wallet, owner);

    let mut tokens: Vec<(String, String)> = vec![(
        ctx.base_symbol().to_string(),
        ctx.base_token().to_string(),
    )];
    let mut symbols: Vec<(&String, &String)> = ctx.config.tokens.symbols.iter().collect();
    symbols.sort();
    tokens.extend(symbols.into_iter().map(|(s, a)| (s.clone(), a.clone())));

    for (symbol, address) in tokens {
        match ctx.executor.balance_of(&owner, &address).await {
            Ok(amount) => println!("{:<10} {:>20.6}", symbol, amount),
            Err(e) => println!("{:<10} (balance fetch failed: {})", symbol, e),
        }
    }
    println!();
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC, quote sources, wallets and storage
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");
    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    let chain = match ChainClient::connect(&config.chain).await {
        Ok(chain) => match chain.health().await {
            Ok((block, latency)) => {
                println!("OK (block {}, {}ms)", block, latency.as_millis());
                Some(Arc::new(chain))
            }
            Err(e) => {
                println!("FAILED: {}", e);
                None
            }
        },
        Err(e) => {
            println!("FAILED: {}", e);
            None
        }
    };
    all_healthy &= chain.is_some();

    print!("Wallet registry... ");
    let credentials = match CredentialManager::load(&config.storage.wallets_path()) {
        Ok(creds) => {
            let missing = creds.missing_keys();
            if missing.is_empty() {
                println!("OK ({} wallets)", creds.list_wallets().len());
            } else {
                println!("WARN (no key for {})", missing.join(", "));
            }
            Some(Arc::new(creds))
        }
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
            None
        }
    };

    if let (Some(chain), Some(credentials)) = (chain, credentials) {
        let executor = crate::execution::ChainExecutor::new(chain, config, credentials)?;
        let sample_token = config
            .tokens
            .symbols
            .values()
            .next()
            .cloned()
            .unwrap_or_default();

        if !sample_token.is_empty() {
            print!("Quote source... ");
            let request = QuoteRequest::new(&config.tokens.base_token, &sample_token, 1.0);
            match crate::execution::QuoteSource::quote(&executor, &request).await {
                Ok(q) => println!("OK (via {})", q.route),
                Err(e) => {
                    println!("FAILED: {}", e);
                    all_healthy = false;
                }
            }
        }
    }

    print!("Data directory... ");
    match tokio::fs::create_dir_all(&config.storage.data_dir).await {
        Ok(_) => println!("OK ({})", config.storage.data_dir.display()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }
    Ok(())
}

// =============================================================================
// Strategy Commands
// =============================================================================

/// Options for a new strategy
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions {
    pub token: String,
    pub name: Option<String>,
    pub wallet: Option<String>,
    pub dip: Option<f64>,
    pub profit: Option<f64>,
    pub profit_min: Option<f64>,
    pub profit_max: Option<f64>,
    pub steps: Option<u32>,
    pub distribution: Option<StepDistribution>,
    pub stop_loss: Option<f64>,
    pub amount: Option<f64>,
    pub slippage: Option<f64>,
    pub interval_ms: Option<u64>,
    pub timeframe_ms: Option<u64>,
    pub max_entries: Option<u32>,
}

impl StrategyOptions {
    fn into_new(self, ctx: &AppContext) -> Result<NewStrategy> {
        let (address, symbol) = ctx.resolve_token(&self.token)?;
        let mut new = NewStrategy::with_defaults(
            &ctx.config.strategy_defaults,
            address,
            symbol,
            ctx.wallet_name(self.wallet.as_deref()),
        );

        new.name = self.name;
        if let Some(dip) = self.dip {
            new.dip_threshold_pct = dip;
        }
        new.profit = match (self.profit_min, self.profit_max) {
            (Some(min_pct), Some(max_pct)) => ProfitMode::Range {
                min_pct,
                max_pct,
                steps: self.steps.unwrap_or(3),
                distribution: self.distribution.unwrap_or_default(),
            },
            (None, None) => match self.profit {
                Some(target_pct) => ProfitMode::Simple { target_pct },
                None => new.profit,
            },
            _ => anyhow::bail!("Profit range needs both --profit-min and --profit-max"),
        };
        new.stop_loss_pct = self.stop_loss;
        if let Some(amount) = self.amount {
            new.trade_amount = amount;
        }
        if let Some(slippage) = self.slippage {
            new.max_slippage_pct = slippage;
        }
        if let Some(interval) = self.interval_ms {
            new.check_interval_ms = interval;
        }
        if let Some(timeframe) = self.timeframe_ms {
            new.dip_timeframe_ms = timeframe;
        }
        if let Some(max_entries) = self.max_entries {
            new.max_entries = max_entries;
        }
        Ok(new)
    }
}

pub async fn strategy_create(ctx: &AppContext, options: StrategyOptions, activate: bool) -> Result<String> {
    let new = options.into_new(ctx)?;
    let config = ctx.store.create(new).await?;

    println!("\nStrategy created: {} ({})", config.name, config.id);
    println!("  Token:       {} ({})", config.symbol, config.token);
    println!("  Dip:         {}% within {}s", config.dip_threshold_pct, config.dip_timeframe_ms / 1000);
    println!("  Profit:      {}", config.profit);
    if let Some(sl) = config.stop_loss_pct {
        println!("  Stop loss:   {}%", sl);
    }
    println!("  Amount:      {} {}", config.trade_amount, ctx.base_symbol());
    println!("  Slippage:    {}%", config.max_slippage_pct);
    println!("  Max entries: {}", config.max_entries);

    if activate {
        ctx.store.set_active(&config.id, true).await?;
        println!("\nMarked active; it runs while `wtrade start` is running.");
    }
    println!();
    Ok(config.id)
}

pub async fn strategy_list(ctx: &AppContext) -> Result<()> {
    let strategies = ctx.store.list().await;

    println!("\n=== STRATEGIES ===\n");
    if strategies.is_empty() {
        println!("No strategies.");
        return Ok(());
    }

    println!(
        "{:<18} {:<24} {:<8} {:<8} {:>6} {:<20} {:>7} {:>12}",
        "ID", "NAME", "TOKEN", "STATUS", "DIP", "PROFIT", "TRADES", "P&L"
    );
    println!("{}", "-".repeat(110));
    for record in strategies {
        let c = &record.config;
        let id: String = c.id.chars().take(17).collect();
        println!(
            "{:<18} {:<24} {:<8} {:<8} {:>5}% {:<20} {:>7} {:>+12.6}",
            id,
            c.name,
            c.symbol,
            if c.is_active { "ACTIVE" } else { "stopped" },
            c.dip_threshold_pct,
            c.profit.to_string(),
            record.stats.total_trades,
            record.stats.total_profit
        );
    }
    println!();
    Ok(())
}

/// Mark a strategy active; the running trader picks it up on start
pub async fn strategy_start(ctx: &AppContext, key: &str) -> Result<()> {
    let id = ctx.store.resolve(key).await?;
    let config = ctx.store.set_active(&id, true).await?;
    println!("Strategy {} is active.", config.name);
    Ok(())
}

pub async fn strategy_stop(ctx: &AppContext, key: &str) -> Result<()> {
    let id = ctx.store.resolve(key).await?;
    let config = ctx.runner.stop(&id, "stopped from CLI").await?;
    println!("Strategy {} stopped.", config.name);
    Ok(())
}

pub async fn strategy_delete(ctx: &AppContext, key: &str, force: bool) -> Result<()> {
    let id = ctx.store.resolve(key).await?;
    let record = ctx.store.get(&id).await?;
    let open = ctx.ledger.holding(&id, &record.config.token).await;

    if open.positions > 0 && !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "{} still holds {:.6} {} in {} positions. Delete anyway?",
                record.config.name, open.token_amount, record.config.symbol, open.positions
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    if record.config.is_active {
        ctx.runner.stop(&id, "deleted").await?;
    }
    ctx.store.delete(&id).await?;
    ctx.runner.forget(&id);
    let dropped = ctx.ledger.forget_owner(&id).await?;
    println!("Deleted {} ({} positions dropped from the ledger).", record.config.name, dropped);
    Ok(())
}

pub async fn strategy_stats(ctx: &AppContext) -> Result<()> {
    let summary = ctx.store.statistics().await;
    let base = ctx.base_symbol();

    println!("\n=== STRATEGY STATISTICS ===\n");
    println!("Strategies:        {} ({} active)", summary.strategies, summary.active);
    println!("Entries:           {}", summary.total_trades);
    println!("Profitable exits:  {}", summary.successful_trades);
    println!("Success rate:      {:.1}%", summary.success_rate());
    println!("Realized profit:   {:+.6} {}", summary.total_profit, base);

    for record in ctx.store.list().await {
        let c = &record.config;
        let s = &record.stats;
        let holding = ctx.ledger.holding(&c.id, &c.token).await;
        println!("\n{} ({})", c.name, c.symbol);
        println!("  Entries/exits:  {}/{}", s.total_trades, s.total_exits);
        println!("  Failed trades:  {}", s.failed_trades);
        println!("  Success rate:   {:.1}%", s.success_rate());
        println!("  Profit:         {:+.6} {}", s.total_profit, base);
        println!("  Open positions: {}", holding.positions);
        if let Some(avg) = holding.average_cost() {
            println!("  Average cost:   {:.8} {}", avg, base);
        }
        if let Some(last) = s.last_executed {
            println!("  Last trade:     {}", last.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    println!();
    Ok(())
}

// =============================================================================
// Trigger Commands
// =============================================================================

#[derive(Debug, Clone)]
pub struct TriggerOptions {
    pub token: String,
    pub name: Option<String>,
    pub wallet: Option<String>,
    pub action: TradeSide,
    pub condition: TriggerCondition,
    pub threshold: f64,
    pub timeframe_ms: u64,
    pub sma_window: SmaWindow,
    pub amount: f64,
    pub slippage: Option<f64>,
    pub max_triggers: u32,
}

pub async fn trigger_create(ctx: &AppContext, options: TriggerOptions) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(&options.token)?;
    let slippage = options
        .slippage
        .unwrap_or(ctx.config.trading.default_slippage_pct);
    if slippage > ctx.config.security.max_slippage_pct {
        anyhow::bail!(
            "Slippage {}% exceeds maximum {}%",
            slippage,
            ctx.config.security.max_slippage_pct
        );
    }

    let trigger = ctx
        .prices
        .create_trigger(TriggerParams {
            name: options
                .name
                .unwrap_or_else(|| format!("{} {} {}", options.action, symbol, options.condition)),
            token: address,
            symbol,
            wallet: ctx.wallet_name(options.wallet.as_deref()),
            action: options.action,
            condition: options.condition,
            threshold_pct: options.threshold,
            timeframe_ms: options.timeframe_ms,
            sma_window: options.sma_window,
            amount: options.amount,
            max_slippage_pct: slippage,
            max_triggers: options.max_triggers,
        })
        .await?;

    println!("\nTrigger created: {} ({})", trigger.name, trigger.id);
    println!(
        "  {} {} when {} {}%",
        trigger.action, trigger.amount, trigger.condition, trigger.threshold_pct
    );
    println!("  Fires at most {} times\n", trigger.max_triggers);
    Ok(())
}

pub async fn trigger_list(ctx: &AppContext) -> Result<()> {
    let triggers = ctx.prices.list_triggers().await;

    println!("\n=== PRICE TRIGGERS ===\n");
    if triggers.is_empty() {
        println!("No triggers.");
        return Ok(());
    }

    println!(
        "{:<18} {:<24} {:<8} {:<5} {:<11} {:>8} {:>10} {:>7} {:<8}",
        "ID", "NAME", "TOKEN", "SIDE", "CONDITION", "THRESH", "AMOUNT", "FIRED", "STATUS"
    );
    println!("{}", "-".repeat(108));
    for t in triggers {
        let id: String = t.id.chars().take(17).collect();
        println!(
            "{:<18} {:<24} {:<8} {:<5} {:<11} {:>7}% {:>10} {:>3}/{:<3} {:<8}",
            id,
            t.name,
            t.symbol,
            t.action,
            t.condition.to_string(),
            t.threshold_pct,
            t.amount,
            t.trigger_count,
            t.max_triggers,
            if t.is_active { "ACTIVE" } else { "done" }
        );
    }
    println!();
    Ok(())
}

pub async fn trigger_delete(ctx: &AppContext, id: &str) -> Result<()> {
    let full_id = ctx
        .prices
        .list_triggers()
        .await
        .into_iter()
        .map(|t| t.id)
        .find(|tid| tid == id || tid.starts_with(id))
        .unwrap_or_else(|| id.to_string());
    let removed = ctx.prices.delete_trigger(&full_id).await?;
    println!("Deleted trigger {}.", removed.name);
    Ok(())
}

// =============================================================================
// Price Tracking Commands
// =============================================================================

pub async fn track_add(ctx: &AppContext, token: &str) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(token)?;
    let series = ctx.prices.add_token(&address, &symbol).await?;
    println!(
        "Tracking {} at {:.8} {}",
        symbol,
        series.current_price().unwrap_or(0.0),
        ctx.base_symbol()
    );
    Ok(())
}

pub async fn track_remove(ctx: &AppContext, token: &str) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(token)?;
    if ctx.prices.remove_token(&address).await? {
        println!("Stopped tracking {}.", symbol);
    } else {
        println!("{} was not tracked.", symbol);
    }
    Ok(())
}

pub async fn track_list(ctx: &AppContext) -> Result<()> {
    let tokens = ctx.prices.tokens().await;

    println!("\n=== TRACKED TOKENS ===\n");
    if tokens.is_empty() {
        println!("No tracked tokens.");
        return Ok(());
    }

    println!(
        "{:<10} {:>16} {:>10} {:>10} {:>9} {:<20}",
        "TOKEN", "PRICE", "1H", "24H", "SAMPLES", "UPDATED"
    );
    println!("{}", "-".repeat(80));
    for token in tokens {
        if let Some(stats) = ctx.prices.price_stats(&token).await {
            println!(
                "{:<10} {:>16.8} {:>10} {:>10} {:>9} {:<20}",
                stats.symbol,
                stats.current_price.unwrap_or(0.0),
                fmt_pct(stats.change_1h),
                fmt_pct(stats.change_24h),
                stats.samples,
                stats
                    .last_update
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into())
            );
        }
    }
    println!();
    Ok(())
}

pub async fn track_stats(ctx: &AppContext, token: &str) -> Result<()> {
    let (address, symbol) = ctx.resolve_token(token)?;
    let stats = ctx
        .prices
        .price_stats(&address)
        .await
        .with_context(|| format!("{} is not tracked", symbol))?;
    let base = ctx.base_symbol();

    println!("\n=== {} PRICE STATS ===\n", stats.symbol);
    println!("Current:  {:.8} {}", stats.current_price.unwrap_or(0.0), base);
    println!("5m:       {}", fmt_pct(stats.change_5m));
    println!("1h:       {}", fmt_pct(stats.change_1h));
    println!("6h:       {}", fmt_pct(stats.change_6h));
    println!("24h:      {}", fmt_pct(stats.change_24h));
    println!("\nMoving averages:");
    for window in SmaWindow::ALL {
        match stats.smas.get(window.label()) {
            Some(sma) => println!("  {:<7} {:.8}", window.label(), sma),
            None => println!("  {:<7} -", window.label()),
        }
    }
    println!("\nSamples: {}", stats.samples);
    if let Some(t) = stats.last_update {
        let age = Utc::now() - t;
        println!("Last update: {} ({}s ago)", t.format("%Y-%m-%d %H:%M:%S"), age.num_seconds());
    }
    println!();
    Ok(())
}

// =============================================================================
// Wallet Management Commands
// =============================================================================

fn load_credentials(config: &Config) -> Result<CredentialManager> {
    CredentialManager::load(&config.storage.wallets_path())
        .map_err(|e| anyhow::anyhow!("Failed to load wallet registry: {}", e))
}

/// List all configured wallets
pub async fn wallet_list(config: &Config) -> Result<()> {
    let creds = load_credentials(config)?;

    println!("\n=== CONFIGURED WALLETS ===\n");
    println!(
        "{:<16} {:<18} {:<11} {:<44} {}",
        "NAME", "ALIAS", "TYPE", "ADDRESS", "KEY"
    );
    println!("{}", "-".repeat(100));

    for wallet in creds.list_wallets() {
        let key = match wallet.wallet_type {
            WalletType::WatchOnly => "-",
            WalletType::Hot if creds.has_key(&wallet.name) => "loaded",
            WalletType::Hot => "MISSING",
        };
        println!(
            "{:<16} {:<18} {:<11} {:<44} {}",
            wallet.name,
            wallet.alias,
            wallet.wallet_type.to_string(),
            wallet.address,
            key
        );
    }

    println!();
    println!(
        "Keys are read from {}<NAME> environment variables.",
        crate::wallet::credentials::KEY_ENV_PREFIX
    );
    println!();
    Ok(())
}

/// Register a wallet address
pub async fn wallet_add(
    config: &Config,
    name: &str,
    address: &str,
    alias: Option<String>,
    watch_only: bool,
    notes: Option<String>,
) -> Result<()> {
    let creds = load_credentials(config)?;
    let wallet_type = if watch_only {
        WalletType::WatchOnly
    } else {
        WalletType::Hot
    };

    creds.add_wallet(WalletEntry {
        name: name.to_string(),
        alias: alias.unwrap_or_else(|| name.to_string()),
        wallet_type,
        address: address.to_string(),
        created_at: Utc::now(),
        notes: notes.unwrap_or_default(),
    })?;

    println!("Added {} wallet {} ({})", wallet_type, name, address);
    if wallet_type == WalletType::Hot && !creds.has_key(name) {
        println!(
            "Set {} to trade with it.",
            CredentialManager::key_env_var(name)
        );
    }
    Ok(())
}

pub async fn wallet_remove(config: &Config, name: &str, force: bool) -> Result<()> {
    let creds = load_credentials(config)?;
    let wallet = creds
        .get_wallet(name)
        .with_context(|| format!("Wallet not found: {}", name))?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove wallet {} ({})?", wallet.name, wallet.address))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    creds.remove_wallet(name)?;
    println!("Removed wallet {}.", name);
    Ok(())
}

/// Log and keep going; used by interactive loops
pub(crate) fn report(result: Result<()>) {
    if let Err(e) = result {
        error!("{:#}", e);
        println!("Error: {:#}", e);
    }
}
