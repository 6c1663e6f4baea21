//! Strategy runner
//!
//! Each active strategy gets its own timer task. A tick samples the price,
//! asks the evaluator for a decision and, on buy or sell, executes the swap
//! and folds the result into the ledger and the strategy statistics.
//!
//! At most one tick per strategy is in flight: the tick body runs under a
//! per-strategy mutex taken with `try_lock`, and a tick that finds it held
//! is skipped.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::execution::{SwapExecutor, SwapOrder, TradeOutcome, TradeSide};
use crate::notify::{Notification, Notifier};
use crate::position::{ExitSummary, Holding, PositionLedger, MANUAL_OWNER};
use crate::price::{PriceDatabase, TriggerFire};
use crate::strategy::store::StrategyStore;
use crate::strategy::types::StrategyConfig;
use crate::trigger::{evaluate, Decision, ExitReason, TickInput};

/// What one tick did
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Previous tick still running
    Busy,
    Held { price: f64 },
    Bought(TradeOutcome),
    Sold { outcome: TradeOutcome, summary: ExitSummary },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AlertLevel {
    Profit,
    Loss,
}

struct RunningStrategy {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StrategyRunner {
    store: Arc<StrategyStore>,
    ledger: Arc<PositionLedger>,
    prices: Arc<PriceDatabase>,
    executor: Arc<dyn SwapExecutor>,
    notifier: Arc<dyn Notifier>,
    base_token: String,
    alerts: NotificationConfig,
    tasks: DashMap<String, RunningStrategy>,
    busy: DashMap<String, Arc<Mutex<()>>>,
    alerted: DashMap<String, AlertLevel>,
}

impl StrategyRunner {
    pub fn new(
        store: Arc<StrategyStore>,
        ledger: Arc<PositionLedger>,
        prices: Arc<PriceDatabase>,
        executor: Arc<dyn SwapExecutor>,
        notifier: Arc<dyn Notifier>,
        base_token: impl Into<String>,
        alerts: NotificationConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            prices,
            executor,
            notifier,
            base_token: base_token.into().to_lowercase(),
            alerts,
            tasks: DashMap::new(),
            busy: DashMap::new(),
            alerted: DashMap::new(),
        }
    }

    fn guard(&self, id: &str) -> Arc<Mutex<()>> {
        self.busy
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn running(&self) -> Vec<String> {
        self.tasks.iter().map(|e| e.key().clone()).collect()
    }

    /// Mark a strategy active and spawn its timer task
    pub async fn start(self: &Arc<Self>, id: &str) -> Result<StrategyConfig> {
        if self.tasks.contains_key(id) {
            return Err(Error::StrategyActive(id.to_string()));
        }

        let record = self.store.get(id).await?;
        let config = if record.config.is_active {
            record.config
        } else {
            self.store.set_active(id, true).await?
        };

        if let Err(e) = self.prices.add_token(&config.token, &config.symbol).await {
            warn!("Could not take an initial sample for {}: {}", config.symbol, e);
        }

        let cancel = CancellationToken::new();
        let runner = self.clone();
        let task_id = config.id.clone();
        let stopped = cancel.clone();
        let period = Duration::from_millis(config.check_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match runner.tick(&task_id).await {
                            Ok(TickOutcome::Busy) => {}
                            Ok(outcome) => debug!("Strategy {} tick: {:?}", task_id, outcome),
                            Err(e) if e.is_skip_tick() => debug!("Strategy {} skipped tick: {}", task_id, e),
                            Err(e) => warn!("Strategy {} tick failed: {}", task_id, e),
                        }
                    }
                    _ = stopped.cancelled() => {
                        debug!("Strategy {} task exiting", task_id);
                        break;
                    }
                }
            }
        });

        self.tasks
            .insert(config.id.clone(), RunningStrategy { cancel, handle });

        info!(
            "Started strategy {} on {} every {}ms",
            config.name, config.symbol, config.check_interval_ms
        );
        self.notifier
            .notify(&Notification::StrategyStarted {
                name: config.name.clone(),
                symbol: config.symbol.clone(),
            })
            .await;

        Ok(config)
    }

    /// Stop a strategy and clear its active flag. In-flight ticks finish.
    pub async fn stop(&self, id: &str, reason: &str) -> Result<StrategyConfig> {
        if let Some((_, task)) = self.tasks.remove(id) {
            task.cancel.cancel();
        }
        self.alerted.remove(id);
        self.busy.remove(id);

        let config = self.store.set_active(id, false).await?;
        info!("Stopped strategy {} ({})", config.name, reason);
        self.notifier
            .notify(&Notification::StrategyStopped {
                name: config.name.clone(),
                symbol: config.symbol.clone(),
                reason: reason.to_string(),
            })
            .await;
        Ok(config)
    }

    /// Drop per-strategy bookkeeping for a deleted strategy
    pub fn forget(&self, id: &str) {
        self.busy.remove(id);
        self.alerted.remove(id);
    }

    /// Cancel every task on shutdown. Active flags are kept so the
    /// strategies resume on the next start.
    pub async fn stop_all(&self) {
        let ids = self.running();
        for id in &ids {
            if let Some((_, task)) = self.tasks.remove(id) {
                task.cancel.cancel();
                if let Err(e) = task.handle.await {
                    error!("Strategy task {} ended abnormally: {}", id, e);
                }
            }
        }
        if !ids.is_empty() {
            info!("Stopped {} strategy tasks", ids.len());
        }
    }

    /// Start every strategy persisted as active
    pub async fn resume_active(self: &Arc<Self>) -> usize {
        let mut started = 0;
        for record in self.store.list().await {
            if !record.config.is_active || self.is_running(&record.config.id) {
                continue;
            }
            match self.start(&record.config.id).await {
                Ok(_) => started += 1,
                Err(e) => error!("Failed to resume {}: {}", record.config.name, e),
            }
        }
        started
    }

    /// Run one guarded tick
    pub async fn tick(&self, id: &str) -> Result<TickOutcome> {
        let guard = self.guard(id);
        let Ok(_busy) = guard.try_lock() else {
            debug!("Previous tick of {} still running, skipping", id);
            return Ok(TickOutcome::Busy);
        };

        let outcome = self.run_tick(id).await;
        if let Err(e) = self.store.record_check(id).await {
            debug!("Could not record check for {}: {}", id, e);
        }
        outcome
    }

    async fn run_tick(&self, id: &str) -> Result<TickOutcome> {
        let record = self.store.get(id).await?;
        let config = &record.config;

        if !self.prices.is_tracked(&config.token).await {
            self.prices.add_token(&config.token, &config.symbol).await?;
        }
        let sample = self.prices.sampler().sample(&config.token).await?;
        self.prices.record_sample(&config.token, sample.clone()).await;

        let series = self
            .prices
            .series(&config.token)
            .await
            .ok_or_else(|| Error::StaleData { age_secs: 0 })?;
        let since = Utc::now() - ChronoDuration::milliseconds(config.dip_timeframe_ms as i64);
        let holding = self.ledger.holding(id, &config.token).await;

        let decision = evaluate(&TickInput {
            config,
            current: sample.price,
            highest_in_window: series.highest_since(since),
            samples_in_window: series.count_since(since),
            open_positions: holding.positions,
            held_tokens: holding.token_amount,
            average_cost: holding.average_cost(),
            range: &record.stats.range,
        });

        match decision {
            Decision::Hold => {
                self.check_alerts(config, &holding, sample.price).await;
                Ok(TickOutcome::Held {
                    price: sample.price,
                })
            }
            Decision::Buy {
                amount_base,
                signal,
            } => {
                info!(
                    "{}: {} dipped {:.2}% from {:.8} to {:.8}, buying {}",
                    config.name, config.symbol, signal.drop_pct, signal.highest, signal.current, amount_base
                );
                self.strategy_buy(config, amount_base).await
            }
            Decision::Sell {
                tokens,
                sell_all,
                reason,
            } => {
                info!(
                    "{}: {} on {}, selling {}",
                    config.name,
                    reason.label(),
                    config.symbol,
                    if sell_all { "everything".to_string() } else { format!("{:.6}", tokens) }
                );
                let amount = if sell_all { holding.token_amount } else { tokens };
                self.strategy_sell(config, amount, reason).await
            }
        }
    }

    async fn execute_or_count(&self, id: &str, order: &SwapOrder) -> Result<TradeOutcome> {
        match self.executor.execute(order).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_execution_failure() || e.is_pre_flight() {
                    if let Err(store_err) = self.store.record_failure(id).await {
                        warn!("Could not record failure for {}: {}", id, store_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn strategy_buy(&self, config: &StrategyConfig, amount_base: f64) -> Result<TickOutcome> {
        let order = SwapOrder {
            wallet: config.wallet.clone(),
            token_in: self.base_token.clone(),
            token_out: config.token.clone(),
            amount_in: amount_base,
            slippage_pct: config.max_slippage_pct,
        };
        let outcome = self.execute_or_count(&config.id, &order).await?;

        self.ledger
            .record_entry(
                &config.id,
                &config.token,
                &config.symbol,
                outcome.amount_in,
                outcome.amount_out,
                &outcome.tx_hash,
            )
            .await?;
        let holding = self.ledger.holding(&config.id, &config.token).await;
        self.store.record_entry(&config.id, holding.token_amount).await?;

        self.notify_trade(TradeSide::Buy, &config.symbol, &outcome, Some(&config.name))
            .await;
        Ok(TickOutcome::Bought(outcome))
    }

    async fn strategy_sell(&self, config: &StrategyConfig, tokens: f64, reason: ExitReason) -> Result<TickOutcome> {
        let amount = self.sellable(&config.wallet, &config.token, tokens).await?;
        let order = SwapOrder {
            wallet: config.wallet.clone(),
            token_in: config.token.clone(),
            token_out: self.base_token.clone(),
            amount_in: amount,
            slippage_pct: config.max_slippage_pct,
        };
        let outcome = self.execute_or_count(&config.id, &order).await?;

        let summary = self
            .ledger
            .record_partial_exit(
                &config.id,
                &config.token,
                outcome.amount_in,
                outcome.amount_out,
                &outcome.tx_hash,
            )
            .await?;
        let closed_all = self.ledger.holding(&config.id, &config.token).await.positions == 0;
        let steps = match &reason {
            ExitReason::RangeSteps { steps, .. } => steps.clone(),
            _ => Vec::new(),
        };
        self.store
            .record_exit(&config.id, summary.realized_pnl, &steps, closed_all)
            .await?;
        if closed_all {
            self.alerted.remove(&config.id);
        }

        self.notify_trade(TradeSide::Sell, &config.symbol, &outcome, Some(&config.name))
            .await;
        Ok(TickOutcome::Sold { outcome, summary })
    }

    /// Requested sell amount capped to the wallet balance
    async fn sellable(&self, wallet: &str, token: &str, requested: f64) -> Result<f64> {
        let owner = self.executor.wallet_address(wallet)?;
        let balance = self.executor.balance_of(&owner, token).await?;
        if balance <= 0.0 {
            return Err(Error::InsufficientBalance {
                token: token.to_string(),
                available: balance,
                required: requested,
            });
        }
        if balance < requested {
            warn!("Selling wallet balance {} instead of {}", balance, requested);
        }
        Ok(requested.min(balance))
    }

    async fn check_alerts(&self, config: &StrategyConfig, holding: &Holding, price: f64) {
        if holding.positions == 0 || holding.cost_basis <= 0.0 {
            return;
        }
        let pnl_base = holding.token_amount * price - holding.cost_basis;
        let pnl_pct = pnl_base / holding.cost_basis * 100.0;

        let level = if pnl_pct >= self.alerts.profit_alert_pct {
            Some(AlertLevel::Profit)
        } else if pnl_pct <= -self.alerts.loss_alert_pct {
            Some(AlertLevel::Loss)
        } else {
            None
        };

        let Some(level) = level else {
            self.alerted.remove(&config.id);
            return;
        };
        if self.alerted.get(&config.id).map(|l| *l) == Some(level) {
            return;
        }
        self.alerted.insert(config.id.clone(), level);

        let notification = match level {
            AlertLevel::Profit => Notification::ProfitAlert {
                symbol: config.symbol.clone(),
                pnl_pct,
                pnl_base,
            },
            AlertLevel::Loss => Notification::LossAlert {
                symbol: config.symbol.clone(),
                pnl_pct,
                pnl_base,
            },
        };
        self.notifier.notify(&notification).await;
    }

    async fn notify_trade(&self, side: TradeSide, symbol: &str, outcome: &TradeOutcome, strategy: Option<&str>) {
        self.notifier
            .notify(&Notification::TradeExecuted {
                side,
                symbol: symbol.to_string(),
                amount_in: outcome.amount_in,
                amount_out: outcome.amount_out,
                price: outcome.execution_price(side),
                tx_hash: outcome.tx_hash.clone(),
                strategy: strategy.map(str::to_string),
            })
            .await;
    }

    /// A one-off buy or sell outside any strategy, recorded under the
    /// manual owner. `amount` is base for buys and tokens for sells;
    /// `None` sells the whole wallet balance.
    pub async fn manual_trade(
        &self,
        side: TradeSide,
        wallet: &str,
        token: &str,
        symbol: &str,
        amount: Option<f64>,
        slippage_pct: f64,
    ) -> Result<TradeOutcome> {
        let token = token.to_lowercase();
        let (token_in, token_out, amount_in) = match side {
            TradeSide::Buy => {
                let amount = amount.ok_or_else(|| Error::InvalidAmount("buy amount required".into()))?;
                (self.base_token.clone(), token.clone(), amount)
            }
            TradeSide::Sell => {
                let amount = self.sellable(wallet, &token, amount.unwrap_or(f64::MAX)).await?;
                (token.clone(), self.base_token.clone(), amount)
            }
        };

        let outcome = self
            .executor
            .execute(&SwapOrder {
                wallet: wallet.to_string(),
                token_in,
                token_out,
                amount_in,
                slippage_pct,
            })
            .await?;

        self.record_manual(side, &token, symbol, &outcome).await?;
        self.notify_trade(side, symbol, &outcome, None).await;
        Ok(outcome)
    }

    async fn record_manual(&self, side: TradeSide, token: &str, symbol: &str, outcome: &TradeOutcome) -> Result<()> {
        match side {
            TradeSide::Buy => {
                self.ledger
                    .record_entry(
                        MANUAL_OWNER,
                        token,
                        symbol,
                        outcome.amount_in,
                        outcome.amount_out,
                        &outcome.tx_hash,
                    )
                    .await?;
            }
            TradeSide::Sell => {
                match self
                    .ledger
                    .record_partial_exit(
                        MANUAL_OWNER,
                        token,
                        outcome.amount_in,
                        outcome.amount_out,
                        &outcome.tx_hash,
                    )
                    .await
                {
                    Ok(summary) => info!("Manual exit realized {:.6}", summary.realized_pnl),
                    Err(Error::PositionNotFound(_)) => {
                        debug!("Sold {} with no recorded manual position", symbol)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Execute a fired price trigger and count it against its limit
    pub async fn execute_trigger(&self, fire: &TriggerFire) -> Result<TradeOutcome> {
        let trigger = self.prices.claim_trigger(&fire.trigger.id).await?;
        self.notifier
            .notify(&Notification::TriggerFired {
                name: trigger.name.clone(),
                symbol: trigger.symbol.clone(),
                details: fire.details.clone(),
            })
            .await;

        let outcome = match self
            .manual_trade(
                trigger.action,
                &trigger.wallet,
                &trigger.token,
                &trigger.symbol,
                Some(trigger.amount),
                trigger.max_slippage_pct,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.prices.release_trigger(&trigger.id).await;
                return Err(e);
            }
        };

        self.prices.record_trigger_execution(&trigger.id).await?;
        Ok(outcome)
    }

    /// Send yesterday's summary once the date rolls over
    pub async fn daily_report(&self) {
        if let Some(stats) = self.ledger.rollover_daily().await {
            if stats.total_trades > 0 {
                self.notifier.notify(&Notification::DailyReport(stats)).await;
            }
            if let Err(e) = self.ledger.save().await {
                warn!("Failed to save ledger after daily rollover: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SamplerConfig, StrategyDefaults};
    use crate::execution::{QuoteRequest, QuoteSource, Route, SwapQuote};
    use crate::notify::tests::RecordingNotifier;
    use crate::price::sampler::tests::ScriptedQuotes;
    use crate::price::{PriceSample, PriceSampler, SmaWindow};
    use crate::trigger::{TriggerCondition, TriggerParams};
    use crate::strategy::types::{NewStrategy, ProfitMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const BASE: &str = "0xbase";
    const TOKEN: &str = "0xaaa";

    /// Fills every order at the scripted rate
    struct PaperExecutor {
        quotes: Arc<ScriptedQuotes>,
        fail_next: AtomicBool,
        fills: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for PaperExecutor {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
            self.quotes.quote(request).await
        }
    }

    #[async_trait]
    impl SwapExecutor for PaperExecutor {
        async fn balance_of(&self, _owner: &str, _token: &str) -> Result<f64> {
            Ok(1_000.0)
        }

        fn wallet_address(&self, _wallet: &str) -> Result<String> {
            Ok("0xwallet".into())
        }

        async fn execute(&self, order: &SwapOrder) -> Result<TradeOutcome> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::ExecutionReverted("0xdead".into()));
            }
            let quote = self.quotes.quote(&order.quote_request("0xwallet")).await?;
            let n = self.fills.fetch_add(1, Ordering::SeqCst);
            Ok(TradeOutcome {
                tx_hash: format!("0xtx{}", n),
                block_number: Some(1),
                gas_used: Some(150_000),
                amount_in: order.amount_in,
                amount_out: quote.expected_output,
                route: Route::Aggregator,
            })
        }
    }

    struct Harness {
        quotes: Arc<ScriptedQuotes>,
        executor: Arc<PaperExecutor>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<StrategyStore>,
        ledger: Arc<PositionLedger>,
        runner: Arc<StrategyRunner>,
    }

    impl Harness {
        fn new() -> Self {
            let quotes = Arc::new(ScriptedQuotes::default());
            let executor = Arc::new(PaperExecutor {
                quotes: quotes.clone(),
                fail_next: AtomicBool::new(false),
                fills: AtomicUsize::new(0),
            });
            let notifier = Arc::new(RecordingNotifier::default());
            let store = Arc::new(StrategyStore::new(None, 10.0));
            let ledger = Arc::new(PositionLedger::new(None));
            let sampler = Arc::new(PriceSampler::new(quotes.clone(), BASE, &SamplerConfig::default()));
            let prices = Arc::new(PriceDatabase::new(sampler, SamplerConfig::default()));
            let runner = Arc::new(StrategyRunner::new(
                store.clone(),
                ledger.clone(),
                prices,
                executor.clone(),
                notifier.clone(),
                BASE,
                NotificationConfig::default(),
            ));
            Self {
                quotes,
                executor,
                notifier,
                store,
                ledger,
                runner,
            }
        }

        /// Token price in base, and the reverse rate for buys
        fn set_price(&self, price: f64) {
            self.quotes.set(TOKEN, Ok(price));
            self.quotes.set(BASE, Ok(1.0 / price));
        }

        async fn strategy(&self, dip: f64, profit: f64) -> String {
            let mut new = NewStrategy::with_defaults(&StrategyDefaults::default(), TOKEN, "AAA", "main");
            new.dip_threshold_pct = dip;
            new.profit = ProfitMode::Simple { target_pct: profit };
            new.trade_amount = 1.0;
            new.max_entries = 1;
            self.store.create(new).await.unwrap().id
        }
    }

    #[tokio::test]
    async fn test_dip_buy_then_profit_exit() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;

        h.set_price(2.0);
        assert!(matches!(h.runner.tick(&id).await.unwrap(), TickOutcome::Held { .. }));

        h.set_price(1.7);
        let bought = h.runner.tick(&id).await.unwrap();
        assert!(matches!(bought, TickOutcome::Bought(_)));

        let holding = h.ledger.holding(&id, TOKEN).await;
        assert_eq!(holding.positions, 1);
        assert!((holding.average_cost().unwrap() - 1.7).abs() < 1e-9);

        // Below the 1.87 target
        h.set_price(1.85);
        assert!(matches!(h.runner.tick(&id).await.unwrap(), TickOutcome::Held { .. }));

        h.set_price(1.9);
        match h.runner.tick(&id).await.unwrap() {
            TickOutcome::Sold { summary, .. } => {
                assert!(summary.realized_pnl > 0.0);
                assert_eq!(summary.closed.len(), 1);
            }
            other => panic!("expected sell, got {:?}", other),
        }

        assert_eq!(h.ledger.holding(&id, TOKEN).await.positions, 0);
        let stats = h.store.get(&id).await.unwrap().stats;
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.total_exits, 1);
        assert_eq!(stats.successful_trades, 1);
        assert_eq!(stats.checks_performed, 4);

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(
            sent.iter()
                .filter(|n| matches!(n, Notification::TradeExecuted { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_revert_keeps_state() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;

        h.set_price(2.0);
        h.runner.tick(&id).await.unwrap();

        h.set_price(1.7);
        h.executor.fail_next.store(true, Ordering::SeqCst);
        let err = h.runner.tick(&id).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionReverted(_)));

        assert_eq!(h.ledger.holding(&id, TOKEN).await.positions, 0);
        let stats = h.store.get(&id).await.unwrap().stats;
        assert_eq!(stats.failed_trades, 1);
        assert_eq!(stats.total_trades, 0);

        // Next tick retries on its own
        assert!(matches!(h.runner.tick(&id).await.unwrap(), TickOutcome::Bought(_)));
    }

    #[tokio::test]
    async fn test_quote_failure_skips_tick() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;

        let err = h.runner.tick(&id).await.unwrap_err();
        assert!(err.is_skip_tick());
        assert_eq!(h.ledger.open_positions(None).await.len(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;
        h.set_price(2.0);

        let guard = h.runner.guard(&id);
        let held = guard.lock().await;
        assert!(matches!(h.runner.tick(&id).await.unwrap(), TickOutcome::Busy));
        drop(held);

        assert!(matches!(h.runner.tick(&id).await.unwrap(), TickOutcome::Held { .. }));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;
        h.set_price(2.0);

        h.runner.start(&id).await.unwrap();
        assert!(h.runner.is_running(&id));
        assert!(h.store.get(&id).await.unwrap().config.is_active);
        assert!(matches!(h.runner.start(&id).await, Err(Error::StrategyActive(_))));

        h.runner.stop(&id, "test").await.unwrap();
        assert!(!h.runner.is_running(&id));
        assert!(!h.store.get(&id).await.unwrap().config.is_active);
        assert!(!h.runner.busy.contains_key(&id));
    }

    #[tokio::test]
    async fn test_forget_clears_guards() {
        let h = Harness::new();
        let id = h.strategy(10.0, 10.0).await;
        h.set_price(2.0);

        h.runner.tick(&id).await.unwrap();
        assert!(h.runner.busy.contains_key(&id));

        h.store.delete(&id).await.unwrap();
        h.runner.forget(&id);
        assert!(h.runner.busy.is_empty());
    }

    #[tokio::test]
    async fn test_single_shot_trigger_trades_once() {
        let h = Harness::new();
        h.set_price(2.0);
        let prices = h.runner.prices.clone();
        prices.add_token(TOKEN, "AAA").await.unwrap();

        let trigger = prices
            .create_trigger(TriggerParams {
                name: "dip".into(),
                token: TOKEN.into(),
                symbol: "AAA".into(),
                wallet: "main".into(),
                action: TradeSide::Buy,
                condition: TriggerCondition::PriceDrop,
                threshold_pct: 10.0,
                timeframe_ms: 3_600_000,
                sma_window: SmaWindow::OneHour,
                amount: 0.5,
                max_slippage_pct: 1.0,
                max_triggers: 1,
            })
            .await
            .unwrap();

        h.set_price(1.5);
        assert!(
            prices
                .record_sample(
                    TOKEN,
                    PriceSample {
                        timestamp: Utc::now() + ChronoDuration::seconds(1),
                        price: 1.5,
                        source: "test".into(),
                    },
                )
                .await
        );

        let fired = prices.check_triggers().await;
        assert_eq!(fired.len(), 1);
        // Still pending, so the next check must not queue it again
        assert!(prices.check_triggers().await.is_empty());

        h.runner.execute_trigger(&fired[0]).await.unwrap();
        let again = h.runner.execute_trigger(&fired[0]).await;
        assert!(matches!(again, Err(Error::TriggerSpent(_))));

        assert_eq!(h.executor.fills.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.holding(MANUAL_OWNER, TOKEN).await.positions, 1);
        let spent = prices.list_triggers().await;
        assert_eq!(spent[0].id, trigger.id);
        assert_eq!(spent[0].trigger_count, 1);
        assert!(!spent[0].is_active);
    }

    #[tokio::test]
    async fn test_failed_trigger_trade_is_released() {
        let h = Harness::new();
        h.set_price(2.0);
        let prices = h.runner.prices.clone();
        prices.add_token(TOKEN, "AAA").await.unwrap();
        prices
            .create_trigger(TriggerParams {
                name: "dip".into(),
                token: TOKEN.into(),
                symbol: "AAA".into(),
                wallet: "main".into(),
                action: TradeSide::Buy,
                condition: TriggerCondition::PriceDrop,
                threshold_pct: 10.0,
                timeframe_ms: 3_600_000,
                sma_window: SmaWindow::OneHour,
                amount: 0.5,
                max_slippage_pct: 1.0,
                max_triggers: 1,
            })
            .await
            .unwrap();

        h.set_price(1.5);
        prices
            .record_sample(
                TOKEN,
                PriceSample {
                    timestamp: Utc::now() + ChronoDuration::seconds(1),
                    price: 1.5,
                    source: "test".into(),
                },
            )
            .await;

        let fired = prices.check_triggers().await;
        h.executor.fail_next.store(true, Ordering::SeqCst);
        assert!(h.runner.execute_trigger(&fired[0]).await.is_err());

        // Back in rotation with its fire unused
        let refired = prices.check_triggers().await;
        assert_eq!(refired.len(), 1);
        h.runner.execute_trigger(&refired[0]).await.unwrap();
        assert_eq!(h.executor.fills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_round_trip() {
        let h = Harness::new();
        h.set_price(0.5);

        let bought = h
            .runner
            .manual_trade(TradeSide::Buy, "main", TOKEN, "AAA", Some(1.0), 1.0)
            .await
            .unwrap();
        assert!((bought.amount_out - 2.0).abs() < 1e-9);
        assert_eq!(h.ledger.holding(MANUAL_OWNER, TOKEN).await.positions, 1);

        h.set_price(0.6);
        h.runner
            .manual_trade(TradeSide::Sell, "main", TOKEN, "AAA", Some(2.0), 1.0)
            .await
            .unwrap();
        assert_eq!(h.ledger.holding(MANUAL_OWNER, TOKEN).await.positions, 0);
    }
}
