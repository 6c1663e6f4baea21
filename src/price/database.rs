//! Tracked-token price database
//!
//! Holds a `PriceSeries` per tracked token, refreshes all of them on a
//! background timer, keeps the SMA cache current and evaluates the
//! standalone price triggers. Series and triggers persist to separate files.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::position::PositionLedger;
use crate::price::sample::{PriceSeries, SmaWindow};
use crate::price::sampler::PriceSampler;
use crate::storage;
use crate::trigger::{PriceTrigger, TriggerParams};

/// A trigger whose condition held on the latest check
#[derive(Debug, Clone)]
pub struct TriggerFire {
    pub trigger: PriceTrigger,
    pub price: f64,
    pub details: String,
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub updated: usize,
    pub failed: usize,
    pub pruned: usize,
    pub removed: Vec<String>,
    pub smas_refreshed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceStats {
    pub token: String,
    pub symbol: String,
    pub current_price: Option<f64>,
    pub change_5m: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_6h: Option<f64>,
    pub change_24h: Option<f64>,
    pub smas: BTreeMap<String, f64>,
    pub samples: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DatabaseStatus {
    pub running: bool,
    pub tracked_tokens: usize,
    pub total_samples: usize,
    pub active_triggers: usize,
    pub total_triggers: usize,
    pub last_update: Option<DateTime<Utc>>,
}

pub struct PriceDatabase {
    sampler: Arc<PriceSampler>,
    config: SamplerConfig,
    series: Arc<RwLock<HashMap<String, PriceSeries>>>,
    triggers: Arc<RwLock<HashMap<String, PriceTrigger>>>,
    ledger: Option<Arc<PositionLedger>>,
    db_path: Option<PathBuf>,
    triggers_path: Option<PathBuf>,
    last_update: RwLock<Option<DateTime<Utc>>>,
    last_sma: RwLock<Option<DateTime<Utc>>>,
    shutdown: CancellationToken,
    running: RwLock<bool>,
}

impl PriceDatabase {
    pub fn new(sampler: Arc<PriceSampler>, config: SamplerConfig) -> Self {
        Self {
            sampler,
            config,
            series: Arc::new(RwLock::new(HashMap::new())),
            triggers: Arc::new(RwLock::new(HashMap::new())),
            ledger: None,
            db_path: None,
            triggers_path: None,
            last_update: RwLock::new(None),
            last_sma: RwLock::new(None),
            shutdown: CancellationToken::new(),
            running: RwLock::new(false),
        }
    }

    pub fn with_paths(mut self, db_path: PathBuf, triggers_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self.triggers_path = Some(triggers_path);
        self
    }

    /// Mark open positions with every fresh price
    pub fn with_ledger(mut self, ledger: Arc<PositionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn sampler(&self) -> &Arc<PriceSampler> {
        &self.sampler
    }

    pub async fn load(&self) -> Result<()> {
        if let Some(path) = &self.db_path {
            if let Some(loaded) = storage::load_json::<HashMap<String, PriceSeries>>(path).await? {
                for (token, series) in &loaded {
                    if let Some(latest) = series.latest() {
                        self.sampler.seed(token, latest.clone());
                    }
                }
                info!("Loaded price history for {} tokens", loaded.len());
                *self.series.write().await = loaded;
            }
        }

        if let Some(path) = &self.triggers_path {
            if let Some(loaded) = storage::load_json::<HashMap<String, PriceTrigger>>(path).await? {
                info!("Loaded {} price triggers", loaded.len());
                *self.triggers.write().await = loaded;
            }
        }

        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(path) = &self.db_path {
            let series = self.series.read().await;
            storage::save_json(path, &*series).await?;
        }
        self.save_triggers().await
    }

    async fn save_triggers(&self) -> Result<()> {
        if let Some(path) = &self.triggers_path {
            let triggers = self.triggers.read().await;
            storage::save_json(path, &*triggers).await?;
        }
        Ok(())
    }

    /// Start tracking a token; takes an initial sample. Tracking an already
    /// tracked token is a no-op.
    pub async fn add_token(&self, token: &str, symbol: &str) -> Result<PriceSeries> {
        let token = token.to_lowercase();
        if let Some(existing) = self.series.read().await.get(&token) {
            return Ok(existing.clone());
        }

        let sample = self.sampler.sample(&token).await?;
        let mut series = PriceSeries::new(&token, symbol);
        series.push(sample);

        info!("Tracking {} ({}) at {:.8}", symbol, token, series.current_price().unwrap_or(0.0));
        self.series.write().await.insert(token, series.clone());
        self.save().await?;
        Ok(series)
    }

    /// Stop tracking a token. Returns false if it was not tracked.
    pub async fn remove_token(&self, token: &str) -> Result<bool> {
        let token = token.to_lowercase();
        let removed = self.series.write().await.remove(&token).is_some();
        self.sampler.forget(&token);
        if removed {
            info!("Stopped tracking {}", token);
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.series.read().await.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    pub async fn is_tracked(&self, token: &str) -> bool {
        self.series.read().await.contains_key(&token.to_lowercase())
    }

    pub async fn series(&self, token: &str) -> Option<PriceSeries> {
        self.series.read().await.get(&token.to_lowercase()).cloned()
    }

    /// Append a sample taken elsewhere (e.g. by a strategy tick) to a
    /// tracked series. Older-than-latest samples are ignored.
    pub async fn record_sample(&self, token: &str, sample: crate::price::PriceSample) -> bool {
        let mut series = self.series.write().await;
        match series.get_mut(&token.to_lowercase()) {
            Some(s) => {
                let newer = s.latest().map_or(true, |l| sample.timestamp > l.timestamp);
                if newer {
                    s.push(sample);
                }
                newer
            }
            None => false,
        }
    }

    /// Sample every tracked token concurrently and fold the results in
    pub async fn update_all(&self) -> UpdateReport {
        let tokens = self.tokens().await;
        let mut report = UpdateReport::default();
        if tokens.is_empty() {
            return report;
        }

        let results = join_all(tokens.iter().map(|token| {
            let sampler = self.sampler.clone();
            async move { (token.clone(), sampler.sample(token).await) }
        }))
        .await;

        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(self.config.retention_secs as i64);
        let refresh_smas = {
            let last = *self.last_sma.read().await;
            last.map_or(true, |t| {
                now - t >= ChronoDuration::seconds(self.config.sma_interval_secs as i64)
            })
        };

        let mut marks = Vec::new();
        {
            let mut series = self.series.write().await;
            for (token, result) in results {
                match result {
                    Ok(sample) => {
                        if let Some(s) = series.get_mut(&token) {
                            let newer = s.latest().map_or(true, |l| sample.timestamp > l.timestamp);
                            if newer {
                                marks.push((token.clone(), sample.price));
                                s.push(sample);
                            }
                            report.updated += 1;
                        }
                    }
                    Err(e) => {
                        debug!("No fresh price for {}: {}", token, e);
                        report.failed += 1;
                    }
                }
            }

            for s in series.values_mut() {
                report.pruned += s.prune(cutoff);
                if refresh_smas {
                    s.recompute_smas(now, self.config.min_sma_samples);
                }
            }
        }

        if refresh_smas {
            *self.last_sma.write().await = Some(now);
            report.smas_refreshed = true;
        }

        for token in self.sampler.flagged_for_removal() {
            warn!(
                "Removing {} after {} consecutive failures",
                token,
                self.sampler.failure_count(&token)
            );
            match self.remove_token(&token).await {
                Ok(true) => report.removed.push(token),
                Ok(false) => self.sampler.forget(&token),
                Err(e) => error!("Failed to persist removal of {}: {}", token, e),
            }
        }

        if let Some(ledger) = &self.ledger {
            for (token, price) in &marks {
                ledger.mark_price(token, *price).await;
            }
        }

        *self.last_update.write().await = Some(now);
        debug!(
            "Price update: {} updated, {} failed, {} pruned",
            report.updated, report.failed, report.pruned
        );
        report
    }

    /// Run `update_all` and trigger checks on a timer until `stop`
    pub async fn start(self: &Arc<Self>, fired_tx: mpsc::Sender<TriggerFire>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(Error::Internal("price database already running".into()));
            }
            *running = true;
        }

        info!(
            "Starting price database with {}ms update interval",
            self.config.update_interval_ms
        );

        let db = self.clone();
        let shutdown = self.shutdown.clone();
        let update_every = Duration::from_millis(self.config.update_interval_ms);
        let save_every = Duration::from_secs(self.config.save_interval_secs.max(1));

        tokio::spawn(async move {
            let mut update_timer = interval(update_every);
            update_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut save_timer = interval(save_every);
            save_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = update_timer.tick() => {
                        db.update_all().await;

                        for fire in db.check_triggers().await {
                            let id = fire.trigger.id.clone();
                            if fired_tx.send(fire).await.is_err() {
                                debug!("Trigger channel closed");
                                db.release_trigger(&id).await;
                            }
                        }
                    }
                    _ = save_timer.tick() => {
                        if let Err(e) = db.save().await {
                            error!("Failed to save price database: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Price database shutting down");
                        break;
                    }
                }
            }

            if let Err(e) = db.save().await {
                error!("Failed to save price database: {}", e);
            }
            *db.running.write().await = false;
        });

        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn price_stats(&self, token: &str) -> Option<PriceStats> {
        let series = self.series(token).await?;
        let now = Utc::now();
        Some(PriceStats {
            token: series.token.clone(),
            symbol: series.symbol.clone(),
            current_price: series.current_price(),
            change_5m: series.change_pct(now, SmaWindow::FiveMinutes.duration()),
            change_1h: series.change_pct(now, SmaWindow::OneHour.duration()),
            change_6h: series.change_pct(now, SmaWindow::SixHours.duration()),
            change_24h: series.change_24h,
            smas: series.smas.clone(),
            samples: series.len(),
            last_update: series.latest().map(|s| s.timestamp),
        })
    }

    pub async fn create_trigger(&self, params: TriggerParams) -> Result<PriceTrigger> {
        if !self.is_tracked(&params.token).await {
            self.add_token(&params.token, &params.symbol).await?;
        }

        let trigger = PriceTrigger::new(params)?;
        info!(
            "Created trigger {} ({} {} {}%)",
            trigger.id, trigger.action, trigger.condition, trigger.threshold_pct
        );
        self.triggers
            .write()
            .await
            .insert(trigger.id.clone(), trigger.clone());
        self.save_triggers().await?;
        Ok(trigger)
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<PriceTrigger> {
        let removed = self
            .triggers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::TriggerNotFound(id.to_string()))?;
        self.save_triggers().await?;
        Ok(removed)
    }

    pub async fn list_triggers(&self) -> Vec<PriceTrigger> {
        let mut all: Vec<PriceTrigger> = self.triggers.read().await.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        all
    }

    /// Evaluate every active trigger against its series. A trigger that
    /// fires stays pending until its execution is recorded or released.
    pub async fn check_triggers(&self) -> Vec<TriggerFire> {
        let now = Utc::now();
        let series = self.series.read().await;
        let mut triggers = self.triggers.write().await;
        let mut fired = Vec::new();

        for trigger in triggers.values_mut().filter(|t| t.can_fire()) {
            trigger.last_checked = Some(now);
            let Some(s) = series.get(&trigger.token) else {
                continue;
            };
            if let Some(details) = trigger.evaluate(s, now) {
                info!("Trigger {} fired: {}", trigger.name, details);
                trigger.in_flight = true;
                fired.push(TriggerFire {
                    trigger: trigger.clone(),
                    price: s.current_price().unwrap_or(0.0),
                    details,
                });
            }
        }

        fired
    }

    /// Re-check a fired trigger right before executing it. Fails with
    /// `TriggerSpent` once it is inactive or at its limit.
    pub async fn claim_trigger(&self, id: &str) -> Result<PriceTrigger> {
        let mut triggers = self.triggers.write().await;
        let trigger = triggers
            .get_mut(id)
            .ok_or_else(|| Error::TriggerNotFound(id.to_string()))?;
        if !trigger.is_active || trigger.trigger_count >= trigger.max_triggers {
            trigger.in_flight = false;
            return Err(Error::TriggerSpent(id.to_string()));
        }
        trigger.in_flight = true;
        Ok(trigger.clone())
    }

    /// Clear the pending mark after a failed execution so it can fire again
    pub async fn release_trigger(&self, id: &str) {
        if let Some(trigger) = self.triggers.write().await.get_mut(id) {
            trigger.in_flight = false;
        }
    }

    /// Count an executed fire against its trigger's limit
    pub async fn record_trigger_execution(&self, id: &str) -> Result<PriceTrigger> {
        let updated = {
            let mut triggers = self.triggers.write().await;
            let trigger = triggers
                .get_mut(id)
                .ok_or_else(|| Error::TriggerNotFound(id.to_string()))?;
            trigger.record_execution();
            if !trigger.is_active {
                info!("Trigger {} reached its limit and was deactivated", trigger.name);
            }
            trigger.clone()
        };
        self.save_triggers().await?;
        Ok(updated)
    }

    pub async fn status(&self) -> DatabaseStatus {
        let series = self.series.read().await;
        let triggers = self.triggers.read().await;
        DatabaseStatus {
            running: *self.running.read().await,
            tracked_tokens: series.len(),
            total_samples: series.values().map(|s| s.len()).sum(),
            active_triggers: triggers.values().filter(|t| t.is_active).count(),
            total_triggers: triggers.len(),
            last_update: *self.last_update.read().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TradeSide;
    use crate::price::sampler::tests::ScriptedQuotes;
    use crate::price::PriceSample;
    use crate::trigger::TriggerCondition;
    use tempfile::tempdir;

    fn database(quotes: Arc<ScriptedQuotes>, max_failures: u32) -> PriceDatabase {
        let config = SamplerConfig {
            max_consecutive_failures: max_failures,
            ..SamplerConfig::default()
        };
        let sampler = Arc::new(PriceSampler::new(quotes, "0xbase", &config));
        PriceDatabase::new(sampler, config)
    }

    fn drop_trigger(token: &str) -> TriggerParams {
        TriggerParams {
            name: "dip".into(),
            token: token.into(),
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
        }
    }

    #[tokio::test]
    async fn test_add_update_remove() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(2.0));
        let db = database(quotes.clone(), 10);

        db.add_token("0xAAA", "AAA").await.unwrap();
        assert_eq!(db.tokens().await, vec!["0xaaa".to_string()]);

        quotes.set("0xaaa", Ok(2.2));
        let report = db.update_all().await;
        assert_eq!(report.updated, 1);
        assert!(report.smas_refreshed);

        let series = db.series("0xaaa").await.unwrap();
        assert_eq!(series.current_price(), Some(2.2));
        assert_eq!(series.len(), 2);

        assert!(db.remove_token("0xaaa").await.unwrap());
        assert!(!db.remove_token("0xaaa").await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_token_is_removed() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xbad", Ok(1.0));
        let db = database(quotes.clone(), 2);
        db.add_token("0xbad", "BAD").await.unwrap();

        // Seeded cache is served while fresh, but failures still count
        quotes.set("0xbad", Err(Error::NoRoute("gone".into())));
        let first = db.update_all().await;
        assert!(first.removed.is_empty());

        let second = db.update_all().await;
        assert_eq!(second.removed, vec!["0xbad".to_string()]);
        assert!(db.tokens().await.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_fires_once_then_deactivates() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(2.0));
        let db = database(quotes, 10);
        db.add_token("0xaaa", "AAA").await.unwrap();

        let trigger = db.create_trigger(drop_trigger("0xaaa")).await.unwrap();
        assert!(db.check_triggers().await.is_empty());

        let now = Utc::now();
        {
            let mut series = db.series.write().await;
            let s = series.get_mut("0xaaa").unwrap();
            s.samples.clear();
            s.push(PriceSample {
                timestamp: now - ChronoDuration::hours(1),
                price: 2.0,
                source: "test".into(),
            });
            s.push(PriceSample {
                timestamp: now,
                price: 1.7,
                source: "test".into(),
            });
        }

        let fired = db.check_triggers().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].trigger.id, trigger.id);
        assert_eq!(fired[0].price, 1.7);

        // Pending fire is not queued a second time
        assert!(db.check_triggers().await.is_empty());

        let updated = db.record_trigger_execution(&trigger.id).await.unwrap();
        assert!(!updated.is_active);
        assert!(db.check_triggers().await.is_empty());
        assert!(matches!(
            db.claim_trigger(&trigger.id).await,
            Err(Error::TriggerSpent(_))
        ));

        db.delete_trigger(&trigger.id).await.unwrap();
        assert!(matches!(
            db.delete_trigger(&trigger.id).await,
            Err(Error::TriggerNotFound(_))
        ));
    }

    async fn force_drop(db: &PriceDatabase, token: &str) {
        let now = Utc::now();
        let mut series = db.series.write().await;
        let s = series.get_mut(token).unwrap();
        s.samples.clear();
        s.push(PriceSample {
            timestamp: now - ChronoDuration::minutes(30),
            price: 2.0,
            source: "test".into(),
        });
        s.push(PriceSample {
            timestamp: now,
            price: 1.5,
            source: "test".into(),
        });
    }

    #[tokio::test]
    async fn test_released_trigger_fires_again() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(2.0));
        let db = database(quotes, 10);
        db.add_token("0xaaa", "AAA").await.unwrap();

        let mut params = drop_trigger("0xaaa");
        params.max_triggers = 2;
        let trigger = db.create_trigger(params).await.unwrap();
        force_drop(&db, "0xaaa").await;

        assert_eq!(db.check_triggers().await.len(), 1);
        assert!(db.check_triggers().await.is_empty());

        // Failed execution hands it back without using up a fire
        let claimed = db.claim_trigger(&trigger.id).await.unwrap();
        assert_eq!(claimed.trigger_count, 0);
        db.release_trigger(&trigger.id).await;
        assert_eq!(db.check_triggers().await.len(), 1);

        db.claim_trigger(&trigger.id).await.unwrap();
        let updated = db.record_trigger_execution(&trigger.id).await.unwrap();
        assert_eq!(updated.trigger_count, 1);
        assert!(updated.is_active);
        assert!(!updated.in_flight);
        assert_eq!(db.check_triggers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_smas_refresh_on_interval() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(2.0));
        let db = database(quotes.clone(), 10);
        db.add_token("0xaaa", "AAA").await.unwrap();

        let now = Utc::now();
        {
            let mut series = db.series.write().await;
            let s = series.get_mut("0xaaa").unwrap();
            s.samples.clear();
            for secs in [120, 90, 60] {
                s.push(PriceSample {
                    timestamp: now - ChronoDuration::seconds(secs),
                    price: 2.0,
                    source: "test".into(),
                });
            }
        }

        let first = db.update_all().await;
        assert!(first.smas_refreshed);
        let sma_5min = |s: &PriceSeries| s.smas.get("5min").copied();
        assert_eq!(sma_5min(&db.series("0xaaa").await.unwrap()), Some(2.0));

        // Inside the interval new samples land but averages stay put
        quotes.set("0xaaa", Ok(4.0));
        let second = db.update_all().await;
        assert!(!second.smas_refreshed);
        let series = db.series("0xaaa").await.unwrap();
        assert_eq!(series.current_price(), Some(4.0));
        assert_eq!(sma_5min(&series), Some(2.0));

        *db.last_sma.write().await = Some(Utc::now() - ChronoDuration::seconds(301));
        let third = db.update_all().await;
        assert!(third.smas_refreshed);
        let refreshed = sma_5min(&db.series("0xaaa").await.unwrap()).unwrap();
        assert!(refreshed > 2.0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(3.0));

        let db = database(quotes.clone(), 10).with_paths(
            dir.path().join("price-database.json"),
            dir.path().join("price-triggers.json"),
        );
        db.add_token("0xaaa", "AAA").await.unwrap();
        db.create_trigger(drop_trigger("0xaaa")).await.unwrap();

        let reloaded = database(quotes, 10).with_paths(
            dir.path().join("price-database.json"),
            dir.path().join("price-triggers.json"),
        );
        reloaded.load().await.unwrap();

        let status = reloaded.status().await;
        assert_eq!(status.tracked_tokens, 1);
        assert_eq!(status.total_triggers, 1);
        assert_eq!(status.active_triggers, 1);

        let stats = reloaded.price_stats("0xaaa").await.unwrap();
        assert_eq!(stats.current_price, Some(3.0));
        assert_eq!(stats.symbol, "AAA");
    }
}
