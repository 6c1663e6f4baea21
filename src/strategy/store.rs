//! Strategy definitions and running statistics, persisted as one file

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage;
use crate::strategy::types::{NewStrategy, RangeProgress, StrategyConfig, StrategyRecord};

/// Totals across all strategies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategySummary {
    pub strategies: usize,
    pub active: usize,
    pub total_trades: u32,
    pub successful_trades: u32,
    pub total_profit: f64,
}

impl StrategySummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.successful_trades as f64 / self.total_trades as f64 * 100.0
    }
}

pub struct StrategyStore {
    strategies: RwLock<HashMap<String, StrategyRecord>>,
    path: Option<PathBuf>,
    max_slippage_pct: f64,
}

impl StrategyStore {
    pub fn new(path: Option<PathBuf>, max_slippage_pct: f64) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            path,
            max_slippage_pct,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(loaded) = storage::load_json::<HashMap<String, StrategyRecord>>(path).await? {
            let mut guard = self.strategies.write().await;
            *guard = loaded;
            info!("Loaded {} strategies from {}", guard.len(), path.display());
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let guard = self.strategies.read().await;
            storage::save_json(path, &*guard).await?;
            debug!("Saved {} strategies", guard.len());
        }
        Ok(())
    }

    pub async fn create(&self, new: NewStrategy) -> Result<StrategyConfig> {
        let config = StrategyConfig::from_new(new, self.max_slippage_pct)?;
        {
            let mut guard = self.strategies.write().await;
            guard.insert(
                config.id.clone(),
                StrategyRecord {
                    config: config.clone(),
                    stats: Default::default(),
                },
            );
        }
        info!(
            "Strategy created: {} ({}) dip {}% profit {}",
            config.name, config.id, config.dip_threshold_pct, config.profit
        );
        self.save().await?;
        Ok(config)
    }

    pub async fn get(&self, id: &str) -> Result<StrategyRecord> {
        self.strategies
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::StrategyNotFound(id.to_string()))
    }

    /// Resolve a full id, a unique id prefix or an exact name
    pub async fn resolve(&self, key: &str) -> Result<String> {
        let guard = self.strategies.read().await;
        if guard.contains_key(key) {
            return Ok(key.to_string());
        }
        let matches: Vec<&String> = guard
            .iter()
            .filter(|(id, r)| id.starts_with(key) || r.config.name.eq_ignore_ascii_case(key))
            .map(|(id, _)| id)
            .collect();
        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            _ => Err(Error::StrategyNotFound(key.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<StrategyRecord> {
        let mut all: Vec<StrategyRecord> = self.strategies.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.config.created_at);
        all
    }

    /// Flip the active flag. Activating an active strategy is an error.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<StrategyConfig> {
        let config = {
            let mut guard = self.strategies.write().await;
            let record = guard
                .get_mut(id)
                .ok_or_else(|| Error::StrategyNotFound(id.to_string()))?;
            if active && record.config.is_active {
                return Err(Error::StrategyActive(record.config.name.clone()));
            }
            record.config.is_active = active;
            record.config.clone()
        };
        self.save().await?;
        Ok(config)
    }

    /// Remove a stopped strategy
    pub async fn delete(&self, id: &str) -> Result<StrategyRecord> {
        let removed = {
            let mut guard = self.strategies.write().await;
            match guard.get(id) {
                None => return Err(Error::StrategyNotFound(id.to_string())),
                Some(r) if r.config.is_active => {
                    return Err(Error::StrategyActive(r.config.name.clone()))
                }
                Some(_) => {}
            }
            guard.remove(id)
        };
        self.save().await?;
        removed.ok_or_else(|| Error::StrategyNotFound(id.to_string()))
    }

    async fn update<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut StrategyRecord),
    {
        {
            let mut guard = self.strategies.write().await;
            let record = guard
                .get_mut(id)
                .ok_or_else(|| Error::StrategyNotFound(id.to_string()))?;
            f(record);
        }
        self.save().await
    }

    /// A tick ran to completion
    pub async fn record_check(&self, id: &str) -> Result<()> {
        let mut guard = self.strategies.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| Error::StrategyNotFound(id.to_string()))?;
        record.stats.checks_performed += 1;
        record.stats.last_checked = Some(Utc::now());
        Ok(())
    }

    /// A dip buy executed; the profit range restarts from the new holding
    pub async fn record_entry(&self, id: &str, held_tokens: f64) -> Result<()> {
        self.update(id, |r| {
            r.stats.total_trades += 1;
            r.stats.last_executed = Some(Utc::now());
            r.stats.range = RangeProgress {
                basis_tokens: held_tokens,
                steps_done: Vec::new(),
            };
        })
        .await
    }

    /// An exit executed. `closed_all` resets range progress, otherwise the
    /// completed steps are remembered.
    pub async fn record_exit(&self, id: &str, realized_pnl: f64, steps: &[usize], closed_all: bool) -> Result<()> {
        self.update(id, |r| {
            r.stats.total_exits += 1;
            r.stats.total_profit += realized_pnl;
            if realized_pnl > 0.0 {
                r.stats.successful_trades += 1;
            }
            r.stats.last_executed = Some(Utc::now());
            if closed_all {
                r.stats.range = RangeProgress::default();
            } else {
                r.stats.range.steps_done.extend_from_slice(steps);
            }
        })
        .await
    }

    pub async fn record_failure(&self, id: &str) -> Result<()> {
        self.update(id, |r| r.stats.failed_trades += 1).await
    }

    pub async fn statistics(&self) -> StrategySummary {
        let guard = self.strategies.read().await;
        guard.values().fold(StrategySummary::default(), |mut s, r| {
            s.strategies += 1;
            if r.config.is_active {
                s.active += 1;
            }
            s.total_trades += r.stats.total_trades;
            s.successful_trades += r.stats.successful_trades;
            s.total_profit += r.stats.total_profit;
            s
        })
    }
}
