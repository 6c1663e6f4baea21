//! Standalone price triggers
//!
//! A trigger watches one tracked token and fires a fixed-size buy or sell
//! when its condition holds. It deactivates after `max_triggers` executions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::execution::TradeSide;
use crate::price::{PriceSeries, SmaWindow};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Change over the timeframe is at or below -threshold %
    PriceDrop,
    /// Change over the timeframe is at or above threshold %
    PriceRise,
    /// Price is at least threshold % under the SMA
    BelowSma,
    /// Price is at least threshold % over the SMA
    AboveSma,
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerCondition::PriceDrop => "price_drop",
            TriggerCondition::PriceRise => "price_rise",
            TriggerCondition::BelowSma => "below_sma",
            TriggerCondition::AboveSma => "above_sma",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerCondition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "price_drop" | "drop" => Ok(TriggerCondition::PriceDrop),
            "price_rise" | "rise" => Ok(TriggerCondition::PriceRise),
            "below_sma" => Ok(TriggerCondition::BelowSma),
            "above_sma" => Ok(TriggerCondition::AboveSma),
            other => Err(Error::Config(format!("Unknown trigger condition: {}", other))),
        }
    }
}

/// Parameters for a new trigger
#[derive(Debug, Clone)]
pub struct TriggerParams {
    pub name: String,
    pub token: String,
    pub symbol: String,
    pub wallet: String,
    pub action: TradeSide,
    pub condition: TriggerCondition,
    pub threshold_pct: f64,
    /// Lookback for price_drop / price_rise
    pub timeframe_ms: u64,
    /// Average used by below_sma / above_sma
    pub sma_window: SmaWindow,
    /// Base amount for buys, token amount for sells
    pub amount: f64,
    pub max_slippage_pct: f64,
    pub max_triggers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTrigger {
    pub id: String,
    pub name: String,
    pub token: String,
    pub symbol: String,
    pub wallet: String,
    pub action: TradeSide,
    pub condition: TriggerCondition,
    pub threshold_pct: f64,
    pub timeframe_ms: u64,
    pub sma_window: SmaWindow,
    pub amount: f64,
    pub max_slippage_pct: f64,
    pub is_active: bool,
    pub trigger_count: u32,
    pub max_triggers: u32,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_triggered: Option<DateTime<Utc>>,
    /// A fire is queued or executing; not re-fired until it settles
    #[serde(skip)]
    pub in_flight: bool,
}

impl PriceTrigger {
    pub fn new(params: TriggerParams) -> Result<Self> {
        if params.threshold_pct <= 0.0 {
            return Err(Error::Config("Trigger threshold must be positive".into()));
        }
        if params.amount <= 0.0 {
            return Err(Error::InvalidAmount(params.amount.to_string()));
        }
        if params.max_triggers == 0 {
            return Err(Error::Config("max_triggers must be at least 1".into()));
        }

        Ok(Self {
            id: format!("trigger_{}", uuid::Uuid::new_v4().simple()),
            name: params.name,
            token: params.token.to_lowercase(),
            symbol: params.symbol,
            wallet: params.wallet,
            action: params.action,
            condition: params.condition,
            threshold_pct: params.threshold_pct.abs(),
            timeframe_ms: params.timeframe_ms,
            sma_window: params.sma_window,
            amount: params.amount,
            max_slippage_pct: params.max_slippage_pct,
            is_active: true,
            trigger_count: 0,
            max_triggers: params.max_triggers,
            created_at: Utc::now(),
            last_checked: None,
            last_triggered: None,
            in_flight: false,
        })
    }

    /// Check the condition against a series. Returns a description when it
    /// holds, `None` otherwise or when data is missing.
    pub fn evaluate(&self, series: &PriceSeries, now: DateTime<Utc>) -> Option<String> {
        let current = series.current_price()?;

        match self.condition {
            TriggerCondition::PriceDrop => {
                let change = series.change_pct(now, Duration::milliseconds(self.timeframe_ms as i64))?;
                (-change >= self.threshold_pct).then(|| {
                    format!("Price dropped {:.2}% (need {}%)", -change, self.threshold_pct)
                })
            }
            TriggerCondition::PriceRise => {
                let change = series.change_pct(now, Duration::milliseconds(self.timeframe_ms as i64))?;
                (change >= self.threshold_pct).then(|| {
                    format!("Price rose {:.2}% (need {}%)", change, self.threshold_pct)
                })
            }
            TriggerCondition::BelowSma => {
                let sma = series.sma(self.sma_window).filter(|s| *s > 0.0)?;
                let below = (sma - current) / sma * 100.0;
                (below >= self.threshold_pct).then(|| {
                    format!(
                        "Price {:.2}% below {} SMA (need {}%)",
                        below, self.sma_window, self.threshold_pct
                    )
                })
            }
            TriggerCondition::AboveSma => {
                let sma = series.sma(self.sma_window).filter(|s| *s > 0.0)?;
                let above = (current - sma) / sma * 100.0;
                (above >= self.threshold_pct).then(|| {
                    format!(
                        "Price {:.2}% above {} SMA (need {}%)",
                        above, self.sma_window, self.threshold_pct
                    )
                })
            }
        }
    }

    /// Active, below its limit and not already pending
    pub fn can_fire(&self) -> bool {
        self.is_active && !self.in_flight && self.trigger_count < self.max_triggers
    }

    /// Count a successful execution; deactivates at the limit
    pub fn record_execution(&mut self) {
        self.in_flight = false;
        self.trigger_count += 1;
        self.last_triggered = Some(Utc::now());
        if self.trigger_count >= self.max_triggers {
            self.is_active = false;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_triggers.saturating_sub(self.trigger_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::PriceSample;

    fn params(condition: TriggerCondition, threshold: f64) -> TriggerParams {
        TriggerParams {
            name: "t".into(),
            token: "0xAAA".into(),
            symbol: "AAA".into(),
            wallet: "main".into(),
            action: TradeSide::Buy,
            condition,
            threshold_pct: threshold,
            timeframe_ms: 300_000,
            sma_window: SmaWindow::OneHour,
            amount: 1.0,
            max_slippage_pct: 1.0,
            max_triggers: 2,
        }
    }

    fn series(now: DateTime<Utc>, prices: &[(i64, f64)]) -> PriceSeries {
        let mut series = PriceSeries::new("0xaaa", "AAA");
        for (secs_ago, price) in prices {
            series.push(PriceSample {
                timestamp: now - Duration::seconds(*secs_ago),
                price: *price,
                source: "test".into(),
            });
        }
        series
    }

    #[test]
    fn test_price_drop() {
        let now = Utc::now();
        let trigger = PriceTrigger::new(params(TriggerCondition::PriceDrop, 10.0)).unwrap();

        let s = series(now, &[(300, 2.0), (0, 1.81)]);
        assert!(trigger.evaluate(&s, now).is_none());

        let s = series(now, &[(300, 2.0), (0, 1.79)]);
        assert!(trigger.evaluate(&s, now).is_some());
    }

    #[test]
    fn test_price_rise() {
        let now = Utc::now();
        let trigger = PriceTrigger::new(params(TriggerCondition::PriceRise, 5.0)).unwrap();
        let s = series(now, &[(300, 1.0), (0, 1.06)]);
        assert!(trigger.evaluate(&s, now).is_some());
    }

    #[test]
    fn test_sma_conditions_need_published_average() {
        let now = Utc::now();
        let below = PriceTrigger::new(params(TriggerCondition::BelowSma, 10.0)).unwrap();
        let above = PriceTrigger::new(params(TriggerCondition::AboveSma, 10.0)).unwrap();

        let mut s = series(now, &[(120, 1.0), (60, 1.0), (0, 0.85)]);
        assert!(below.evaluate(&s, now).is_none());

        s.smas.insert("1hour".into(), 1.0);
        assert!(below.evaluate(&s, now).is_some());
        assert!(above.evaluate(&s, now).is_none());
    }

    #[test]
    fn test_deactivates_at_max_triggers() {
        let mut trigger = PriceTrigger::new(params(TriggerCondition::PriceDrop, 10.0)).unwrap();
        trigger.record_execution();
        assert!(trigger.is_active);
        assert_eq!(trigger.remaining(), 1);
        trigger.record_execution();
        assert!(!trigger.is_active);
        assert!(!trigger.can_fire());
    }

    #[test]
    fn test_pending_trigger_cannot_fire() {
        let mut trigger = PriceTrigger::new(params(TriggerCondition::PriceDrop, 10.0)).unwrap();
        assert!(trigger.can_fire());
        trigger.in_flight = true;
        assert!(!trigger.can_fire());
        trigger.record_execution();
        assert!(trigger.can_fire());
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(PriceTrigger::new(params(TriggerCondition::PriceDrop, 0.0)).is_err());
        let mut p = params(TriggerCondition::PriceDrop, 5.0);
        p.max_triggers = 0;
        assert!(PriceTrigger::new(p).is_err());
    }
}
