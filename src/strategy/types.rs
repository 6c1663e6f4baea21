//! Strategy definitions and statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::StrategyDefaults;
use crate::error::{Error, Result};

/// How profit-range sells are spread over the steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepDistribution {
    /// Equal slices
    #[default]
    Linear,
    /// Larger slices on the early steps
    Aggressive,
    /// Larger slices on the late steps
    Conservative,
}

impl fmt::Display for StepDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepDistribution::Linear => "linear",
            StepDistribution::Aggressive => "aggressive",
            StepDistribution::Conservative => "conservative",
        };
        f.write_str(s)
    }
}

impl FromStr for StepDistribution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(StepDistribution::Linear),
            "aggressive" => Ok(StepDistribution::Aggressive),
            "conservative" => Ok(StepDistribution::Conservative),
            other => Err(Error::Config(format!("Unknown step distribution: {}", other))),
        }
    }
}

/// Exit rule on the profit side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProfitMode {
    /// Sell everything once the gain over average cost reaches the target
    Simple { target_pct: f64 },
    /// Sell in steps spread between `min_pct` and `max_pct`
    Range {
        min_pct: f64,
        max_pct: f64,
        steps: u32,
        distribution: StepDistribution,
    },
}

impl ProfitMode {
    /// Lowest gain that triggers any sell
    pub fn first_target_pct(&self) -> f64 {
        match self {
            ProfitMode::Simple { target_pct } => *target_pct,
            ProfitMode::Range { min_pct, .. } => *min_pct,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ProfitMode::Simple { target_pct } if *target_pct <= 0.0 => {
                Err(Error::Config("Profit target must be positive".into()))
            }
            ProfitMode::Range {
                min_pct,
                max_pct,
                steps,
                ..
            } => {
                if *min_pct <= 0.0 || max_pct < min_pct {
                    return Err(Error::Config(format!(
                        "Invalid profit range {}%..{}%",
                        min_pct, max_pct
                    )));
                }
                if !(2..=5).contains(steps) {
                    return Err(Error::Config("Profit range needs 2 to 5 steps".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ProfitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfitMode::Simple { target_pct } => write!(f, "{}%", target_pct),
            ProfitMode::Range {
                min_pct,
                max_pct,
                steps,
                distribution,
            } => write!(f, "{}%-{}% in {} {} steps", min_pct, max_pct, steps, distribution),
        }
    }
}

/// User input for a new strategy
#[derive(Debug, Clone)]
pub struct NewStrategy {
    pub name: Option<String>,
    pub token: String,
    pub symbol: String,
    pub wallet: String,
    pub dip_threshold_pct: f64,
    pub profit: ProfitMode,
    pub stop_loss_pct: Option<f64>,
    pub trade_amount: f64,
    pub max_slippage_pct: f64,
    pub check_interval_ms: u64,
    pub dip_timeframe_ms: u64,
    pub max_entries: u32,
}

impl NewStrategy {
    /// Start from configured defaults
    pub fn with_defaults(
        defaults: &StrategyDefaults,
        token: impl Into<String>,
        symbol: impl Into<String>,
        wallet: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            token: token.into(),
            symbol: symbol.into(),
            wallet: wallet.into(),
            dip_threshold_pct: defaults.dip_threshold_pct,
            profit: ProfitMode::Simple {
                target_pct: defaults.profit_target_pct,
            },
            stop_loss_pct: None,
            trade_amount: defaults.trade_amount,
            max_slippage_pct: defaults.max_slippage_pct,
            check_interval_ms: defaults.check_interval_ms,
            dip_timeframe_ms: defaults.dip_timeframe_ms,
            max_entries: defaults.max_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub name: String,
    pub token: String,
    pub symbol: String,
    pub wallet: String,
    pub dip_threshold_pct: f64,
    pub profit: ProfitMode,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    /// Base currency spent per entry
    pub trade_amount: f64,
    pub max_slippage_pct: f64,
    pub check_interval_ms: u64,
    pub dip_timeframe_ms: u64,
    pub max_entries: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl StrategyConfig {
    pub fn from_new(new: NewStrategy, max_slippage_pct: f64) -> Result<Self> {
        let config = Self {
            id: format!("strategy_{}", uuid::Uuid::new_v4().simple()),
            name: new
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Strategy for {}", new.symbol)),
            token: new.token.to_lowercase(),
            symbol: new.symbol,
            wallet: new.wallet,
            dip_threshold_pct: new.dip_threshold_pct,
            profit: new.profit,
            stop_loss_pct: new.stop_loss_pct,
            trade_amount: new.trade_amount,
            max_slippage_pct: new.max_slippage_pct,
            check_interval_ms: new.check_interval_ms,
            dip_timeframe_ms: new.dip_timeframe_ms,
            max_entries: new.max_entries,
            is_active: false,
            created_at: Utc::now(),
        };
        config.validate(max_slippage_pct)?;
        Ok(config)
    }

    pub fn validate(&self, max_slippage_pct: f64) -> Result<()> {
        if self.dip_threshold_pct <= 0.0 || self.dip_threshold_pct >= 100.0 {
            return Err(Error::Config("Dip threshold must be in (0, 100)".into()));
        }
        self.profit.validate()?;
        if let Some(sl) = self.stop_loss_pct {
            if sl <= 0.0 || sl >= 100.0 {
                return Err(Error::Config("Stop loss must be in (0, 100)".into()));
            }
        }
        if self.trade_amount <= 0.0 {
            return Err(Error::InvalidAmount(self.trade_amount.to_string()));
        }
        if self.max_slippage_pct <= 0.0 || self.max_slippage_pct > max_slippage_pct {
            return Err(Error::SlippageTooHigh {
                requested: self.max_slippage_pct,
                max: max_slippage_pct,
            });
        }
        if self.check_interval_ms == 0 || self.dip_timeframe_ms == 0 {
            return Err(Error::Config("Intervals must be non-zero".into()));
        }
        if self.max_entries == 0 {
            return Err(Error::Config("max_entries must be at least 1".into()));
        }
        Ok(())
    }
}

/// Progress through the profit-range steps of the current holding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeProgress {
    /// Tokens held when the range started; step fractions apply to this
    pub basis_tokens: f64,
    pub steps_done: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Executed entries
    pub total_trades: u32,
    /// Exits that realised a profit
    pub successful_trades: u32,
    pub total_exits: u32,
    pub failed_trades: u32,
    pub total_profit: f64,
    pub last_executed: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub checks_performed: u64,
    #[serde(default)]
    pub range: RangeProgress,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.successful_trades as f64 / self.total_trades as f64 * 100.0
    }
}

/// Persisted unit: definition plus running statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub config: StrategyConfig,
    #[serde(default)]
    pub stats: StrategyStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_strategy() -> NewStrategy {
        NewStrategy::with_defaults(&StrategyDefaults::default(), "0xAbC", "ORO", "main")
    }

    #[test]
    fn test_defaults_and_name() {
        let config = StrategyConfig::from_new(new_strategy(), 10.0).unwrap();
        assert_eq!(config.name, "Strategy for ORO");
        assert_eq!(config.token, "0xabc");
        assert_eq!(config.dip_threshold_pct, 15.0);
        assert_eq!(config.max_entries, 3);
        assert!(!config.is_active);
        assert!(config.id.starts_with("strategy_"));
    }

    #[test]
    fn test_validation() {
        let mut new = new_strategy();
        new.max_slippage_pct = 20.0;
        assert!(matches!(
            StrategyConfig::from_new(new, 10.0),
            Err(Error::SlippageTooHigh { .. })
        ));

        let mut new = new_strategy();
        new.profit = ProfitMode::Range {
            min_pct: 5.0,
            max_pct: 2.0,
            steps: 3,
            distribution: StepDistribution::Linear,
        };
        assert!(StrategyConfig::from_new(new, 10.0).is_err());

        let mut new = new_strategy();
        new.profit = ProfitMode::Range {
            min_pct: 2.0,
            max_pct: 8.0,
            steps: 6,
            distribution: StepDistribution::Linear,
        };
        assert!(StrategyConfig::from_new(new, 10.0).is_err());
    }

    #[test]
    fn test_profit_mode_serde() {
        let mode = ProfitMode::Range {
            min_pct: 1.0,
            max_pct: 5.0,
            steps: 3,
            distribution: StepDistribution::Aggressive,
        };
        let json = serde_json::to_string(&mode).unwrap();
        assert!(json.contains(r#""mode":"range""#));
        assert!(json.contains(r#""distribution":"aggressive""#));
        assert_eq!(serde_json::from_str::<ProfitMode>(&json).unwrap(), mode);
    }
}
