//! Buy / sell decision rules
//!
//! Pure functions over prices and the current holding. One strategy tick
//! maps to one call of [`evaluate`]: exits are considered before entries,
//! and the profit side before the stop loss.

use crate::strategy::{ProfitMode, RangeProgress, StepDistribution, StrategyConfig};

/// Float noise allowance at the inclusive boundaries
const EPSILON: f64 = 1e-9;

/// Minimum samples in the dip window before a dip is considered
pub const MIN_DIP_SAMPLES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct DipSignal {
    pub highest: f64,
    pub current: f64,
    pub drop_pct: f64,
}

/// Dip entry rule.
///
/// Fires iff the drop from the window high reaches `threshold_pct` and the
/// price is not above the existing average cost (never average up).
pub fn dip_signal(
    highest: Option<f64>,
    samples_in_window: usize,
    current: f64,
    threshold_pct: f64,
    average_cost: Option<f64>,
) -> Option<DipSignal> {
    if samples_in_window < MIN_DIP_SAMPLES {
        return None;
    }
    let highest = highest.filter(|h| *h > 0.0)?;
    let drop_pct = (highest - current) / highest * 100.0;

    if drop_pct + EPSILON < threshold_pct {
        return None;
    }
    if let Some(avg) = average_cost {
        if current > avg * (1.0 + EPSILON) {
            return None;
        }
    }

    Some(DipSignal {
        highest,
        current,
        drop_pct,
    })
}

/// Simple profit rule: `current >= average * (1 + target/100)`
pub fn profit_signal(average_cost: f64, current: f64, target_pct: f64) -> bool {
    average_cost > 0.0 && current >= average_cost * (1.0 + target_pct / 100.0) * (1.0 - EPSILON)
}

/// Stop loss rule: `current <= average * (1 - stop/100)`
pub fn stop_loss_signal(average_cost: f64, current: f64, stop_loss_pct: f64) -> bool {
    average_cost > 0.0 && current <= average_cost * (1.0 - stop_loss_pct / 100.0) * (1.0 + EPSILON)
}

/// One profit-range step
#[derive(Debug, Clone, PartialEq)]
pub struct RangeStep {
    pub index: usize,
    /// Gain over average cost that releases this step
    pub threshold_pct: f64,
    /// Share of the range basis sold by this step
    pub sell_fraction: f64,
}

/// Split a profit band into steps.
///
/// Thresholds are evenly spaced from `min_pct` to `max_pct`. Linear gives
/// every step the same share; aggressive weights steps `n, n-1, .., 1`;
/// conservative weights them `1, 2, .., n`. Shares sum to one.
pub fn range_steps(min_pct: f64, max_pct: f64, steps: u32, distribution: StepDistribution) -> Vec<RangeStep> {
    let n = steps.max(1) as usize;
    let weights: Vec<f64> = (0..n)
        .map(|i| match distribution {
            StepDistribution::Linear => 1.0,
            StepDistribution::Aggressive => (n - i) as f64,
            StepDistribution::Conservative => (i + 1) as f64,
        })
        .collect();
    let total: f64 = weights.iter().sum();

    (0..n)
        .map(|i| {
            let threshold_pct = if n == 1 {
                min_pct
            } else {
                min_pct + (max_pct - min_pct) * i as f64 / (n - 1) as f64
            };
            RangeStep {
                index: i,
                threshold_pct,
                sell_fraction: weights[i] / total,
            }
        })
        .collect()
}

/// Why a sell was decided
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    ProfitTarget { gain_pct: f64 },
    RangeSteps { steps: Vec<usize>, gain_pct: f64 },
    StopLoss { loss_pct: f64 },
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::ProfitTarget { .. } => "profit target",
            ExitReason::RangeSteps { .. } => "profit range",
            ExitReason::StopLoss { .. } => "stop loss",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold,
    Buy {
        amount_base: f64,
        signal: DipSignal,
    },
    /// `sell_all` closes the whole holding; otherwise sell `tokens`
    Sell {
        tokens: f64,
        sell_all: bool,
        reason: ExitReason,
    },
}

/// Everything one tick knows
#[derive(Debug, Clone)]
pub struct TickInput<'a> {
    pub config: &'a StrategyConfig,
    pub current: f64,
    /// Highest price within the dip timeframe
    pub highest_in_window: Option<f64>,
    pub samples_in_window: usize,
    /// Open positions of this strategy
    pub open_positions: usize,
    pub held_tokens: f64,
    pub average_cost: Option<f64>,
    pub range: &'a RangeProgress,
}

/// Decide buy / sell / hold for one tick
pub fn evaluate(input: &TickInput<'_>) -> Decision {
    let config = input.config;

    if let Some(avg) = input.average_cost.filter(|_| input.held_tokens > 0.0) {
        let gain_pct = (input.current - avg) / avg * 100.0;

        match &config.profit {
            ProfitMode::Simple { target_pct } => {
                if profit_signal(avg, input.current, *target_pct) {
                    return Decision::Sell {
                        tokens: input.held_tokens,
                        sell_all: true,
                        reason: ExitReason::ProfitTarget { gain_pct },
                    };
                }
            }
            ProfitMode::Range {
                min_pct,
                max_pct,
                steps,
                distribution,
            } => {
                if let Some(decision) = range_decision(input, avg, gain_pct, *min_pct, *max_pct, *steps, *distribution) {
                    return decision;
                }
            }
        }

        if let Some(stop) = config.stop_loss_pct {
            if stop_loss_signal(avg, input.current, stop) {
                return Decision::Sell {
                    tokens: input.held_tokens,
                    sell_all: true,
                    reason: ExitReason::StopLoss { loss_pct: -gain_pct },
                };
            }
        }
    }

    if input.open_positions >= config.max_entries as usize {
        return Decision::Hold;
    }

    match dip_signal(
        input.highest_in_window,
        input.samples_in_window,
        input.current,
        config.dip_threshold_pct,
        input.average_cost,
    ) {
        Some(signal) => Decision::Buy {
            amount_base: config.trade_amount,
            signal,
        },
        None => Decision::Hold,
    }
}

fn range_decision(
    input: &TickInput<'_>,
    avg: f64,
    gain_pct: f64,
    min_pct: f64,
    max_pct: f64,
    steps: u32,
    distribution: StepDistribution,
) -> Option<Decision> {
    let plan = range_steps(min_pct, max_pct, steps, distribution);
    let crossed: Vec<&RangeStep> = plan
        .iter()
        .filter(|s| !input.range.steps_done.contains(&s.index))
        .filter(|s| profit_signal(avg, input.current, s.threshold_pct))
        .collect();

    if crossed.is_empty() {
        return None;
    }

    let indices: Vec<usize> = crossed.iter().map(|s| s.index).collect();
    let remaining_after = plan
        .iter()
        .filter(|s| !input.range.steps_done.contains(&s.index) && !indices.contains(&s.index))
        .count();

    let reason = ExitReason::RangeSteps {
        steps: indices,
        gain_pct,
    };

    // The last outstanding step sells whatever is left
    if remaining_after == 0 {
        return Some(Decision::Sell {
            tokens: input.held_tokens,
            sell_all: true,
            reason,
        });
    }

    let basis = if input.range.basis_tokens > 0.0 {
        input.range.basis_tokens
    } else {
        input.held_tokens
    };
    let fraction: f64 = crossed.iter().map(|s| s.sell_fraction).sum();
    let tokens = (basis * fraction).min(input.held_tokens);

    Some(Decision::Sell {
        tokens,
        sell_all: tokens >= input.held_tokens,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyDefaults;
    use crate::strategy::{NewStrategy, StrategyConfig};

    fn strategy(profit: ProfitMode, stop: Option<f64>) -> StrategyConfig {
        let mut new = NewStrategy::with_defaults(&StrategyDefaults::default(), "0xt", "T", "main");
        new.profit = profit;
        new.stop_loss_pct = stop;
        new.dip_threshold_pct = 15.0;
        StrategyConfig::from_new(new, 10.0).unwrap()
    }

    fn input<'a>(config: &'a StrategyConfig, range: &'a RangeProgress, current: f64) -> TickInput<'a> {
        TickInput {
            config,
            current,
            highest_in_window: None,
            samples_in_window: 0,
            open_positions: 0,
            held_tokens: 0.0,
            average_cost: None,
            range,
        }
    }

    #[test]
    fn test_dip_boundary_is_inclusive() {
        assert!(dip_signal(Some(2.0), 5, 1.71, 15.0, None).is_none());
        let signal = dip_signal(Some(2.0), 5, 1.70, 15.0, None).unwrap();
        assert!((signal.drop_pct - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_dip_needs_history_and_respects_average() {
        assert!(dip_signal(Some(2.0), 1, 1.0, 15.0, None).is_none());
        // Never average up
        assert!(dip_signal(Some(2.0), 5, 1.5, 15.0, Some(1.4)).is_none());
        assert!(dip_signal(Some(2.0), 5, 1.4, 15.0, Some(1.4)).is_some());
    }

    #[test]
    fn test_profit_boundary() {
        assert!(!profit_signal(1.0, 1.09, 10.0));
        assert!(profit_signal(1.0, 1.10, 10.0));
    }

    #[test]
    fn test_stop_loss() {
        assert!(!stop_loss_signal(1.0, 0.96, 5.0));
        assert!(stop_loss_signal(1.0, 0.95, 5.0));
    }

    #[test]
    fn test_range_steps_weights() {
        let linear = range_steps(2.0, 8.0, 4, StepDistribution::Linear);
        let thresholds: Vec<f64> = linear.iter().map(|s| s.threshold_pct).collect();
        assert_eq!(thresholds, vec![2.0, 4.0, 6.0, 8.0]);
        assert!(linear.iter().all(|s| (s.sell_fraction - 0.25).abs() < 1e-12));

        let aggressive = range_steps(2.0, 8.0, 4, StepDistribution::Aggressive);
        assert!((aggressive[0].sell_fraction - 0.4).abs() < 1e-12);
        assert!((aggressive[3].sell_fraction - 0.1).abs() < 1e-12);

        let conservative = range_steps(2.0, 8.0, 4, StepDistribution::Conservative);
        assert!((conservative[0].sell_fraction - 0.1).abs() < 1e-12);
        let total: f64 = conservative.iter().map(|s| s.sell_fraction).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_simple_profit_sells_everything() {
        let config = strategy(ProfitMode::Simple { target_pct: 10.0 }, None);
        let range = RangeProgress::default();
        let mut tick = input(&config, &range, 1.10);
        tick.open_positions = 2;
        tick.held_tokens = 15.0;
        tick.average_cost = Some(1.0);

        match evaluate(&tick) {
            Decision::Sell { tokens, sell_all, reason } => {
                assert_eq!(tokens, 15.0);
                assert!(sell_all);
                assert_eq!(reason.label(), "profit target");
            }
            other => panic!("expected sell, got {:?}", other),
        }

        tick.current = 1.09;
        assert_eq!(evaluate(&tick), Decision::Hold);
    }

    #[test]
    fn test_exit_reasons() {
        let config = strategy(ProfitMode::Simple { target_pct: 1.0 }, Some(5.0));
        let range = RangeProgress::default();
        let mut tick = input(&config, &range, 0.94);
        tick.open_positions = 1;
        tick.held_tokens = 10.0;
        tick.average_cost = Some(1.0);

        match evaluate(&tick) {
            Decision::Sell { reason: ExitReason::StopLoss { .. }, .. } => {}
            other => panic!("expected stop loss, got {:?}", other),
        }

        tick.current = 1.02;
        match evaluate(&tick) {
            Decision::Sell { reason: ExitReason::ProfitTarget { .. }, .. } => {}
            other => panic!("expected profit target, got {:?}", other),
        }
    }

    #[test]
    fn test_range_mode_partial_then_final() {
        let config = strategy(
            ProfitMode::Range {
                min_pct: 2.0,
                max_pct: 6.0,
                steps: 3,
                distribution: StepDistribution::Linear,
            },
            None,
        );
        let mut range = RangeProgress {
            basis_tokens: 30.0,
            steps_done: vec![],
        };

        {
            let mut tick = input(&config, &range, 1.03);
            tick.open_positions = 1;
            tick.held_tokens = 30.0;
            tick.average_cost = Some(1.0);
            match evaluate(&tick) {
                Decision::Sell { tokens, sell_all, reason } => {
                    assert!((tokens - 10.0).abs() < 1e-9);
                    assert!(!sell_all);
                    assert_eq!(reason, ExitReason::RangeSteps { steps: vec![0], gain_pct: tick_gain(1.03) });
                }
                other => panic!("expected partial sell, got {:?}", other),
            }
        }

        range.steps_done = vec![0];
        let mut tick = input(&config, &range, 1.07);
        tick.open_positions = 1;
        tick.held_tokens = 20.0;
        tick.average_cost = Some(1.0);
        match evaluate(&tick) {
            Decision::Sell { tokens, sell_all, .. } => {
                assert_eq!(tokens, 20.0);
                assert!(sell_all);
            }
            other => panic!("expected final sell, got {:?}", other),
        }
    }

    fn tick_gain(current: f64) -> f64 {
        (current - 1.0) / 1.0 * 100.0
    }

    #[test]
    fn test_dip_buy_when_flat_and_entry_cap() {
        let config = strategy(ProfitMode::Simple { target_pct: 10.0 }, None);
        let range = RangeProgress::default();
        let mut tick = input(&config, &range, 1.70);
        tick.highest_in_window = Some(2.0);
        tick.samples_in_window = 3;

        match evaluate(&tick) {
            Decision::Buy { amount_base, .. } => assert_eq!(amount_base, config.trade_amount),
            other => panic!("expected buy, got {:?}", other),
        }

        tick.open_positions = config.max_entries as usize;
        tick.held_tokens = 1.0;
        tick.average_cost = Some(1.8);
        assert_eq!(evaluate(&tick), Decision::Hold);
    }
}
