//! Dip-buy / profit-target strategies
//!
//! - `types` - strategy definitions, profit modes and statistics
//! - `store` - persisted strategy registry
//! - `runner` - per-strategy timer tasks and the tick state machine

pub mod runner;
pub mod store;
pub mod types;

pub use runner::{StrategyRunner, TickOutcome};
pub use store::{StrategyStore, StrategySummary};
pub use types::{
    NewStrategy, ProfitMode, RangeProgress, StepDistribution, StrategyConfig, StrategyRecord,
    StrategyStats,
};
