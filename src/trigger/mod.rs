//! Trade decisions
//!
//! `evaluator` holds the pure dip / profit / stop-loss rules used by
//! strategies; `price_trigger` holds the standalone one-condition triggers.

pub mod evaluator;
pub mod price_trigger;

pub use evaluator::{evaluate, Decision, DipSignal, ExitReason, RangeStep, TickInput};
pub use price_trigger::{PriceTrigger, TriggerCondition, TriggerParams};
