//! Position ledger
//!
//! Open and closed positions per owner (a strategy id or `manual`), the
//! weighted average cost they imply, and daily trading statistics.

pub mod ledger;

pub use ledger::{
    DailyStats, ExitSummary, Holding, Position, PositionLedger, PositionStatus, MANUAL_OWNER,
};
