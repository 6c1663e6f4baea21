//! Price sampling and history
//!
//! - `sample` - samples, per-token series and SMA windows
//! - `sampler` - quote-based spot price fetches with a staleness fallback
//! - `database` - tracked tokens, background refresh and price triggers

pub mod database;
pub mod sample;
pub mod sampler;

pub use database::{DatabaseStatus, PriceDatabase, PriceStats, TriggerFire, UpdateReport};
pub use sample::{PriceSample, PriceSeries, SmaWindow};
pub use sampler::PriceSampler;
