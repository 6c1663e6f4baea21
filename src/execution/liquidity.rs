//! Liquidity-depth cap
//!
//! A trade larger than the pool can absorb at the requested slippage is
//! shrunk to the largest amount that stays within it, found by binary search
//! on quoted price impact.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::execution::types::QuoteRequest;
use crate::execution::QuoteSource;

/// Reference size relative to the requested amount, used as the spot reference
const SPOT_DIVISOR: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct LiquiditySizer {
    pub iterations: usize,
}

impl Default for LiquiditySizer {
    fn default() -> Self {
        Self { iterations: 20 }
    }
}

/// Price impact in percent of `rate` against `spot_rate`
pub fn price_impact_pct(spot_rate: f64, rate: f64) -> f64 {
    if spot_rate <= 0.0 {
        return 100.0;
    }
    ((1.0 - rate / spot_rate) * 100.0).max(0.0)
}

impl LiquiditySizer {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }

    /// Largest amount up to `request.amount_in` whose price impact stays
    /// within `request.slippage_pct`
    pub async fn cap_amount(&self, source: &dyn QuoteSource, request: &QuoteRequest) -> Result<f64> {
        let amount = request.amount_in;
        if amount <= 0.0 || !amount.is_finite() {
            return Err(Error::InvalidAmount(amount.to_string()));
        }

        let mut base = request.clone();
        base.receiver = None;

        let spot = source.quote(&base.with_amount(amount / SPOT_DIVISOR)).await?.rate();
        if spot <= 0.0 {
            return Err(Error::NoLiquidity {
                token_in: request.token_in.clone(),
                token_out: request.token_out.clone(),
            });
        }

        let full_impact = match source.quote(&base).await {
            Ok(quote) => price_impact_pct(spot, quote.rate()),
            Err(e) if e.is_skip_tick() => 100.0,
            Err(e) => return Err(e),
        };
        if full_impact <= request.slippage_pct {
            return Ok(amount);
        }

        let mut low = 0.0;
        let mut high = amount;

        for _ in 0..self.iterations {
            let mid = (low + high) / 2.0;
            let impact = match source.quote(&base.with_amount(mid)).await {
                Ok(quote) => price_impact_pct(spot, quote.rate()),
                Err(e) if e.is_skip_tick() => 100.0,
                Err(e) => return Err(e),
            };

            if impact <= request.slippage_pct {
                low = mid;
            } else {
                high = mid;
            }
        }

        debug!(
            "Liquidity search {} -> {}: full impact {:.2}%, capped at {}",
            request.token_in, request.token_out, full_impact, low
        );

        if low <= 0.0 {
            return Err(Error::NoLiquidity {
                token_in: request.token_in.clone(),
                token_out: request.token_out.clone(),
            });
        }

        info!(
            "Capping trade from {} to {} ({:.2}% impact at full size)",
            amount, low, full_impact
        );
        Ok(low)
    }
}
