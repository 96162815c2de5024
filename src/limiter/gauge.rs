//! Continuous-refill token bucket
//!
//! Levels are fixed point with [`LIMIT_DECIMALS`] decimals so that refill
//! rates below one unit per second still accrue.

use serde::{Deserialize, Serialize};

/// Decimals used by bucket levels and refill rates
pub const LIMIT_DECIMALS: u32 = 18;

/// One whole unit in fixed point
pub const LIMIT_UNIT: u128 = 10u128.pow(LIMIT_DECIMALS);

/// Bucket state for one (app gateway, kind) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitParams {
    /// Bucket capacity
    #[serde(with = "super::decimal")]
    pub max_limit: u128,
    /// Refill per second
    #[serde(with = "super::decimal")]
    pub rate_per_second: u128,
    /// Level as of `last_update`
    #[serde(with = "super::decimal")]
    pub current_level: u128,
    /// Unix seconds of the last consume or update
    pub last_update: u64,
}

impl LimitParams {
    /// A full bucket
    pub fn new(max_limit: u128, rate_per_second: u128, now: u64) -> Self {
        Self {
            max_limit,
            rate_per_second,
            current_level: max_limit,
            last_update: now,
        }
    }

    /// Level after refilling up to `now`, capped at `max_limit`
    pub fn current_limit(&self, now: u64) -> u128 {
        let elapsed = now.saturating_sub(self.last_update) as u128;
        let refill = elapsed.saturating_mul(self.rate_per_second);
        self.current_level.saturating_add(refill).min(self.max_limit)
    }

    /// Bucket after taking `amount` at `now`, or the available level if short
    pub fn try_consume(&self, amount: u128, now: u64) -> Result<LimitParams, u128> {
        let available = self.current_limit(now);
        if available < amount {
            return Err(available);
        }

        Ok(LimitParams {
            current_level: available - amount,
            last_update: now.max(self.last_update),
            ..*self
        })
    }

    /// Change capacity and rate after flushing accrued refill at the old rate
    pub fn reconfigure(&self, max_limit: u128, rate_per_second: u128, now: u64) -> LimitParams {
        let caught_up = self.current_limit(now);
        LimitParams {
            max_limit,
            rate_per_second,
            current_level: caught_up.min(max_limit),
            last_update: now.max(self.last_update),
        }
    }
}
