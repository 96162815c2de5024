//! Per-principal rate limiting
//!
//! Every resource-consuming action draws from a token bucket keyed by
//! (app gateway, limit kind). The principal charged is resolved from the
//! caller:
//! - the delivery helper acts on behalf of the app gateway it names
//! - any other caller charges the app gateway registered as its owner,
//!   or itself when it has no registered owner

pub mod gauge;
mod decimal;

pub use gauge::{LimitParams, LIMIT_DECIMALS, LIMIT_UNIT};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::host::ConnectionRegistry;

/// Resource kinds gated by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Finalize,
    Query,
    Schedule,
}

impl LimitKind {
    pub const ALL: [LimitKind; 3] = [LimitKind::Finalize, LimitKind::Query, LimitKind::Schedule];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Finalize => "finalize",
            LimitKind::Query => "query",
            LimitKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitKind {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "finalize" => Ok(LimitKind::Finalize),
            "query" => Ok(LimitKind::Query),
            "schedule" => Ok(LimitKind::Schedule),
            other => Err(CoordinatorError::Config(format!("Unknown limit kind: {}", other))),
        }
    }
}

/// Administrative change to one bucket, values in fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLimitParams {
    pub kind: LimitKind,
    pub app_gateway: Address,
    #[serde(with = "decimal")]
    pub max_limit: u128,
    #[serde(with = "decimal")]
    pub rate_per_second: u128,
}

/// Capacity and rate applied to principals without explicit params
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLimit {
    #[serde(with = "decimal")]
    pub max_limit: u128,
    #[serde(with = "decimal")]
    pub rate_per_second: u128,
}

/// A checked but not yet applied consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reservation does nothing until committed"]
pub struct Reservation {
    pub app_gateway: Address,
    pub kind: LimitKind,
    params: LimitParams,
}

/// Token buckets for every (app gateway, kind) pair
pub struct RateLimiter {
    /// Explicit or lazily initialised buckets
    buckets: HashMap<(Address, LimitKind), LimitParams>,
    /// Per-kind defaults
    defaults: HashMap<LimitKind, DefaultLimit>,
    /// Caller allowed to name the charged app gateway
    delivery_helper: Address,
    /// Owner lookups for principal resolution
    connections: Arc<dyn ConnectionRegistry>,
}

impl RateLimiter {
    /// Create a limiter with no buckets and no defaults
    pub fn new(delivery_helper: Address, connections: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            buckets: HashMap::new(),
            defaults: HashMap::new(),
            delivery_helper,
            connections,
        }
    }

    /// App gateway charged when `caller` acts for `app_gateway`
    pub fn resolve_principal(&self, caller: Address, app_gateway: Address) -> Address {
        if caller == self.delivery_helper {
            app_gateway
        } else {
            self.connections.core_app_gateway(caller)
        }
    }

    pub fn set_default_limit(&mut self, kind: LimitKind, max_limit: u128, rate_per_second: u128) {
        self.defaults.insert(
            kind,
            DefaultLimit {
                max_limit,
                rate_per_second,
            },
        );
        info!(
            "Default {} limit set: max {} rate {}/s",
            kind, max_limit, rate_per_second
        );
    }

    pub fn default_limit(&self, kind: LimitKind) -> Option<DefaultLimit> {
        self.defaults.get(&kind).copied()
    }

    /// Effective bucket, falling back to a full default bucket
    pub fn limit_params(&self, kind: LimitKind, app_gateway: Address, now: u64) -> LimitParams {
        if let Some(params) = self.buckets.get(&(app_gateway, kind)) {
            return *params;
        }
        self.defaults
            .get(&kind)
            .map(|d| LimitParams::new(d.max_limit, d.rate_per_second, now))
            .unwrap_or_default()
    }

    /// Level available to `app_gateway` right now, in fixed point
    pub fn current_limit(
        &self,
        kind: LimitKind,
        app_gateway: Address,
        now: u64,
    ) -> CoordinatorResult<u128> {
        let params = self.supported_params(kind, app_gateway, now)?;
        Ok(params.current_limit(now))
    }

    /// Check that `units` can be consumed without applying it
    pub fn reserve(
        &self,
        app_gateway: Address,
        kind: LimitKind,
        units: u64,
        now: u64,
    ) -> CoordinatorResult<Reservation> {
        let params = self.supported_params(kind, app_gateway, now)?;
        let requested = (units as u128).saturating_mul(LIMIT_UNIT);

        let params = params.try_consume(requested, now).map_err(|available| {
            crate::metrics::record_limit_rejection(kind);
            CoordinatorError::LimitExceeded {
                kind,
                app_gateway,
                requested,
                available,
            }
        })?;

        Ok(Reservation {
            app_gateway,
            kind,
            params,
        })
    }

    /// Apply a reservation produced by [`RateLimiter::reserve`]
    pub fn commit(&mut self, reservation: Reservation) {
        debug!(
            "Consumed {} limit for {}: level now {}",
            reservation.kind, reservation.app_gateway, reservation.params.current_level
        );
        self.buckets
            .insert((reservation.app_gateway, reservation.kind), reservation.params);
    }

    /// Resolve the principal for `caller` and consume `units` from its bucket
    pub fn consume(
        &mut self,
        caller: Address,
        app_gateway: Address,
        kind: LimitKind,
        units: u64,
        now: u64,
    ) -> CoordinatorResult<Address> {
        let principal = self.resolve_principal(caller, app_gateway);
        let reservation = self.reserve(principal, kind, units, now)?;
        self.commit(reservation);
        Ok(principal)
    }

    /// Replace capacity and rate for each named bucket
    ///
    /// Each bucket is caught up to `now` at its old rate before the change
    /// and clamped to the new capacity.
    pub fn update_limit_params(&mut self, updates: &[UpdateLimitParams], now: u64) {
        for update in updates {
            let key = (update.app_gateway, update.kind);
            let updated = match self.buckets.get(&key) {
                Some(params) => params.reconfigure(update.max_limit, update.rate_per_second, now),
                None => LimitParams::new(update.max_limit, update.rate_per_second, now),
            };
            self.buckets.insert(key, updated);

            info!(
                "Updated {} limit for {}: max {} rate {}/s",
                update.kind, update.app_gateway, update.max_limit, update.rate_per_second
            );
        }
    }

    fn supported_params(
        &self,
        kind: LimitKind,
        app_gateway: Address,
        now: u64,
    ) -> CoordinatorResult<LimitParams> {
        let params = self.limit_params(kind, app_gateway, now);
        if params.max_limit == 0 {
            return Err(CoordinatorError::ActionNotSupported { kind, app_gateway });
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticConnections;

    fn helper() -> Address {
        Address::repeat_byte(0xdd)
    }

    fn limiter_with(connections: StaticConnections) -> RateLimiter {
        let mut limiter = RateLimiter::new(helper(), Arc::new(connections));
        limiter.set_default_limit(LimitKind::Finalize, 2 * LIMIT_UNIT, LIMIT_UNIT);
        limiter
    }

    #[test]
    fn test_unconfigured_kind_not_supported() {
        let limiter = limiter_with(StaticConnections::new());
        let err = limiter
            .reserve(Address::repeat_byte(1), LimitKind::Query, 1, 0)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ActionNotSupported { kind: LimitKind::Query, .. }));
    }

    #[test]
    fn test_default_bucket_starts_full_and_drains() {
        let mut limiter = limiter_with(StaticConnections::new());
        let gateway = Address::repeat_byte(1);

        limiter.consume(gateway, gateway, LimitKind::Finalize, 1, 100).unwrap();
        limiter.consume(gateway, gateway, LimitKind::Finalize, 1, 100).unwrap();
        let err = limiter
            .consume(gateway, gateway, LimitKind::Finalize, 1, 100)
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::LimitExceeded { available: 0, requested, .. } if requested == LIMIT_UNIT
        ));

        // refills one unit per second
        limiter.consume(gateway, gateway, LimitKind::Finalize, 1, 101).unwrap();
    }

    #[test]
    fn test_reserve_without_commit_leaves_bucket() {
        let limiter = limiter_with(StaticConnections::new());
        let gateway = Address::repeat_byte(1);
        let _ = limiter.reserve(gateway, LimitKind::Finalize, 2, 0).unwrap();
        assert_eq!(
            limiter.current_limit(LimitKind::Finalize, gateway, 0).unwrap(),
            2 * LIMIT_UNIT
        );
    }

    #[test]
    fn test_principal_resolution() {
        let contract = Address::repeat_byte(1);
        let owner_gateway = Address::repeat_byte(2);
        let named = Address::repeat_byte(3);
        let mut connections = StaticConnections::new();
        connections.set_core_app_gateway(contract, owner_gateway);
        let limiter = limiter_with(connections);

        assert_eq!(limiter.resolve_principal(helper(), named), named);
        assert_eq!(limiter.resolve_principal(contract, named), owner_gateway);
        assert_eq!(limiter.resolve_principal(named, contract), named);
    }

    #[test]
    fn test_update_catches_up_before_changing_rate() {
        let mut limiter = limiter_with(StaticConnections::new());
        let gateway = Address::repeat_byte(1);
        limiter.consume(gateway, gateway, LimitKind::Finalize, 2, 0).unwrap();

        limiter.update_limit_params(
            &[UpdateLimitParams {
                kind: LimitKind::Finalize,
                app_gateway: gateway,
                max_limit: 10 * LIMIT_UNIT,
                rate_per_second: 5 * LIMIT_UNIT,
            }],
            1,
        );

        // one second at the old rate, not five
        let params = limiter.limit_params(LimitKind::Finalize, gateway, 1);
        assert_eq!(params.current_level, LIMIT_UNIT);
        assert_eq!(params.max_limit, 10 * LIMIT_UNIT);
    }

    #[test]
    fn test_zero_capacity_update_disables_kind() {
        let mut limiter = limiter_with(StaticConnections::new());
        let gateway = Address::repeat_byte(1);
        limiter.update_limit_params(
            &[UpdateLimitParams {
                kind: LimitKind::Finalize,
                app_gateway: gateway,
                max_limit: 0,
                rate_per_second: 0,
            }],
            0,
        );
        assert!(matches!(
            limiter.current_limit(LimitKind::Finalize, gateway, 10),
            Err(CoordinatorError::ActionNotSupported { .. })
        ));
    }

    #[test]
    fn test_limit_kind_parses() {
        assert_eq!("FINALIZE".parse::<LimitKind>().unwrap(), LimitKind::Finalize);
        assert!("bridge".parse::<LimitKind>().is_err());
    }
}
