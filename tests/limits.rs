mod common;

use alloy_primitives::{Address, Bytes, B256};
use async_coordinator::limiter::{LimitKind, UpdateLimitParams, LIMIT_UNIT};
use async_coordinator::CoordinatorError;
use common::*;

#[test]
fn finalize_drains_and_refills() {
    let mut f = fixture(2);
    for _ in 0..2 {
        f.registry
            .finalize(gateway(), details(B256::ZERO, vec![]), transmitter())
            .unwrap();
    }

    let err = f
        .registry
        .finalize(gateway(), details(B256::ZERO, vec![]), transmitter())
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::LimitExceeded {
            kind: LimitKind::Finalize,
            requested,
            available: 0,
            ..
        } if requested == LIMIT_UNIT
    ));
    assert!(err.is_retryable());

    f.clock.advance(1);
    assert_eq!(
        f.registry
            .current_limit(LimitKind::Finalize, gateway())
            .unwrap(),
        LIMIT_UNIT
    );
    assert!(f
        .registry
        .finalize(gateway(), details(B256::ZERO, vec![]), transmitter())
        .is_ok());
}

#[test]
fn refill_is_capped_at_capacity() {
    let mut f = fixture(3);
    f.registry
        .query(gateway(), CHAIN, plug(), gateway(), vec![], Bytes::new())
        .unwrap();
    f.clock.advance(1_000);
    assert_eq!(
        f.registry.current_limit(LimitKind::Query, gateway()).unwrap(),
        3 * LIMIT_UNIT
    );
}

#[test]
fn failed_operations_consume_nothing() {
    let mut f = fixture(1);

    // plug check fails after the limit check
    let mut unknown = details(B256::ZERO, vec![]);
    unknown.target = Address::repeat_byte(0x21);
    assert!(f.registry.finalize(gateway(), unknown, transmitter()).is_err());

    // delay check fails before the limit check
    assert!(f
        .registry
        .set_timeout(gateway(), gateway(), Bytes::new(), 1_000_000)
        .is_err());

    assert_eq!(
        f.registry
            .current_limit(LimitKind::Finalize, gateway())
            .unwrap(),
        LIMIT_UNIT
    );
    assert_eq!(
        f.registry
            .current_limit(LimitKind::Schedule, gateway())
            .unwrap(),
        LIMIT_UNIT
    );
}

#[test]
fn kinds_and_gateways_are_independent() {
    let mut f = fixture(1);
    f.registry
        .finalize(gateway(), details(B256::ZERO, vec![]), transmitter())
        .unwrap();

    assert!(f
        .registry
        .query(gateway(), CHAIN, plug(), gateway(), vec![], Bytes::new())
        .is_ok());
    let other = Address::repeat_byte(0x11);
    assert_eq!(
        f.registry.current_limit(LimitKind::Finalize, other).unwrap(),
        LIMIT_UNIT
    );
}

#[test]
fn owner_update_clamps_level() {
    let mut f = fixture(10);
    f.registry
        .finalize(gateway(), details(B256::ZERO, vec![]), transmitter())
        .unwrap();
    assert_eq!(
        f.registry
            .current_limit(LimitKind::Finalize, gateway())
            .unwrap(),
        9 * LIMIT_UNIT
    );

    let update = UpdateLimitParams {
        kind: LimitKind::Finalize,
        app_gateway: gateway(),
        max_limit: 5 * LIMIT_UNIT,
        rate_per_second: LIMIT_UNIT / 2,
    };
    assert!(matches!(
        f.registry.update_limit_params(gateway(), vec![update]),
        Err(CoordinatorError::Unauthorized { .. })
    ));
    f.registry
        .update_limit_params(owner(), vec![update])
        .unwrap();

    let params = f.registry.limit_params(LimitKind::Finalize, gateway());
    assert_eq!(params.max_limit, 5 * LIMIT_UNIT);
    assert_eq!(params.rate_per_second, LIMIT_UNIT / 2);
    assert_eq!(
        f.registry
            .current_limit(LimitKind::Finalize, gateway())
            .unwrap(),
        5 * LIMIT_UNIT
    );
}
