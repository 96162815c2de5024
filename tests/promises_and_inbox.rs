mod common;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_coordinator::events::CoordinatorEvent;
use async_coordinator::fees::FeesData;
use async_coordinator::registry::{InboxCall, ResolvedPromise};
use async_coordinator::CoordinatorError;
use common::*;

fn listener(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[test]
fn failing_listener_is_skipped() {
    let mut f = fixture(10);
    let (first, second) = (listener(0x61), listener(0x62));
    f.host.fail_for(second);

    let (request_id, _) = f
        .registry
        .finalize(
            gateway(),
            details(B256::repeat_byte(0xa1), vec![first, second]),
            transmitter(),
        )
        .unwrap();
    f.registry.drain_events();

    let report = f
        .registry
        .resolve_promises(
            owner(),
            &[ResolvedPromise {
                request_id,
                return_data: Bytes::from_static(b"ok"),
            }],
        )
        .unwrap();
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.accepted[0].listener, first);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].listener, second);

    let resolved: Vec<_> = f
        .registry
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            CoordinatorEvent::PromiseResolved { listener, .. } => Some(listener),
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec![first]);
    assert!(f.registry.is_executed(gateway(), &B256::repeat_byte(0xa1)));
}

#[test]
fn unknown_request_aborts_batch_before_delivery() {
    let mut f = fixture(10);
    let (request_id, _) = f
        .registry
        .finalize(
            gateway(),
            details(B256::repeat_byte(0xa1), vec![listener(0x61)]),
            transmitter(),
        )
        .unwrap();

    let err = f
        .registry
        .resolve_promises(
            owner(),
            &[
                ResolvedPromise {
                    request_id,
                    return_data: Bytes::new(),
                },
                ResolvedPromise {
                    request_id: B256::repeat_byte(0xee),
                    return_data: Bytes::new(),
                },
            ],
        )
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::RequestNotFound(_)));
    assert!(f.host.invocations().is_empty());
    assert!(!f.registry.is_executed(gateway(), &B256::repeat_byte(0xa1)));
}

#[test]
fn revert_settles_escrow_to_transmitter_after_expiry() {
    let mut f = fixture(10);
    let async_id = B256::repeat_byte(0xa3);
    let first = listener(0x61);

    f.registry
        .increment_fees_deposited(watcher(), CHAIN, gateway(), token(), U256::from(1000))
        .unwrap();
    f.registry
        .block_fees(
            helper(),
            gateway(),
            FeesData {
                chain_slug: CHAIN,
                token: token(),
                max_fee: U256::from(300),
            },
            async_id,
        )
        .unwrap();
    let (request_id, _) = f
        .registry
        .finalize(gateway(), details(async_id, vec![first]), transmitter())
        .unwrap();

    let settlement = f.registry.mark_revert(owner(), request_id, true).unwrap();
    assert_eq!(
        f.host.invocations(),
        vec![Invocation::Reverted {
            listener: first,
            request_id
        }]
    );
    assert!(matches!(
        f.registry.resolve_timeout(owner(), settlement),
        Err(CoordinatorError::ResolvingTimeoutTooEarly { .. })
    ));

    f.clock.advance(3_600);
    f.registry.resolve_timeout(owner(), settlement).unwrap();

    let info = f.registry.fee_info(CHAIN, gateway(), token());
    assert_eq!(info.deposited, U256::from(700));
    assert_eq!(info.blocked, U256::ZERO);
    assert_eq!(
        f.registry
            .fees()
            .transmitter_earnings(CHAIN, transmitter(), token()),
        U256::from(300)
    );

    let withdrawal = f
        .registry
        .withdraw_transmitter_fees(helper(), transmitter(), CHAIN, token(), transmitter())
        .unwrap()
        .unwrap();
    assert_eq!(withdrawal.amount, U256::from(300));
}

fn inbox_call(id: u8) -> InboxCall {
    InboxCall {
        call_id: B256::repeat_byte(id),
        chain_slug: CHAIN,
        plug: plug(),
        app_gateway: gateway(),
        payload: Bytes::from_static(b"deposit"),
        params: B256::repeat_byte(id),
    }
}

#[test]
fn inbox_replay_is_rejected() {
    let mut f = fixture(10);
    f.registry
        .call_app_gateways(owner(), &[inbox_call(1)])
        .unwrap();
    assert_eq!(f.host.invocations().len(), 1);

    let err = f
        .registry
        .call_app_gateways(owner(), &[inbox_call(2), inbox_call(1)])
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::AppGatewayAlreadyCalled(id) if id == B256::repeat_byte(1)));
    // the whole batch is refused before dispatch
    assert_eq!(f.host.invocations().len(), 1);

    let delivered = f
        .registry
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, CoordinatorEvent::CalledAppGateway { .. }))
        .count();
    assert_eq!(delivered, 1);
}

#[test]
fn inbox_rejects_unknown_plug_and_wrong_gateway() {
    let mut f = fixture(10);
    let mut wrong_gateway = inbox_call(3);
    wrong_gateway.app_gateway = Address::repeat_byte(0x11);
    assert!(matches!(
        f.registry.call_app_gateways(owner(), &[wrong_gateway]),
        Err(CoordinatorError::InvalidInboxCaller { .. })
    ));

    let mut unknown_plug = inbox_call(4);
    unknown_plug.plug = Address::repeat_byte(0x22);
    assert!(matches!(
        f.registry.call_app_gateways(owner(), &[unknown_plug]),
        Err(CoordinatorError::InvalidInboxCaller { .. })
    ));
    assert!(f.host.invocations().is_empty());
}

#[test]
fn failed_inbox_call_is_not_consumed() {
    let mut f = fixture(10);
    f.registry
        .call_app_gateways(owner(), &[inbox_call(5)])
        .unwrap();

    f.host.fail_for(gateway());
    let err = f
        .registry
        .call_app_gateways(owner(), &[inbox_call(7)])
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::CallFailed { .. }));
    // a failed call id can be retried
    assert!(matches!(
        f.registry.call_app_gateways(owner(), &[inbox_call(7)]),
        Err(CoordinatorError::CallFailed { .. })
    ));
    assert_eq!(f.host.invocations().len(), 1);
}

#[test]
fn inbox_batch_delivers_around_a_failing_gateway() {
    let mut f = fixture(10);
    let mut stalled = inbox_call(9);
    stalled.plug = other_plug();
    stalled.app_gateway = other_gateway();
    f.host.fail_for(other_gateway());

    let report = f
        .registry
        .call_app_gateways(owner(), &[inbox_call(8), stalled.clone(), inbox_call(10)])
        .unwrap();
    assert_eq!(
        report.delivered,
        vec![B256::repeat_byte(8), B256::repeat_byte(10)]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].call_id, B256::repeat_byte(9));
    assert_eq!(report.failed[0].app_gateway, other_gateway());

    let announced: Vec<B256> = f
        .registry
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            CoordinatorEvent::CalledAppGateway { call_id, .. } => Some(call_id),
            _ => None,
        })
        .collect();
    assert_eq!(announced, report.delivered);

    // delivered ids are spent, the failed one is still open
    assert!(matches!(
        f.registry.call_app_gateways(owner(), &[inbox_call(8)]),
        Err(CoordinatorError::AppGatewayAlreadyCalled(_))
    ));
    f.host.failing.lock().unwrap().clear();
    let retry = f
        .registry
        .call_app_gateways(owner(), &[stalled])
        .unwrap();
    assert_eq!(retry.delivered, vec![B256::repeat_byte(9)]);
    assert!(retry.failed.is_empty());
    assert_eq!(f.host.invocations().len(), 3);
}

#[test]
fn inbox_batch_with_no_delivery_changes_nothing() {
    let mut f = fixture(10);
    f.host.fail_for(gateway());

    let err = f
        .registry
        .call_app_gateways(owner(), &[inbox_call(11), inbox_call(12)])
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::CallFailed { target, .. } if target == gateway()));
    assert!(f.registry.drain_events().is_empty());

    f.host.failing.lock().unwrap().clear();
    let report = f
        .registry
        .call_app_gateways(owner(), &[inbox_call(11), inbox_call(12)])
        .unwrap();
    assert_eq!(report.delivered.len(), 2);
}
