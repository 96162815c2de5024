//! Promise fan-out to request listeners
//!
//! Delivery is best effort across the listener set: a listener that fails
//! or declines is logged and skipped, the remaining listeners still
//! receive the result, and only accepted deliveries produce events.

use alloy_primitives::{Address, Bytes, B256};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::AsyncRequest;
use crate::events::{CoordinatorEvent, EventLog};
use crate::host::{BatchStatus, ContractHost};

/// One listener notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub request_id: B256,
    pub listener: Address,
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub accepted: Vec<Delivery>,
    pub rejected: Vec<Delivery>,
}

impl FanOutReport {
    pub fn merge(&mut self, other: FanOutReport) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }
}

/// Async ids whose batches have executed, with the time they resolved
///
/// Keyed by the app gateway that owns the resolved request.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executed: DashMap<(Address, B256), u64>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first execution of `async_id` for `app_gateway`
    pub fn mark_executed(&self, app_gateway: Address, async_id: B256, at: u64) {
        self.executed.entry((app_gateway, async_id)).or_insert(at);
    }

    pub fn executed_at(&self, app_gateway: Address, async_id: &B256) -> Option<u64> {
        self.executed.get(&(app_gateway, *async_id)).map(|at| *at)
    }

    pub fn len(&self) -> usize {
        self.executed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executed.is_empty()
    }
}

impl BatchStatus for ExecutionTracker {
    fn is_executed(&self, app_gateway: Address, async_id: &B256) -> bool {
        self.executed.contains_key(&(app_gateway, *async_id))
    }
}

/// Notifies listeners through the contract host
pub struct PromiseDispatcher {
    host: Arc<dyn ContractHost>,
}

impl PromiseDispatcher {
    pub fn new(host: Arc<dyn ContractHost>) -> Self {
        Self { host }
    }

    /// Deliver `return_data` to every listener of a request
    pub fn resolve(
        &self,
        request_id: B256,
        request: &AsyncRequest,
        return_data: &Bytes,
        events: &mut EventLog,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();

        for &listener in &request.listeners {
            let delivery = Delivery {
                request_id,
                listener,
            };
            match self
                .host
                .mark_resolved(listener, request.async_id, request_id, return_data)
            {
                Ok(true) => {
                    debug!(
                        "Listener {} resolved request {}",
                        listener,
                        hex::encode(request_id)
                    );
                    events.emit(CoordinatorEvent::PromiseResolved {
                        async_id: request.async_id,
                        request_id,
                        listener,
                        return_data: return_data.clone(),
                    });
                    report.accepted.push(delivery);
                }
                Ok(false) => {
                    warn!(
                        "Listener {} declined result for request {}",
                        listener,
                        hex::encode(request_id)
                    );
                    report.rejected.push(delivery);
                }
                Err(e) => {
                    warn!(
                        "Listener {} failed to resolve request {}: {}",
                        listener,
                        hex::encode(request_id),
                        e
                    );
                    report.rejected.push(delivery);
                }
            }
        }

        crate::metrics::record_promise_deliveries(report.accepted.len(), report.rejected.len());
        report
    }

    /// Tell every listener its request reverted on the target chain
    pub fn notify_revert(&self, request_id: B256, request: &AsyncRequest) -> FanOutReport {
        let mut report = FanOutReport::default();

        for &listener in &request.listeners {
            let delivery = Delivery {
                request_id,
                listener,
            };
            match self
                .host
                .mark_onchain_revert(listener, request.async_id, request_id)
            {
                Ok(()) => report.accepted.push(delivery),
                Err(e) => {
                    warn!(
                        "Listener {} failed to handle revert of request {}: {}",
                        listener,
                        hex::encode(request_id),
                        e
                    );
                    report.rejected.push(delivery);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CallError, MockContractHost};
    use mockall::predicate::eq;

    fn request(listeners: Vec<Address>) -> AsyncRequest {
        AsyncRequest {
            origin_gateway: Address::repeat_byte(1),
            transmitter: Address::repeat_byte(2),
            target: Address::repeat_byte(3),
            verifier: Address::repeat_byte(4),
            gas_limit: 100_000,
            async_id: B256::repeat_byte(5),
            commitment_root: B256::repeat_byte(6),
            payload: Bytes::new(),
            listeners,
        }
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let first = Address::repeat_byte(0x10);
        let second = Address::repeat_byte(0x20);
        let third = Address::repeat_byte(0x30);

        let mut host = MockContractHost::new();
        host.expect_mark_resolved()
            .with(eq(first), eq(B256::repeat_byte(5)), eq(B256::repeat_byte(9)), eq(Bytes::from_static(b"ok")))
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        host.expect_mark_resolved()
            .withf(move |listener, _, _, _| *listener == second)
            .times(1)
            .returning(|_, _, _, _| Err(CallError("reverted".to_string())));
        host.expect_mark_resolved()
            .withf(move |listener, _, _, _| *listener == third)
            .times(1)
            .returning(|_, _, _, _| Ok(false));

        let dispatcher = PromiseDispatcher::new(Arc::new(host));
        let mut events = EventLog::new();
        let report = dispatcher.resolve(
            B256::repeat_byte(9),
            &request(vec![first, second, third]),
            &Bytes::from_static(b"ok"),
            &mut events,
        );

        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].listener, first);
        assert_eq!(report.rejected.len(), 2);

        let emitted = events.drain();
        assert_eq!(emitted.len(), 1);
        assert!(matches!(
            emitted[0],
            CoordinatorEvent::PromiseResolved { listener, .. } if listener == first
        ));
    }

    #[test]
    fn test_revert_notifies_all_listeners() {
        let mut host = MockContractHost::new();
        host.expect_mark_onchain_revert()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let dispatcher = PromiseDispatcher::new(Arc::new(host));
        let report = dispatcher.notify_revert(
            B256::repeat_byte(9),
            &request(vec![Address::repeat_byte(1), Address::repeat_byte(2)]),
        );
        assert_eq!(report.accepted.len(), 2);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_tracker_keeps_first_execution_time() {
        let tracker = ExecutionTracker::new();
        let gateway = Address::repeat_byte(0x10);
        let async_id = B256::repeat_byte(1);
        assert!(!tracker.is_executed(gateway, &async_id));
        tracker.mark_executed(gateway, async_id, 10);
        tracker.mark_executed(gateway, async_id, 20);
        assert_eq!(tracker.executed_at(gateway, &async_id), Some(10));
        assert!(tracker.is_executed(gateway, &async_id));
    }

    #[test]
    fn test_tracker_is_scoped_by_gateway() {
        let tracker = ExecutionTracker::new();
        let async_id = B256::repeat_byte(1);
        tracker.mark_executed(Address::repeat_byte(0x11), async_id, 10);
        assert!(!tracker.is_executed(Address::repeat_byte(0x10), &async_id));
        assert_eq!(tracker.len(), 1);
    }
}
