//! Coordinator event types
//!
//! Events are append-only notices for off-chain watchers and indexers. An
//! operation stages its events in an [`EventLog`] and they are published
//! only once the operation has committed.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::limiter::UpdateLimitParams;
use crate::registry::AsyncRequest;

/// Events emitted by the registry, limiter and fee ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// Request submitted for execution, root awaiting attestation
    FinalizeRequested {
        request_id: B256,
        root: B256,
        request: AsyncRequest,
    },

    /// Read-only query submitted
    QueryRequested {
        request_id: B256,
        chain_slug: u32,
        target: Address,
        app_gateway: Address,
        payload: Bytes,
    },

    /// Attestation published; the transmitter may execute
    Finalized {
        request_id: B256,
        request: AsyncRequest,
        signature: Bytes,
    },

    /// A listener accepted a resolved result
    PromiseResolved {
        async_id: B256,
        request_id: B256,
        listener: Address,
        return_data: Bytes,
    },

    /// Request reverted, fee settlement scheduled
    MarkedRevert {
        request_id: B256,
        is_onchain_revert: bool,
    },

    /// Deferred callback recorded
    TimeoutRequested {
        timeout_id: B256,
        target: Address,
        execute_at: u64,
    },

    /// Deferred callback executed
    TimeoutResolved {
        timeout_id: B256,
        target: Address,
        executed_at: u64,
    },

    /// Inbox call delivered to its app gateway
    CalledAppGateway {
        call_id: B256,
        chain_slug: u32,
        plug: Address,
        app_gateway: Address,
    },

    /// Rate limit parameters changed
    LimitParamsUpdated { updates: Vec<UpdateLimitParams> },

    /// Deposit credited by the watcher
    FeesDeposited {
        chain_slug: u32,
        app_gateway: Address,
        token: Address,
        amount: U256,
    },

    /// Fees escrowed for an auction
    FeesBlocked {
        async_id: B256,
        chain_slug: u32,
        app_gateway: Address,
        token: Address,
        amount: U256,
    },

    /// Escrow reconciled to the winning bid
    TransmitterFeesUpdated {
        async_id: B256,
        transmitter: Address,
        fee: U256,
    },

    /// Escrow released without charge
    FeesUnblocked { async_id: B256, app_gateway: Address },

    /// Escrow moved from the app gateway to the transmitter
    FeesUnblockedAndAssigned {
        async_id: B256,
        transmitter: Address,
        amount: U256,
    },

    /// Transmitter payout prepared
    TransmitterFeesWithdrawn {
        fees_id: B256,
        transmitter: Address,
        chain_slug: u32,
        token: Address,
        receiver: Address,
        amount: U256,
    },

    /// Unused escrow released after execution
    BlockedFeesUpdated {
        async_id: B256,
        fees_used: U256,
        released: U256,
    },
}

impl CoordinatorEvent {
    /// Get event name for metrics and the journal
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::FinalizeRequested { .. } => "finalize_requested",
            CoordinatorEvent::QueryRequested { .. } => "query_requested",
            CoordinatorEvent::Finalized { .. } => "finalized",
            CoordinatorEvent::PromiseResolved { .. } => "promise_resolved",
            CoordinatorEvent::MarkedRevert { .. } => "marked_revert",
            CoordinatorEvent::TimeoutRequested { .. } => "timeout_requested",
            CoordinatorEvent::TimeoutResolved { .. } => "timeout_resolved",
            CoordinatorEvent::CalledAppGateway { .. } => "called_app_gateway",
            CoordinatorEvent::LimitParamsUpdated { .. } => "limit_params_updated",
            CoordinatorEvent::FeesDeposited { .. } => "fees_deposited",
            CoordinatorEvent::FeesBlocked { .. } => "fees_blocked",
            CoordinatorEvent::TransmitterFeesUpdated { .. } => "transmitter_fees_updated",
            CoordinatorEvent::FeesUnblocked { .. } => "fees_unblocked",
            CoordinatorEvent::FeesUnblockedAndAssigned { .. } => "fees_unblocked_and_assigned",
            CoordinatorEvent::TransmitterFeesWithdrawn { .. } => "transmitter_fees_withdrawn",
            CoordinatorEvent::BlockedFeesUpdated { .. } => "blocked_fees_updated",
        }
    }

    /// Primary identifier the event refers to, if any
    pub fn subject_id(&self) -> Option<B256> {
        match self {
            CoordinatorEvent::FinalizeRequested { request_id, .. }
            | CoordinatorEvent::QueryRequested { request_id, .. }
            | CoordinatorEvent::Finalized { request_id, .. }
            | CoordinatorEvent::PromiseResolved { request_id, .. }
            | CoordinatorEvent::MarkedRevert { request_id, .. } => Some(*request_id),
            CoordinatorEvent::TimeoutRequested { timeout_id, .. }
            | CoordinatorEvent::TimeoutResolved { timeout_id, .. } => Some(*timeout_id),
            CoordinatorEvent::CalledAppGateway { call_id, .. } => Some(*call_id),
            CoordinatorEvent::FeesBlocked { async_id, .. }
            | CoordinatorEvent::TransmitterFeesUpdated { async_id, .. }
            | CoordinatorEvent::FeesUnblocked { async_id, .. }
            | CoordinatorEvent::FeesUnblockedAndAssigned { async_id, .. }
            | CoordinatorEvent::BlockedFeesUpdated { async_id, .. } => Some(*async_id),
            CoordinatorEvent::TransmitterFeesWithdrawn { fees_id, .. } => Some(*fees_id),
            CoordinatorEvent::LimitParamsUpdated { .. }
            | CoordinatorEvent::FeesDeposited { .. } => None,
        }
    }
}

/// Events staged by a single operation
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<CoordinatorEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: CoordinatorEvent) {
        self.entries.push(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append another operation's committed events
    pub fn extend(&mut self, other: EventLog) {
        self.entries.extend(other.entries);
    }

    pub fn drain(&mut self) -> Vec<CoordinatorEvent> {
        std::mem::take(&mut self.entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoordinatorEvent> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = CoordinatorEvent::MarkedRevert {
            request_id: B256::repeat_byte(1),
            is_onchain_revert: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "marked_revert");
        assert_eq!(json["is_onchain_revert"], true);
        assert_eq!(event.subject_id(), Some(B256::repeat_byte(1)));
    }

    #[test]
    fn test_event_log_drain_empties() {
        let mut log = EventLog::new();
        log.emit(CoordinatorEvent::FeesUnblocked {
            async_id: B256::ZERO,
            app_gateway: Address::ZERO,
        });
        assert_eq!(log.len(), 1);
        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }
}
