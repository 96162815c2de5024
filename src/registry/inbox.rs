//! Inbox delivery from plugs to app gateways

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::host::ConnectionRegistry;

/// Message relayed from a plug on a target chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxCall {
    /// Unique id assigned by the relaying side
    pub call_id: B256,
    pub chain_slug: u32,
    pub plug: Address,
    pub app_gateway: Address,
    #[serde(default)]
    pub payload: Bytes,
    #[serde(default)]
    pub params: B256,
}

/// Inbox call its app gateway did not accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboxFailure {
    pub call_id: B256,
    pub app_gateway: Address,
    pub reason: String,
}

/// Outcome of an inbox batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboxReport {
    pub delivered: Vec<B256>,
    pub failed: Vec<InboxFailure>,
}

/// Consumed call ids
#[derive(Debug, Default)]
pub struct InboxGuard {
    consumed: HashSet<B256>,
}

impl InboxGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_consumed(&self, call_id: &B256) -> bool {
        self.consumed.contains(call_id)
    }

    /// Check a batch before anything is dispatched
    ///
    /// Fails on an id already consumed or repeated within the batch, and on
    /// a (gateway, chain, plug) triple the connection registry does not
    /// know.
    pub fn validate(
        &self,
        calls: &[InboxCall],
        connections: &dyn ConnectionRegistry,
    ) -> CoordinatorResult<()> {
        let mut seen = HashSet::with_capacity(calls.len());
        for call in calls {
            if self.consumed.contains(&call.call_id) || !seen.insert(call.call_id) {
                return Err(CoordinatorError::AppGatewayAlreadyCalled(call.call_id));
            }

            let authorized = connections
                .plug_config(call.chain_slug, call.plug)
                .map(|config| config.app_gateway == call.app_gateway)
                .unwrap_or(false);
            if !authorized {
                return Err(CoordinatorError::InvalidInboxCaller {
                    app_gateway: call.app_gateway,
                    chain_slug: call.chain_slug,
                    plug: call.plug,
                });
            }
        }
        Ok(())
    }

    pub fn consume(&mut self, call_id: B256) {
        self.consumed.insert(call_id);
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticConnections;

    fn connections() -> StaticConnections {
        let mut connections = StaticConnections::new();
        connections.register_plug(
            421614,
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            Address::repeat_byte(0x33),
        );
        connections
    }

    fn call(id: u8) -> InboxCall {
        InboxCall {
            call_id: B256::repeat_byte(id),
            chain_slug: 421614,
            plug: Address::repeat_byte(0x11),
            app_gateway: Address::repeat_byte(0x22),
            payload: Bytes::new(),
            params: B256::ZERO,
        }
    }

    #[test]
    fn test_duplicate_within_batch() {
        let guard = InboxGuard::new();
        let err = guard.validate(&[call(1), call(1)], &connections()).unwrap_err();
        assert!(matches!(err, CoordinatorError::AppGatewayAlreadyCalled(_)));
    }

    #[test]
    fn test_consumed_id_rejected() {
        let mut guard = InboxGuard::new();
        guard.consume(B256::repeat_byte(1));
        assert!(guard.validate(&[call(1)], &connections()).is_err());
        assert!(guard.validate(&[call(2)], &connections()).is_ok());
    }

    #[test]
    fn test_wrong_gateway_rejected() {
        let guard = InboxGuard::new();
        let mut bad = call(1);
        bad.app_gateway = Address::repeat_byte(0x99);
        assert!(matches!(
            guard.validate(&[bad], &connections()),
            Err(CoordinatorError::InvalidInboxCaller { chain_slug: 421614, .. })
        ));
    }
}
