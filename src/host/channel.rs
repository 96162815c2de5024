//! Contract host that hands every invocation to the delivery process
//!
//! The coordinator does not execute listener or gateway code itself. Each
//! invocation is queued on a channel consumed by whatever process relays
//! calls to the execution environment, and is accepted once queued.

use alloy_primitives::{Address, Bytes, B256};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::{CallError, ContractHost};

/// Invocation queued for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum OutboundCall {
    MarkResolved {
        listener: Address,
        async_id: B256,
        request_id: B256,
        return_data: Bytes,
    },
    MarkOnchainRevert {
        listener: Address,
        async_id: B256,
        request_id: B256,
    },
    CallAppGateway {
        app_gateway: Address,
        payload: Bytes,
    },
    CallFromInbox {
        app_gateway: Address,
        chain_slug: u32,
        plug: Address,
        payload: Bytes,
        params: B256,
    },
}

/// Queues invocations on an unbounded channel
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<OutboundCall>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn enqueue(&self, target: Address, call: OutboundCall) -> Result<(), CallError> {
        debug!("Queueing outbound call to {}", target);
        self.tx
            .send(call)
            .map_err(|_| CallError("delivery channel closed".to_string()))
    }
}

impl ContractHost for ChannelHost {
    fn mark_resolved(
        &self,
        listener: Address,
        async_id: B256,
        request_id: B256,
        return_data: &Bytes,
    ) -> Result<bool, CallError> {
        self.enqueue(
            listener,
            OutboundCall::MarkResolved {
                listener,
                async_id,
                request_id,
                return_data: return_data.clone(),
            },
        )?;
        Ok(true)
    }

    fn mark_onchain_revert(
        &self,
        listener: Address,
        async_id: B256,
        request_id: B256,
    ) -> Result<(), CallError> {
        self.enqueue(
            listener,
            OutboundCall::MarkOnchainRevert {
                listener,
                async_id,
                request_id,
            },
        )
    }

    fn call_app_gateway(&self, app_gateway: Address, payload: &Bytes) -> Result<(), CallError> {
        self.enqueue(
            app_gateway,
            OutboundCall::CallAppGateway {
                app_gateway,
                payload: payload.clone(),
            },
        )
    }

    fn call_from_inbox(
        &self,
        app_gateway: Address,
        chain_slug: u32,
        plug: Address,
        payload: &Bytes,
        params: B256,
    ) -> Result<(), CallError> {
        self.enqueue(
            app_gateway,
            OutboundCall::CallFromInbox {
                app_gateway,
                chain_slug,
                plug,
                payload: payload.clone(),
                params,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_are_queued_in_order() {
        let (host, mut rx) = ChannelHost::new();
        let gateway = Address::repeat_byte(7);
        host.call_app_gateway(gateway, &Bytes::from_static(b"ping")).unwrap();
        assert!(host
            .mark_resolved(gateway, B256::ZERO, B256::repeat_byte(1), &Bytes::new())
            .unwrap());

        assert!(matches!(rx.try_recv().unwrap(), OutboundCall::CallAppGateway { .. }));
        assert!(matches!(rx.try_recv().unwrap(), OutboundCall::MarkResolved { .. }));
    }

    #[test]
    fn test_closed_channel_is_a_call_error() {
        let (host, rx) = ChannelHost::new();
        drop(rx);
        let err = host
            .call_app_gateway(Address::ZERO, &Bytes::new())
            .unwrap_err();
        assert_eq!(err.0, "delivery channel closed");
    }
}
