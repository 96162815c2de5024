//! Interfaces to collaborators outside the coordination core
//!
//! - Connection registry: which app gateway and switchboard own a plug
//! - Contract host: invokes listener, gateway and inbox entry points
//! - Batch status: read-only view of which async ids have executed

pub mod channel;
pub mod connections;

pub use channel::{ChannelHost, OutboundCall};
pub use connections::StaticConnections;

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owner and verifier registered for a (chain, plug) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugConfig {
    pub app_gateway: Address,
    pub switchboard: Address,
}

/// Failure reported by an invoked contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallError(pub String);

/// Plug ownership lookups
pub trait ConnectionRegistry: Send + Sync {
    /// Owner and switchboard of `plug` on `chain_slug`, if registered
    fn plug_config(&self, chain_slug: u32, plug: Address) -> Option<PlugConfig>;

    /// App gateway owning `contract`, or `contract` itself when unregistered
    fn core_app_gateway(&self, contract: Address) -> Address;
}

/// Invocation of contracts the coordinator calls into
#[cfg_attr(test, mockall::automock)]
pub trait ContractHost: Send + Sync {
    /// Deliver a resolved result; `Ok(false)` means the listener declined it
    fn mark_resolved(
        &self,
        listener: Address,
        async_id: B256,
        request_id: B256,
        return_data: &Bytes,
    ) -> Result<bool, CallError>;

    /// Tell a listener its request reverted on the target chain
    fn mark_onchain_revert(
        &self,
        listener: Address,
        async_id: B256,
        request_id: B256,
    ) -> Result<(), CallError>;

    /// Run a timeout payload against its app gateway
    fn call_app_gateway(&self, app_gateway: Address, payload: &Bytes) -> Result<(), CallError>;

    /// Deliver an inbox message from a plug to its app gateway
    fn call_from_inbox(
        &self,
        app_gateway: Address,
        chain_slug: u32,
        plug: Address,
        payload: &Bytes,
        params: B256,
    ) -> Result<(), CallError>;
}

/// Read-only view of executed batches
///
/// Execution is scoped to the app gateway whose request resolved, so one
/// gateway cannot release escrow held under another gateway's async id.
pub trait BatchStatus: Send + Sync {
    fn is_executed(&self, app_gateway: Address, async_id: &B256) -> bool;
}
