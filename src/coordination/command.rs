//! Operations accepted by the engine
//!
//! A command names one registry or ledger operation together with its
//! arguments. The caller is established by whoever accepted the command
//! and is checked by the operation itself.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorResult;
use crate::fees::{Bid, FeeWithdrawal, FeesData};
use crate::limiter::{DefaultLimit, LimitKind, UpdateLimitParams};
use crate::registry::{
    FanOutReport, InboxCall, InboxReport, RequestDetails, RequestRegistry, ResolvedPromise,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Command {
    Finalize {
        details: RequestDetails,
        transmitter: Address,
    },
    Query {
        chain_slug: u32,
        target: Address,
        app_gateway: Address,
        #[serde(default)]
        listeners: Vec<Address>,
        #[serde(default)]
        payload: Bytes,
    },
    Finalized {
        request_id: B256,
        signature: Bytes,
    },
    ResolvePromises {
        results: Vec<ResolvedPromise>,
    },
    MarkRevert {
        request_id: B256,
        is_onchain_revert: bool,
    },
    SetTimeout {
        app_gateway: Address,
        #[serde(default)]
        payload: Bytes,
        delay_secs: u64,
    },
    ResolveTimeout {
        timeout_id: B256,
    },
    CallAppGateways {
        calls: Vec<InboxCall>,
    },
    UpdateLimitParams {
        updates: Vec<UpdateLimitParams>,
    },
    SetDefaultLimit {
        kind: LimitKind,
        limit: DefaultLimit,
    },
    SetMaxTimeoutDelay {
        delay_secs: u64,
    },
    SetExpiryTime {
        expiry_secs: u64,
    },
    IncrementFeesDeposited {
        chain_slug: u32,
        app_gateway: Address,
        token: Address,
        amount: U256,
    },
    BlockFees {
        app_gateway: Address,
        fees: FeesData,
        async_id: B256,
    },
    UpdateTransmitterFees {
        #[serde(default)]
        winning_bid: Option<Bid>,
        async_id: B256,
    },
    WithdrawTransmitterFees {
        transmitter: Address,
        chain_slug: u32,
        token: Address,
        receiver: Address,
    },
    UpdateBlockedFees {
        async_id: B256,
        fees_used: U256,
    },
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Finalize { request_id: B256, root: B256 },
    Request { request_id: B256 },
    Timeout { timeout_id: B256 },
    FanOut(FanOutReport),
    Inbox(InboxReport),
    Withdrawal(Option<FeeWithdrawal>),
    Done,
}

impl Command {
    /// Operation name for logs, metrics and the journal
    pub fn name(&self) -> &'static str {
        match self {
            Command::Finalize { .. } => "finalize",
            Command::Query { .. } => "query",
            Command::Finalized { .. } => "finalized",
            Command::ResolvePromises { .. } => "resolve_promises",
            Command::MarkRevert { .. } => "mark_revert",
            Command::SetTimeout { .. } => "set_timeout",
            Command::ResolveTimeout { .. } => "resolve_timeout",
            Command::CallAppGateways { .. } => "call_app_gateways",
            Command::UpdateLimitParams { .. } => "update_limit_params",
            Command::SetDefaultLimit { .. } => "set_default_limit",
            Command::SetMaxTimeoutDelay { .. } => "set_max_timeout_delay",
            Command::SetExpiryTime { .. } => "set_expiry_time",
            Command::IncrementFeesDeposited { .. } => "increment_fees_deposited",
            Command::BlockFees { .. } => "block_fees",
            Command::UpdateTransmitterFees { .. } => "update_transmitter_fees",
            Command::WithdrawTransmitterFees { .. } => "withdraw_transmitter_fees",
            Command::UpdateBlockedFees { .. } => "update_blocked_fees",
        }
    }

    /// Run against the registry on behalf of `caller`
    pub fn apply(
        self,
        registry: &mut RequestRegistry,
        caller: Address,
    ) -> CoordinatorResult<CommandOutput> {
        let output = match self {
            Command::Finalize {
                details,
                transmitter,
            } => {
                let (request_id, root) = registry.finalize(caller, details, transmitter)?;
                CommandOutput::Finalize { request_id, root }
            }
            Command::Query {
                chain_slug,
                target,
                app_gateway,
                listeners,
                payload,
            } => CommandOutput::Request {
                request_id: registry.query(
                    caller,
                    chain_slug,
                    target,
                    app_gateway,
                    listeners,
                    payload,
                )?,
            },
            Command::Finalized {
                request_id,
                signature,
            } => {
                registry.finalized(caller, request_id, signature)?;
                CommandOutput::Done
            }
            Command::ResolvePromises { results } => {
                CommandOutput::FanOut(registry.resolve_promises(caller, &results)?)
            }
            Command::MarkRevert {
                request_id,
                is_onchain_revert,
            } => CommandOutput::Timeout {
                timeout_id: registry.mark_revert(caller, request_id, is_onchain_revert)?,
            },
            Command::SetTimeout {
                app_gateway,
                payload,
                delay_secs,
            } => CommandOutput::Timeout {
                timeout_id: registry.set_timeout(caller, app_gateway, payload, delay_secs)?,
            },
            Command::ResolveTimeout { timeout_id } => {
                registry.resolve_timeout(caller, timeout_id)?;
                CommandOutput::Done
            }
            Command::CallAppGateways { calls } => {
                CommandOutput::Inbox(registry.call_app_gateways(caller, &calls)?)
            }
            Command::UpdateLimitParams { updates } => {
                registry.update_limit_params(caller, updates)?;
                CommandOutput::Done
            }
            Command::SetDefaultLimit { kind, limit } => {
                registry.set_default_limit(caller, kind, limit)?;
                CommandOutput::Done
            }
            Command::SetMaxTimeoutDelay { delay_secs } => {
                registry.set_max_timeout_delay(caller, delay_secs)?;
                CommandOutput::Done
            }
            Command::SetExpiryTime { expiry_secs } => {
                registry.set_expiry_time(caller, expiry_secs)?;
                CommandOutput::Done
            }
            Command::IncrementFeesDeposited {
                chain_slug,
                app_gateway,
                token,
                amount,
            } => {
                registry.increment_fees_deposited(caller, chain_slug, app_gateway, token, amount)?;
                CommandOutput::Done
            }
            Command::BlockFees {
                app_gateway,
                fees,
                async_id,
            } => {
                registry.block_fees(caller, app_gateway, fees, async_id)?;
                CommandOutput::Done
            }
            Command::UpdateTransmitterFees {
                winning_bid,
                async_id,
            } => {
                registry.update_transmitter_fees(caller, winning_bid, async_id)?;
                CommandOutput::Done
            }
            Command::WithdrawTransmitterFees {
                transmitter,
                chain_slug,
                token,
                receiver,
            } => CommandOutput::Withdrawal(registry.withdraw_transmitter_fees(
                caller,
                transmitter,
                chain_slug,
                token,
                receiver,
            )?),
            Command::UpdateBlockedFees {
                async_id,
                fees_used,
            } => {
                registry.update_blocked_fees(caller, async_id, fees_used)?;
                CommandOutput::Done
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parses_from_rpc_json() {
        let json = r#"{
            "method": "set_timeout",
            "app_gateway": "0x2222222222222222222222222222222222222222",
            "payload": "0x01",
            "delay_secs": 3600
        }"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command.name(), "set_timeout");
        assert!(matches!(
            command,
            Command::SetTimeout { delay_secs: 3600, .. }
        ));
    }

    #[test]
    fn test_limit_update_keeps_fixed_point_precision() {
        let json = r#"{
            "method": "update_limit_params",
            "updates": [{
                "kind": "finalize",
                "app_gateway": "0x2222222222222222222222222222222222222222",
                "max_limit": "100000000000000000000",
                "rate_per_second": "1000000000000000000"
            }]
        }"#;
        match serde_json::from_str::<Command>(json).unwrap() {
            Command::UpdateLimitParams { updates } => {
                assert_eq!(updates[0].max_limit, 100 * crate::limiter::LIMIT_UNIT);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
