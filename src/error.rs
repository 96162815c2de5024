//! Error types for the coordinator

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::access::Role;
use crate::limiter::LimitKind;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Action {kind} is not supported for app gateway {app_gateway}")]
    ActionNotSupported { kind: LimitKind, app_gateway: Address },

    #[error("Limit exceeded for {kind} on {app_gateway}: requested {requested}, available {available}")]
    LimitExceeded {
        kind: LimitKind,
        app_gateway: Address,
        requested: u128,
        available: u128,
    },

    #[error("Invalid chain slug")]
    InvalidChainSlug,

    #[error("Invalid connection for chain {chain_slug} target {target}")]
    InvalidConnection { chain_slug: u32, target: Address },

    #[error("Invalid transmitter")]
    InvalidTransmitter,

    #[error("Timeout delay {delay_secs}s exceeds maximum {max_delay_secs}s")]
    TimeoutDelayTooLarge { delay_secs: u64, max_delay_secs: u64 },

    #[error("Timeout {0} already resolved")]
    TimeoutAlreadyResolved(B256),

    #[error("Timeout {timeout_id} cannot be resolved before {execute_at} (now {now})")]
    ResolvingTimeoutTooEarly {
        timeout_id: B256,
        execute_at: u64,
        now: u64,
    },

    #[error("Call to {target} failed: {reason}")]
    CallFailed { target: Address, reason: String },

    #[error("App gateway already called for call id {0}")]
    AppGatewayAlreadyCalled(B256),

    #[error("Invalid inbox caller: gateway {app_gateway} chain {chain_slug} plug {plug}")]
    InvalidInboxCaller {
        app_gateway: Address,
        chain_slug: u32,
        plug: Address,
    },

    #[error("Insufficient available fees for {app_gateway} on chain {chain_slug}: available {available}, required {required}")]
    InsufficientAvailableFees {
        chain_slug: u32,
        app_gateway: Address,
        available: U256,
        required: U256,
    },

    #[error("Caller {caller} is not the {role}")]
    Unauthorized { role: Role, caller: Address },

    #[error("Missing or unknown API credential")]
    Unauthenticated,

    #[error("Request {0} not found")]
    RequestNotFound(B256),

    #[error("Request {0} already attested")]
    RequestAlreadyAttested(B256),

    #[error("Timeout {0} not found")]
    TimeoutNotFound(B256),

    #[error("No blocked fees recorded for async id {0}")]
    FeesRecordNotFound(B256),

    #[error("Fees already blocked for async id {0}")]
    FeesAlreadyBlocked(B256),

    #[error("Blocked fees for async id {async_id} belong to {expected}, not {actual}")]
    FeesRecordMismatch {
        async_id: B256,
        expected: Address,
        actual: Address,
    },

    #[error("Bid fee {fee} exceeds max fee {max_fee} for async id {async_id}")]
    BidExceedsMaxFee {
        async_id: B256,
        fee: U256,
        max_fee: U256,
    },

    #[error("Fees used {fees_used} exceed blocked amount {blocked} for async id {async_id}")]
    FeesUsedExceedsBlocked {
        async_id: B256,
        fees_used: U256,
        blocked: U256,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Check if the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::LimitExceeded { .. }
                | CoordinatorError::ResolvingTimeoutTooEarly { .. }
                | CoordinatorError::CallFailed { .. }
                | CoordinatorError::Database(_)
        )
    }

    /// Stable error code for API responses and metrics
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::ActionNotSupported { .. } => "action_not_supported",
            CoordinatorError::LimitExceeded { .. } => "limit_exceeded",
            CoordinatorError::InvalidChainSlug => "invalid_chain_slug",
            CoordinatorError::InvalidConnection { .. } => "invalid_connection",
            CoordinatorError::InvalidTransmitter => "invalid_transmitter",
            CoordinatorError::TimeoutDelayTooLarge { .. } => "timeout_delay_too_large",
            CoordinatorError::TimeoutAlreadyResolved(_) => "timeout_already_resolved",
            CoordinatorError::ResolvingTimeoutTooEarly { .. } => "resolving_timeout_too_early",
            CoordinatorError::CallFailed { .. } => "call_failed",
            CoordinatorError::AppGatewayAlreadyCalled(_) => "app_gateway_already_called",
            CoordinatorError::InvalidInboxCaller { .. } => "invalid_inbox_caller",
            CoordinatorError::InsufficientAvailableFees { .. } => "insufficient_available_fees",
            CoordinatorError::Unauthorized { .. } => "unauthorized",
            CoordinatorError::Unauthenticated => "unauthenticated",
            CoordinatorError::RequestNotFound(_) => "request_not_found",
            CoordinatorError::RequestAlreadyAttested(_) => "request_already_attested",
            CoordinatorError::TimeoutNotFound(_) => "timeout_not_found",
            CoordinatorError::FeesRecordNotFound(_) => "fees_record_not_found",
            CoordinatorError::FeesAlreadyBlocked(_) => "fees_already_blocked",
            CoordinatorError::FeesRecordMismatch { .. } => "fees_record_mismatch",
            CoordinatorError::BidExceedsMaxFee { .. } => "bid_exceeds_max_fee",
            CoordinatorError::FeesUsedExceedsBlocked { .. } => "fees_used_exceeds_blocked",
            CoordinatorError::Config(_) => "config",
            CoordinatorError::Database(_) => "database",
            CoordinatorError::Internal(_) => "internal",
        }
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
