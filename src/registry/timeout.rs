//! Deferred one-shot callbacks
//!
//! A timeout is due once `now >= execute_at`, may be resolved any time
//! after that, and is resolved at most once.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ids;

/// What runs when a timeout resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Invoke the app gateway with the stored payload
    CallAppGateway { payload: Bytes },
    /// Assign a reverted request's escrow to its transmitter
    SettleFees {
        async_id: B256,
        transmitter: Address,
        app_gateway: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutRequest {
    pub id: B256,
    pub requester: Address,
    /// App gateway the callback runs against
    pub target: Address,
    pub delay_secs: u64,
    pub execute_at: u64,
    /// Actual resolution time, may lag `execute_at`
    pub executed_at: Option<u64>,
    pub resolved: bool,
    pub action: TimeoutAction,
}

/// Timeout records keyed by id
pub struct TimeoutScheduler {
    /// Address timeout ids are scoped to
    address: Address,
    counter: u64,
    max_delay_secs: u64,
    timeouts: HashMap<B256, TimeoutRequest>,
}

impl TimeoutScheduler {
    pub fn new(address: Address, max_delay_secs: u64) -> Self {
        Self {
            address,
            counter: 0,
            max_delay_secs,
            timeouts: HashMap::new(),
        }
    }

    pub fn max_delay_secs(&self) -> u64 {
        self.max_delay_secs
    }

    pub fn set_max_delay_secs(&mut self, max_delay_secs: u64) {
        self.max_delay_secs = max_delay_secs;
    }

    /// Reject delays above the configured ceiling
    pub fn check_delay(&self, delay_secs: u64) -> CoordinatorResult<()> {
        if delay_secs > self.max_delay_secs {
            return Err(CoordinatorError::TimeoutDelayTooLarge {
                delay_secs,
                max_delay_secs: self.max_delay_secs,
            });
        }
        Ok(())
    }

    /// Record a new timeout due `delay_secs` after `now`
    ///
    /// The ceiling is not checked here; internal settlement timeouts are
    /// exempt from it.
    pub fn insert(
        &mut self,
        requester: Address,
        target: Address,
        delay_secs: u64,
        action: TimeoutAction,
        now: u64,
    ) -> TimeoutRequest {
        let id = ids::encode_local_id(self.address, self.counter);
        self.counter += 1;

        let timeout = TimeoutRequest {
            id,
            requester,
            target,
            delay_secs,
            execute_at: now.saturating_add(delay_secs),
            executed_at: None,
            resolved: false,
            action,
        };
        debug!(
            "Timeout {} scheduled for {} at {}",
            hex::encode(id),
            target,
            timeout.execute_at
        );
        self.timeouts.insert(id, timeout.clone());
        timeout
    }

    pub fn get(&self, id: &B256) -> Option<&TimeoutRequest> {
        self.timeouts.get(id)
    }

    /// The timeout, if it exists, is unresolved and is due at `now`
    pub fn check_resolvable(&self, id: B256, now: u64) -> CoordinatorResult<&TimeoutRequest> {
        let timeout = self
            .timeouts
            .get(&id)
            .ok_or(CoordinatorError::TimeoutNotFound(id))?;
        if timeout.resolved {
            return Err(CoordinatorError::TimeoutAlreadyResolved(id));
        }
        if now < timeout.execute_at {
            return Err(CoordinatorError::ResolvingTimeoutTooEarly {
                timeout_id: id,
                execute_at: timeout.execute_at,
                now,
            });
        }
        Ok(timeout)
    }

    pub fn mark_resolved(&mut self, id: &B256, now: u64) {
        if let Some(timeout) = self.timeouts.get_mut(id) {
            timeout.resolved = true;
            timeout.executed_at = Some(now);
        }
    }

    /// Unresolved timeouts due at `now`, earliest first
    pub fn due_ids(&self, now: u64) -> Vec<B256> {
        let mut due: Vec<(u64, B256)> = self
            .timeouts
            .values()
            .filter(|t| !t.resolved && t.execute_at <= now)
            .map(|t| (t.execute_at, t.id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.timeouts.values().filter(|t| !t.resolved).count()
    }

    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }
}
