//! Request registry: the async request and timeout state machine
//!
//! Every operation validates and computes before mutating anything, stages
//! its events in an [`EventLog`], and publishes them to the outbox only
//! once it has committed. A failed operation leaves no trace.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::inbox::{InboxCall, InboxFailure, InboxGuard, InboxReport};
use super::promise::{ExecutionTracker, FanOutReport, PromiseDispatcher};
use super::request::{commitment_root, AsyncRequest, RequestDetails, ResolvedPromise};
use super::timeout::{TimeoutAction, TimeoutRequest, TimeoutScheduler};
use crate::access::{AccessControl, Role};
use crate::clock::Clock;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{CoordinatorEvent, EventLog};
use crate::fees::{Bid, FeeInfo, FeeLedger, FeeWithdrawal, FeesData};
use crate::host::{ConnectionRegistry, ContractHost};
use crate::ids;
use crate::limiter::{DefaultLimit, LimitKind, LimitParams, RateLimiter, UpdateLimitParams};

/// Static registry parameters
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address timeout ids are scoped to
    pub address: Address,
    /// Address fee withdrawal ids are scoped to
    pub fees_address: Address,
    pub access: AccessControl,
    /// Ceiling for `set_timeout` delays
    pub max_timeout_delay_secs: u64,
    /// Delay between a revert and its fee settlement
    pub expiry_time_secs: u64,
    /// Per-kind default buckets
    pub default_limits: Vec<(LimitKind, DefaultLimit)>,
}

/// Counters exposed by `/stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub requests: usize,
    pub attested: usize,
    pub finalize_counter: u64,
    pub query_counter: u64,
    pub timeouts: usize,
    pub pending_timeouts: usize,
    pub inbox_calls: usize,
    pub executed_batches: usize,
    pub queued_events: usize,
}

/// Owns requests, signatures, timeouts and the inbox guard, and drives the
/// limiter and fee ledger
pub struct RequestRegistry {
    address: Address,
    access: AccessControl,
    expiry_time_secs: u64,
    connections: Arc<dyn ConnectionRegistry>,
    host: Arc<dyn ContractHost>,
    clock: Arc<dyn Clock>,
    dispatcher: PromiseDispatcher,
    limiter: RateLimiter,
    fees: FeeLedger,
    timeouts: TimeoutScheduler,
    inbox: InboxGuard,
    execution: Arc<ExecutionTracker>,
    requests: HashMap<B256, AsyncRequest>,
    signatures: HashMap<B256, Bytes>,
    finalize_counter: u64,
    query_counter: u64,
    /// Committed events not yet drained
    outbox: EventLog,
}

impl RequestRegistry {
    pub fn new(
        config: RegistryConfig,
        connections: Arc<dyn ConnectionRegistry>,
        host: Arc<dyn ContractHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let execution = Arc::new(ExecutionTracker::new());
        let mut limiter = RateLimiter::new(config.access.delivery_helper, connections.clone());
        for (kind, limit) in &config.default_limits {
            limiter.set_default_limit(*kind, limit.max_limit, limit.rate_per_second);
        }

        Self {
            address: config.address,
            access: config.access,
            expiry_time_secs: config.expiry_time_secs,
            dispatcher: PromiseDispatcher::new(host.clone()),
            fees: FeeLedger::new(config.fees_address, config.access, execution.clone()),
            timeouts: TimeoutScheduler::new(config.address, config.max_timeout_delay_secs),
            limiter,
            connections,
            host,
            clock,
            inbox: InboxGuard::new(),
            execution,
            requests: HashMap::new(),
            signatures: HashMap::new(),
            finalize_counter: 0,
            query_counter: 0,
            outbox: EventLog::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn access(&self) -> AccessControl {
        self.access
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Submit a request for execution on a target chain
    ///
    /// Returns the request id and the commitment root the watcher signs.
    pub fn finalize(
        &mut self,
        caller: Address,
        details: RequestDetails,
        transmitter: Address,
    ) -> CoordinatorResult<(B256, B256)> {
        if transmitter == Address::ZERO {
            return Err(CoordinatorError::InvalidTransmitter);
        }
        if details.chain_slug == 0 {
            return Err(CoordinatorError::InvalidChainSlug);
        }

        let now = self.now();
        let app_gateway = self.limiter.resolve_principal(caller, details.app_gateway);
        let reservation = self
            .limiter
            .reserve(app_gateway, LimitKind::Finalize, 1, now)?;

        let plug = self
            .connections
            .plug_config(details.chain_slug, details.target)
            .filter(|plug| plug.app_gateway == app_gateway && plug.switchboard != Address::ZERO)
            .ok_or(CoordinatorError::InvalidConnection {
                chain_slug: details.chain_slug,
                target: details.target,
            })?;
        self.check_escrow_owner(details.async_id, app_gateway)?;

        let request_id =
            ids::encode_request_id(details.chain_slug, plug.switchboard, self.finalize_counter)?;
        let root = commitment_root(
            request_id,
            app_gateway,
            transmitter,
            details.target,
            details.gas_limit,
            &details.payload,
        );
        let request = AsyncRequest {
            origin_gateway: app_gateway,
            transmitter,
            target: details.target,
            verifier: plug.switchboard,
            gas_limit: details.gas_limit,
            async_id: details.async_id,
            commitment_root: root,
            payload: details.payload,
            listeners: details.listeners,
        };

        self.limiter.commit(reservation);
        self.finalize_counter += 1;
        self.requests.insert(request_id, request.clone());

        info!(
            "Finalize requested {} for {} on chain {}",
            hex::encode(request_id),
            app_gateway,
            details.chain_slug
        );
        self.outbox.emit(CoordinatorEvent::FinalizeRequested {
            request_id,
            root,
            request,
        });
        Ok((request_id, root))
    }

    /// Submit a read-only query; the result arrives through `resolve_promises`
    pub fn query(
        &mut self,
        caller: Address,
        chain_slug: u32,
        target: Address,
        app_gateway: Address,
        listeners: Vec<Address>,
        payload: Bytes,
    ) -> CoordinatorResult<B256> {
        let now = self.now();
        let app_gateway = self.limiter.resolve_principal(caller, app_gateway);
        let reservation = self.limiter.reserve(app_gateway, LimitKind::Query, 1, now)?;
        let request_id = ids::encode_request_id(chain_slug, Address::ZERO, self.query_counter)?;

        let request = AsyncRequest {
            origin_gateway: app_gateway,
            transmitter: Address::ZERO,
            target,
            verifier: Address::ZERO,
            gas_limit: 0,
            async_id: B256::ZERO,
            commitment_root: B256::ZERO,
            payload: payload.clone(),
            listeners,
        };

        self.limiter.commit(reservation);
        self.query_counter += 1;
        self.requests.insert(request_id, request);

        debug!(
            "Query requested {} on chain {} target {}",
            hex::encode(request_id),
            chain_slug,
            target
        );
        self.outbox.emit(CoordinatorEvent::QueryRequested {
            request_id,
            chain_slug,
            target,
            app_gateway,
            payload,
        });
        Ok(request_id)
    }

    /// Publish the watcher's attestation over a request's root
    pub fn finalized(
        &mut self,
        caller: Address,
        request_id: B256,
        signature: Bytes,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        let request = self
            .requests
            .get(&request_id)
            .ok_or(CoordinatorError::RequestNotFound(request_id))?
            .clone();
        if self.signatures.contains_key(&request_id) {
            return Err(CoordinatorError::RequestAlreadyAttested(request_id));
        }

        self.signatures.insert(request_id, signature.clone());
        info!("Request {} attested", hex::encode(request_id));
        self.outbox.emit(CoordinatorEvent::Finalized {
            request_id,
            request,
            signature,
        });
        Ok(())
    }

    /// Deliver results to every listener of each request
    ///
    /// All request ids are checked before any listener is called. A failing
    /// listener is skipped; only accepted deliveries are announced.
    pub fn resolve_promises(
        &mut self,
        caller: Address,
        results: &[ResolvedPromise],
    ) -> CoordinatorResult<FanOutReport> {
        self.access.require(Role::Owner, caller)?;
        let requests = results
            .iter()
            .map(|result| {
                self.requests
                    .get(&result.request_id)
                    .cloned()
                    .ok_or(CoordinatorError::RequestNotFound(result.request_id))
            })
            .collect::<CoordinatorResult<Vec<_>>>()?;

        let now = self.now();
        let mut events = EventLog::new();
        let mut report = FanOutReport::default();
        for (result, request) in results.iter().zip(&requests) {
            report.merge(self.dispatcher.resolve(
                result.request_id,
                request,
                &result.return_data,
                &mut events,
            ));
            if request.async_id != B256::ZERO {
                self.execution
                    .mark_executed(request.origin_gateway, request.async_id, now);
            }
        }

        debug!(
            "Resolved {} promises: {} accepted, {} rejected",
            results.len(),
            report.accepted.len(),
            report.rejected.len()
        );
        self.outbox.extend(events);
        Ok(report)
    }

    /// Record a revert and schedule fee settlement after the expiry delay
    ///
    /// Returns the id of the settlement timeout.
    pub fn mark_revert(
        &mut self,
        caller: Address,
        request_id: B256,
        is_onchain_revert: bool,
    ) -> CoordinatorResult<B256> {
        self.access.require(Role::Owner, caller)?;
        let request = self
            .requests
            .get(&request_id)
            .ok_or(CoordinatorError::RequestNotFound(request_id))?
            .clone();
        self.check_escrow_owner(request.async_id, request.origin_gateway)?;

        if is_onchain_revert {
            let report = self.dispatcher.notify_revert(request_id, &request);
            if !report.rejected.is_empty() {
                warn!(
                    "{} listeners failed to handle revert of {}",
                    report.rejected.len(),
                    hex::encode(request_id)
                );
            }
        }

        let now = self.now();
        let settlement = self.timeouts.insert(
            self.address,
            request.origin_gateway,
            self.expiry_time_secs,
            TimeoutAction::SettleFees {
                async_id: request.async_id,
                transmitter: request.transmitter,
                app_gateway: request.origin_gateway,
            },
            now,
        );
        crate::metrics::record_timeout_scheduled();

        info!(
            "Request {} marked reverted (onchain: {}), fees settle at {}",
            hex::encode(request_id),
            is_onchain_revert,
            settlement.execute_at
        );
        self.outbox.emit(CoordinatorEvent::MarkedRevert {
            request_id,
            is_onchain_revert,
        });
        self.outbox.emit(CoordinatorEvent::TimeoutRequested {
            timeout_id: settlement.id,
            target: settlement.target,
            execute_at: settlement.execute_at,
        });
        Ok(settlement.id)
    }

    /// Schedule `payload` to run against the app gateway after `delay_secs`
    pub fn set_timeout(
        &mut self,
        caller: Address,
        app_gateway: Address,
        payload: Bytes,
        delay_secs: u64,
    ) -> CoordinatorResult<B256> {
        self.timeouts.check_delay(delay_secs)?;

        let now = self.now();
        let app_gateway = self.limiter.resolve_principal(caller, app_gateway);
        let reservation = self
            .limiter
            .reserve(app_gateway, LimitKind::Schedule, 1, now)?;

        self.limiter.commit(reservation);
        let timeout = self.timeouts.insert(
            caller,
            app_gateway,
            delay_secs,
            TimeoutAction::CallAppGateway { payload },
            now,
        );
        crate::metrics::record_timeout_scheduled();

        self.outbox.emit(CoordinatorEvent::TimeoutRequested {
            timeout_id: timeout.id,
            target: timeout.target,
            execute_at: timeout.execute_at,
        });
        Ok(timeout.id)
    }

    /// Run a due timeout exactly once
    pub fn resolve_timeout(&mut self, caller: Address, timeout_id: B256) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        let now = self.now();
        let timeout = self.timeouts.check_resolvable(timeout_id, now)?.clone();

        let mut events = EventLog::new();
        match &timeout.action {
            TimeoutAction::CallAppGateway { payload } => {
                self.host
                    .call_app_gateway(timeout.target, payload)
                    .map_err(|e| CoordinatorError::CallFailed {
                        target: timeout.target,
                        reason: e.0,
                    })?;
            }
            TimeoutAction::SettleFees {
                async_id,
                transmitter,
                app_gateway,
            } => {
                // settlement always completes; an escrow that moved to another
                // gateway since the revert is left untouched
                match self.fees.unblock_and_assign_fees(
                    *async_id,
                    *transmitter,
                    *app_gateway,
                    &mut events,
                ) {
                    Ok(()) => {}
                    Err(CoordinatorError::FeesRecordMismatch {
                        expected, actual, ..
                    }) => {
                        warn!(
                            "Settlement {} skipped: async id {} is escrowed for {}, not {}",
                            hex::encode(timeout_id),
                            hex::encode(async_id),
                            expected,
                            actual
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.timeouts.mark_resolved(&timeout_id, now);
        crate::metrics::record_timeout_resolved();
        debug!(
            "Timeout {} resolved at {} (due {})",
            hex::encode(timeout_id),
            now,
            timeout.execute_at
        );
        events.emit(CoordinatorEvent::TimeoutResolved {
            timeout_id,
            target: timeout.target,
            executed_at: now,
        });
        self.outbox.extend(events);
        Ok(())
    }

    /// Deliver inbox calls from plugs to their app gateways
    ///
    /// The whole batch is validated before anything is dispatched. Each call
    /// is then dispatched on its own: a delivered call consumes its id and is
    /// announced, a failed call is reported and stays retryable. The batch
    /// fails with `CallFailed` only when no call was delivered, so an error
    /// never leaves partial state behind.
    pub fn call_app_gateways(
        &mut self,
        caller: Address,
        calls: &[InboxCall],
    ) -> CoordinatorResult<InboxReport> {
        self.access.require(Role::Owner, caller)?;
        self.inbox.validate(calls, self.connections.as_ref())?;

        let mut events = EventLog::new();
        let mut report = InboxReport::default();
        for call in calls {
            let delivered = self.host.call_from_inbox(
                call.app_gateway,
                call.chain_slug,
                call.plug,
                &call.payload,
                call.params,
            );
            match delivered {
                Ok(()) => {
                    report.delivered.push(call.call_id);
                    events.emit(CoordinatorEvent::CalledAppGateway {
                        call_id: call.call_id,
                        chain_slug: call.chain_slug,
                        plug: call.plug,
                        app_gateway: call.app_gateway,
                    });
                }
                Err(e) => {
                    warn!(
                        "Inbox call {} to {} failed: {}",
                        hex::encode(call.call_id),
                        call.app_gateway,
                        e.0
                    );
                    report.failed.push(InboxFailure {
                        call_id: call.call_id,
                        app_gateway: call.app_gateway,
                        reason: e.0,
                    });
                }
            }
        }

        if report.delivered.is_empty() {
            if let Some(failure) = report.failed.first() {
                return Err(CoordinatorError::CallFailed {
                    target: failure.app_gateway,
                    reason: failure.reason.clone(),
                });
            }
        }

        for call_id in &report.delivered {
            self.inbox.consume(*call_id);
        }
        self.outbox.extend(events);
        Ok(report)
    }

    /// Level available to an app gateway, in fixed point
    pub fn current_limit(&self, kind: LimitKind, app_gateway: Address) -> CoordinatorResult<u128> {
        self.limiter.current_limit(kind, app_gateway, self.now())
    }

    pub fn limit_params(&self, kind: LimitKind, app_gateway: Address) -> LimitParams {
        self.limiter.limit_params(kind, app_gateway, self.now())
    }

    pub fn update_limit_params(
        &mut self,
        caller: Address,
        updates: Vec<UpdateLimitParams>,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        let now = self.now();
        self.limiter.update_limit_params(&updates, now);
        self.outbox
            .emit(CoordinatorEvent::LimitParamsUpdated { updates });
        Ok(())
    }

    pub fn set_default_limit(
        &mut self,
        caller: Address,
        kind: LimitKind,
        limit: DefaultLimit,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        self.limiter
            .set_default_limit(kind, limit.max_limit, limit.rate_per_second);
        Ok(())
    }

    pub fn default_limit(&self, kind: LimitKind) -> Option<DefaultLimit> {
        self.limiter.default_limit(kind)
    }

    pub fn set_max_timeout_delay(&mut self, caller: Address, secs: u64) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        self.timeouts.set_max_delay_secs(secs);
        info!("Max timeout delay set to {}s", secs);
        Ok(())
    }

    pub fn max_timeout_delay(&self) -> u64 {
        self.timeouts.max_delay_secs()
    }

    pub fn set_expiry_time(&mut self, caller: Address, secs: u64) -> CoordinatorResult<()> {
        self.access.require(Role::Owner, caller)?;
        self.expiry_time_secs = secs;
        info!("Revert settlement delay set to {}s", secs);
        Ok(())
    }

    pub fn expiry_time(&self) -> u64 {
        self.expiry_time_secs
    }

    pub fn increment_fees_deposited(
        &mut self,
        caller: Address,
        chain_slug: u32,
        app_gateway: Address,
        token: Address,
        amount: U256,
    ) -> CoordinatorResult<()> {
        let mut events = EventLog::new();
        self.fees
            .increment_fees_deposited(caller, chain_slug, app_gateway, token, amount, &mut events)?;
        self.outbox.extend(events);
        Ok(())
    }

    pub fn block_fees(
        &mut self,
        caller: Address,
        app_gateway: Address,
        fees: FeesData,
        async_id: B256,
    ) -> CoordinatorResult<()> {
        let mut events = EventLog::new();
        self.fees
            .block_fees(caller, app_gateway, fees, async_id, &mut events)?;
        self.outbox.extend(events);
        Ok(())
    }

    pub fn update_transmitter_fees(
        &mut self,
        caller: Address,
        winning_bid: Option<Bid>,
        async_id: B256,
    ) -> CoordinatorResult<()> {
        let mut events = EventLog::new();
        self.fees
            .update_transmitter_fees(caller, winning_bid, async_id, &mut events)?;
        self.outbox.extend(events);
        Ok(())
    }

    pub fn withdraw_transmitter_fees(
        &mut self,
        caller: Address,
        transmitter: Address,
        chain_slug: u32,
        token: Address,
        receiver: Address,
    ) -> CoordinatorResult<Option<FeeWithdrawal>> {
        let mut events = EventLog::new();
        let withdrawal = self.fees.withdraw_transmitter_fees(
            caller,
            transmitter,
            chain_slug,
            token,
            receiver,
            &mut events,
        )?;
        self.outbox.extend(events);
        Ok(withdrawal)
    }

    pub fn update_blocked_fees(
        &mut self,
        caller: Address,
        async_id: B256,
        fees_used: U256,
    ) -> CoordinatorResult<()> {
        let mut events = EventLog::new();
        self.fees
            .update_blocked_fees(caller, async_id, fees_used, &mut events)?;
        self.outbox.extend(events);
        Ok(())
    }

    pub fn fees(&self) -> &FeeLedger {
        &self.fees
    }

    pub fn fee_info(&self, chain_slug: u32, app_gateway: Address, token: Address) -> FeeInfo {
        self.fees.fee_info(chain_slug, app_gateway, token)
    }

    pub fn request(&self, request_id: &B256) -> Option<&AsyncRequest> {
        self.requests.get(request_id)
    }

    pub fn signature(&self, request_id: &B256) -> Option<&Bytes> {
        self.signatures.get(request_id)
    }

    pub fn timeout(&self, timeout_id: &B256) -> Option<&TimeoutRequest> {
        self.timeouts.get(timeout_id)
    }

    /// Unresolved timeouts due now, earliest first
    pub fn due_timeouts(&self) -> Vec<B256> {
        self.timeouts.due_ids(self.now())
    }

    pub fn is_executed(&self, app_gateway: Address, async_id: &B256) -> bool {
        self.execution.executed_at(app_gateway, async_id).is_some()
    }

    /// Reject an async id whose escrow belongs to another app gateway
    fn check_escrow_owner(&self, async_id: B256, app_gateway: Address) -> CoordinatorResult<()> {
        if async_id == B256::ZERO {
            return Ok(());
        }
        match self.fees.blocked_fees(&async_id) {
            Some(record) if record.app_gateway != app_gateway => {
                Err(CoordinatorError::FeesRecordMismatch {
                    async_id,
                    expected: record.app_gateway,
                    actual: app_gateway,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            requests: self.requests.len(),
            attested: self.signatures.len(),
            finalize_counter: self.finalize_counter,
            query_counter: self.query_counter,
            timeouts: self.timeouts.len(),
            pending_timeouts: self.timeouts.pending_count(),
            inbox_calls: self.inbox.len(),
            executed_batches: self.execution.len(),
            queued_events: self.outbox.len(),
        }
    }

    /// Take every event committed since the last drain
    pub fn drain_events(&mut self) -> Vec<CoordinatorEvent> {
        self.outbox.drain()
    }
}
