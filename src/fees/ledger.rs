//! Escrow ledger for app gateway fees

use alloy_primitives::{Address, B256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{distribute_fee_payload, Bid, BlockedFees, FeeInfo, FeeWithdrawal, FeesData};
use crate::access::{AccessControl, Role};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{CoordinatorEvent, EventLog};
use crate::host::BatchStatus;
use crate::ids;

type BalanceKey = (u32, Address, Address);

/// Fee balances and per-request escrow
pub struct FeeLedger {
    /// Address fee withdrawal ids are scoped to
    address: Address,
    /// Role holders
    access: AccessControl,
    /// (chain, app gateway, token) -> balance
    balances: HashMap<BalanceKey, FeeInfo>,
    /// (chain, transmitter, token) -> fees assigned on revert, not yet withdrawn
    earnings: HashMap<BalanceKey, U256>,
    /// async id -> escrow
    blocked: HashMap<B256, BlockedFees>,
    /// transmitter -> async ids awaiting withdrawal
    transmitter_async_ids: HashMap<Address, Vec<B256>>,
    /// Executed-batch lookups
    batch_status: Arc<dyn BatchStatus>,
    /// Next fee withdrawal counter
    fees_counter: u64,
}

impl FeeLedger {
    /// Create an empty ledger
    pub fn new(address: Address, access: AccessControl, batch_status: Arc<dyn BatchStatus>) -> Self {
        Self {
            address,
            access,
            balances: HashMap::new(),
            earnings: HashMap::new(),
            blocked: HashMap::new(),
            transmitter_async_ids: HashMap::new(),
            batch_status,
            fees_counter: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Balance for a (chain, principal, token) triple
    pub fn fee_info(&self, chain_slug: u32, principal: Address, token: Address) -> FeeInfo {
        self.balances
            .get(&(chain_slug, principal, token))
            .copied()
            .unwrap_or_default()
    }

    pub fn available_fees(&self, chain_slug: u32, principal: Address, token: Address) -> U256 {
        self.fee_info(chain_slug, principal, token).available()
    }

    /// Fees assigned to a transmitter and awaiting withdrawal
    pub fn transmitter_earnings(&self, chain_slug: u32, transmitter: Address, token: Address) -> U256 {
        self.earnings
            .get(&(chain_slug, transmitter, token))
            .copied()
            .unwrap_or_default()
    }

    /// Escrow held for an async id
    pub fn blocked_fees(&self, async_id: &B256) -> Option<&BlockedFees> {
        self.blocked.get(async_id)
    }

    /// Async ids indexed under a transmitter, oldest first
    pub fn pending_async_ids(&self, transmitter: Address) -> &[B256] {
        self.transmitter_async_ids
            .get(&transmitter)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    /// Credit a deposit observed on a chain's fee plug
    pub fn increment_fees_deposited(
        &mut self,
        caller: Address,
        chain_slug: u32,
        app_gateway: Address,
        token: Address,
        amount: U256,
        events: &mut EventLog,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::Watcher, caller)?;

        let info = self.fee_info(chain_slug, app_gateway, token);
        let deposited = info
            .deposited
            .checked_add(amount)
            .ok_or_else(|| CoordinatorError::Internal("deposit overflow".to_string()))?;
        self.set_balance(
            (chain_slug, app_gateway, token),
            FeeInfo {
                deposited,
                blocked: info.blocked,
            },
        );

        info!(
            "Deposited {} of token {} for {} on chain {}",
            amount, token, app_gateway, chain_slug
        );
        events.emit(CoordinatorEvent::FeesDeposited {
            chain_slug,
            app_gateway,
            token,
            amount,
        });
        Ok(())
    }

    /// Escrow `fees.max_fee` for an auctioned request
    pub fn block_fees(
        &mut self,
        caller: Address,
        app_gateway: Address,
        fees: FeesData,
        async_id: B256,
        events: &mut EventLog,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::DeliveryHelper, caller)?;

        if self.blocked.contains_key(&async_id) {
            return Err(CoordinatorError::FeesAlreadyBlocked(async_id));
        }

        let key = (fees.chain_slug, app_gateway, fees.token);
        let info = self.fee_info(fees.chain_slug, app_gateway, fees.token);
        if info.available() < fees.max_fee {
            return Err(CoordinatorError::InsufficientAvailableFees {
                chain_slug: fees.chain_slug,
                app_gateway,
                available: info.available(),
                required: fees.max_fee,
            });
        }

        let updated = self.rebalance(key, info.deposited, info.blocked + fees.max_fee)?;
        self.set_balance(key, updated);
        self.blocked.insert(
            async_id,
            BlockedFees {
                app_gateway,
                fees,
                amount: fees.max_fee,
                transmitter: None,
            },
        );

        crate::metrics::record_fees_blocked(fees.chain_slug);
        debug!(
            "Blocked {} for async id {} ({} available)",
            fees.max_fee,
            hex::encode(async_id),
            updated.available()
        );
        events.emit(CoordinatorEvent::FeesBlocked {
            async_id,
            chain_slug: fees.chain_slug,
            app_gateway,
            token: fees.token,
            amount: fees.max_fee,
        });
        Ok(())
    }

    /// Reconcile escrow with the auction outcome
    ///
    /// Without a winner the escrow is released in full. With a winner the
    /// blocked amount becomes the bid fee and the async id is indexed under
    /// the transmitter for withdrawal.
    pub fn update_transmitter_fees(
        &mut self,
        caller: Address,
        winning_bid: Option<Bid>,
        async_id: B256,
        events: &mut EventLog,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::DeliveryHelper, caller)?;

        let record = *self
            .blocked
            .get(&async_id)
            .ok_or(CoordinatorError::FeesRecordNotFound(async_id))?;
        let key = (record.fees.chain_slug, record.app_gateway, record.fees.token);
        let info = self.fee_info(record.fees.chain_slug, record.app_gateway, record.fees.token);

        let winner = winning_bid.filter(|bid| bid.transmitter != Address::ZERO);
        let Some(bid) = winner else {
            let updated = self.rebalance(key, info.deposited, info.blocked - record.amount)?;
            self.set_balance(key, updated);
            self.blocked.remove(&async_id);
            self.unindex(record.transmitter, &async_id);

            info!(
                "No winning bid for async id {}, released {}",
                hex::encode(async_id),
                record.amount
            );
            events.emit(CoordinatorEvent::FeesUnblocked {
                async_id,
                app_gateway: record.app_gateway,
            });
            return Ok(());
        };

        if bid.fee > record.fees.max_fee {
            return Err(CoordinatorError::BidExceedsMaxFee {
                async_id,
                fee: bid.fee,
                max_fee: record.fees.max_fee,
            });
        }

        let blocked = info.blocked - record.amount + bid.fee;
        let updated = self.rebalance(key, info.deposited, blocked)?;
        self.set_balance(key, updated);

        self.unindex(record.transmitter, &async_id);
        self.transmitter_async_ids
            .entry(bid.transmitter)
            .or_default()
            .push(async_id);
        self.blocked.insert(
            async_id,
            BlockedFees {
                amount: bid.fee,
                transmitter: Some(bid.transmitter),
                ..record
            },
        );

        info!(
            "Async id {} assigned to transmitter {} at fee {}",
            hex::encode(async_id),
            bid.transmitter,
            bid.fee
        );
        events.emit(CoordinatorEvent::TransmitterFeesUpdated {
            async_id,
            transmitter: bid.transmitter,
            fee: bid.fee,
        });
        Ok(())
    }

    /// Settle everything a transmitter has earned on (chain, token)
    ///
    /// Executed async ids matching the chain and token are charged to their
    /// app gateways at the recorded winning fee; anything else stays queued.
    /// Fees previously assigned to the transmitter on revert are included.
    /// Returns `None` when nothing is withdrawable.
    pub fn withdraw_transmitter_fees(
        &mut self,
        caller: Address,
        transmitter: Address,
        chain_slug: u32,
        token: Address,
        receiver: Address,
        events: &mut EventLog,
    ) -> CoordinatorResult<Option<FeeWithdrawal>> {
        if caller != transmitter {
            self.access.require(Role::DeliveryHelper, caller)?;
        }

        let queued = self.pending_async_ids(transmitter).to_vec();
        let mut remaining = Vec::with_capacity(queued.len());
        let mut settled = Vec::new();
        let mut charges: HashMap<BalanceKey, U256> = HashMap::new();
        let mut amount = U256::ZERO;

        for async_id in queued {
            let Some(record) = self.blocked.get(&async_id) else {
                continue;
            };
            let matches = record.fees.chain_slug == chain_slug && record.fees.token == token;
            if !matches || !self.batch_status.is_executed(record.app_gateway, &async_id) {
                remaining.push(async_id);
                continue;
            }

            *charges
                .entry((chain_slug, record.app_gateway, token))
                .or_default() += record.amount;
            amount += record.amount;
            settled.push(async_id);
        }

        // compute every new balance before applying any of them
        let mut updates: HashMap<BalanceKey, FeeInfo> = HashMap::new();
        for (key, charge) in charges {
            let info = self.fee_info(key.0, key.1, key.2);
            let deposited = info.deposited.checked_sub(charge);
            let blocked = info.blocked.checked_sub(charge);
            let (Some(deposited), Some(blocked)) = (deposited, blocked) else {
                return Err(CoordinatorError::Internal(format!(
                    "escrow for {} short of {}",
                    key.1, charge
                )));
            };
            updates.insert(key, self.rebalance(key, deposited, blocked)?);
        }

        let earnings_key = (chain_slug, transmitter, token);
        let assigned = self.earnings.get(&earnings_key).copied().unwrap_or_default();
        amount += assigned;

        if amount == U256::ZERO {
            debug!(
                "Nothing withdrawable for transmitter {} on chain {}",
                transmitter, chain_slug
            );
            return Ok(None);
        }

        for (key, info) in updates {
            self.set_balance(key, info);
        }
        self.earnings.remove(&earnings_key);
        for async_id in &settled {
            self.blocked.remove(async_id);
        }
        if remaining.is_empty() {
            self.transmitter_async_ids.remove(&transmitter);
        } else {
            self.transmitter_async_ids.insert(transmitter, remaining);
        }

        let fees_id = ids::encode_local_id(self.address, self.fees_counter);
        self.fees_counter += 1;

        crate::metrics::record_fees_withdrawn(chain_slug);
        info!(
            "Transmitter {} withdrawing {} of token {} on chain {} ({} async ids settled)",
            transmitter,
            amount,
            token,
            chain_slug,
            settled.len()
        );
        events.emit(CoordinatorEvent::TransmitterFeesWithdrawn {
            fees_id,
            transmitter,
            chain_slug,
            token,
            receiver,
            amount,
        });

        Ok(Some(FeeWithdrawal {
            fees_id,
            transmitter,
            chain_slug,
            token,
            receiver,
            amount,
            payload: distribute_fee_payload(token, amount, receiver),
        }))
    }

    /// Shrink an escrow to `fees_used` once execution reports its cost
    ///
    /// The unused part is released by lowering `blocked`; `deposited` stays
    /// as it is, so `available` grows by the released amount. Nothing leaves
    /// the app gateway's balance until settlement or withdrawal.
    pub fn update_blocked_fees(
        &mut self,
        caller: Address,
        async_id: B256,
        fees_used: U256,
        events: &mut EventLog,
    ) -> CoordinatorResult<()> {
        self.access.require(Role::Watcher, caller)?;

        let record = *self
            .blocked
            .get(&async_id)
            .ok_or(CoordinatorError::FeesRecordNotFound(async_id))?;
        if fees_used > record.amount {
            return Err(CoordinatorError::FeesUsedExceedsBlocked {
                async_id,
                fees_used,
                blocked: record.amount,
            });
        }

        let released = record.amount - fees_used;
        let key = (record.fees.chain_slug, record.app_gateway, record.fees.token);
        let info = self.fee_info(key.0, key.1, key.2);
        let updated = self.rebalance(key, info.deposited, info.blocked - released)?;
        self.set_balance(key, updated);
        self.blocked.insert(
            async_id,
            BlockedFees {
                amount: fees_used,
                ..record
            },
        );

        debug!(
            "Async id {} used {}, released {}",
            hex::encode(async_id),
            fees_used,
            released
        );
        events.emit(CoordinatorEvent::BlockedFeesUpdated {
            async_id,
            fees_used,
            released,
        });
        Ok(())
    }

    /// Move an async id's escrow from its app gateway to the transmitter
    ///
    /// Triggered by the registry when a reverted request settles. A missing
    /// record means nothing was escrowed and is not an error.
    pub fn unblock_and_assign_fees(
        &mut self,
        async_id: B256,
        transmitter: Address,
        app_gateway: Address,
        events: &mut EventLog,
    ) -> CoordinatorResult<()> {
        let Some(record) = self.blocked.get(&async_id).copied() else {
            debug!("No escrow for async id {}, nothing to settle", hex::encode(async_id));
            return Ok(());
        };
        if record.app_gateway != app_gateway {
            return Err(CoordinatorError::FeesRecordMismatch {
                async_id,
                expected: record.app_gateway,
                actual: app_gateway,
            });
        }

        let key = (record.fees.chain_slug, record.app_gateway, record.fees.token);
        let info = self.fee_info(key.0, key.1, key.2);

        if transmitter == Address::ZERO {
            let updated = self.rebalance(key, info.deposited, info.blocked - record.amount)?;
            self.set_balance(key, updated);
            self.blocked.remove(&async_id);
            self.unindex(record.transmitter, &async_id);
            warn!(
                "Async id {} settled without transmitter, escrow released",
                hex::encode(async_id)
            );
            events.emit(CoordinatorEvent::FeesUnblocked {
                async_id,
                app_gateway,
            });
            return Ok(());
        }

        let charged = self.rebalance(
            key,
            info.deposited - record.amount,
            info.blocked - record.amount,
        )?;
        let earned_key = (record.fees.chain_slug, transmitter, record.fees.token);
        let credited = self
            .transmitter_earnings(earned_key.0, earned_key.1, earned_key.2)
            .checked_add(record.amount)
            .ok_or_else(|| CoordinatorError::Internal("transmitter credit overflow".to_string()))?;

        self.set_balance(key, charged);
        self.earnings.insert(earned_key, credited);
        self.blocked.remove(&async_id);
        self.unindex(record.transmitter, &async_id);

        info!(
            "Assigned {} for async id {} to transmitter {}",
            record.amount,
            hex::encode(async_id),
            transmitter
        );
        events.emit(CoordinatorEvent::FeesUnblockedAndAssigned {
            async_id,
            transmitter,
            amount: record.amount,
        });
        Ok(())
    }

    /// Validate a new balance against `blocked <= deposited`
    fn rebalance(&self, key: BalanceKey, deposited: U256, blocked: U256) -> CoordinatorResult<FeeInfo> {
        FeeInfo::checked(deposited, blocked).ok_or(CoordinatorError::InsufficientAvailableFees {
            chain_slug: key.0,
            app_gateway: key.1,
            available: deposited.saturating_sub(blocked.min(deposited)),
            required: blocked.saturating_sub(deposited),
        })
    }

    fn set_balance(&mut self, key: BalanceKey, info: FeeInfo) {
        debug_assert!(info.blocked <= info.deposited);
        self.balances.insert(key, info);
    }

    fn unindex(&mut self, transmitter: Option<Address>, async_id: &B256) {
        let Some(transmitter) = transmitter else {
            return;
        };
        if let Some(ids) = self.transmitter_async_ids.get_mut(&transmitter) {
            ids.retain(|id| id != async_id);
            if ids.is_empty() {
                self.transmitter_async_ids.remove(&transmitter);
            }
        }
    }
}
