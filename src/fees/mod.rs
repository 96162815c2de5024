//! Fee escrow accounting
//!
//! App gateways deposit fees per (chain, token). Fees for a request are
//! blocked while it is auctioned, reconciled to the winning bid, and paid
//! out to the transmitter once the batch has executed. At every step
//! `blocked <= deposited` holds for every balance.

pub mod ledger;
pub mod payload;

pub use ledger::FeeLedger;
pub use payload::distribute_fee_payload;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Balance of one (chain, app gateway, token) triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeInfo {
    pub deposited: U256,
    pub blocked: U256,
}

impl FeeInfo {
    /// Balance with the given totals, or `None` if it would over-block
    pub fn checked(deposited: U256, blocked: U256) -> Option<FeeInfo> {
        (blocked <= deposited).then_some(FeeInfo { deposited, blocked })
    }

    pub fn available(&self) -> U256 {
        self.deposited.saturating_sub(self.blocked)
    }
}

/// Fee cap attached to an auctioned request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeesData {
    pub chain_slug: u32,
    pub token: Address,
    pub max_fee: U256,
}

/// Escrow held for one async id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedFees {
    pub app_gateway: Address,
    pub fees: FeesData,
    /// Currently blocked amount: the cap until a bid wins, then the bid fee
    pub amount: U256,
    /// Winning transmitter, once the auction has closed
    pub transmitter: Option<Address>,
}

/// Auction outcome for an async id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub transmitter: Address,
    pub fee: U256,
    #[serde(default)]
    pub extra_data: Bytes,
}

/// Payout prepared for a transmitter
///
/// The payload must be routed through `finalize` to the chain's fee plug
/// before anything is paid on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeWithdrawal {
    pub fees_id: B256,
    pub transmitter: Address,
    pub chain_slug: u32,
    pub token: Address,
    pub receiver: Address,
    pub amount: U256,
    pub payload: Bytes,
}
