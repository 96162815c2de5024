//! Role guard for privileged entry points
//!
//! Every privileged operation names the role it requires and checks the
//! caller against the statically configured role holders before touching
//! any state.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Principal roles known to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Administers limits and timeouts, relays attestations and results
    Owner,
    /// Trust anchor that credits deposits and reports fee usage
    Watcher,
    /// Routes app gateway requests into auctions and blocks their fees
    DeliveryHelper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Owner => "owner",
            Role::Watcher => "watcher",
            Role::DeliveryHelper => "delivery helper",
        };
        f.write_str(name)
    }
}

/// Role holders, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessControl {
    pub owner: Address,
    pub watcher: Address,
    pub delivery_helper: Address,
}

impl AccessControl {
    pub fn new(owner: Address, watcher: Address, delivery_helper: Address) -> Self {
        Self {
            owner,
            watcher,
            delivery_helper,
        }
    }

    /// Address currently holding a role
    pub fn holder(&self, role: Role) -> Address {
        match role {
            Role::Owner => self.owner,
            Role::Watcher => self.watcher,
            Role::DeliveryHelper => self.delivery_helper,
        }
    }

    pub fn has_role(&self, role: Role, caller: Address) -> bool {
        caller != Address::ZERO && self.holder(role) == caller
    }

    /// Fail with `Unauthorized` unless `caller` holds `role`
    pub fn require(&self, role: Role, caller: Address) -> CoordinatorResult<()> {
        if self.has_role(role, caller) {
            Ok(())
        } else {
            Err(CoordinatorError::Unauthorized { role, caller })
        }
    }
}
