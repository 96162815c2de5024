//! In-memory connection registry loaded from configuration

use alloy_primitives::Address;
use std::collections::HashMap;

use super::{ConnectionRegistry, PlugConfig};
use crate::config::{GatewayAliasConfig, PlugEntryConfig};

/// Plug table and gateway aliases fixed at startup
#[derive(Debug, Default, Clone)]
pub struct StaticConnections {
    /// (chain slug, plug) -> owner and switchboard
    plugs: HashMap<(u32, Address), PlugConfig>,
    /// contract -> owning app gateway
    aliases: HashMap<Address, Address>,
}

impl StaticConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[[plugs]]` and `[[gateway_aliases]]` tables
    pub fn from_config(plugs: &[PlugEntryConfig], aliases: &[GatewayAliasConfig]) -> Self {
        let mut connections = Self::new();
        for plug in plugs {
            connections.register_plug(plug.chain_slug, plug.plug, plug.app_gateway, plug.switchboard);
        }
        for alias in aliases {
            connections.set_core_app_gateway(alias.contract, alias.app_gateway);
        }
        connections
    }

    pub fn register_plug(
        &mut self,
        chain_slug: u32,
        plug: Address,
        app_gateway: Address,
        switchboard: Address,
    ) -> &mut Self {
        self.plugs.insert(
            (chain_slug, plug),
            PlugConfig {
                app_gateway,
                switchboard,
            },
        );
        self
    }

    pub fn set_core_app_gateway(&mut self, contract: Address, app_gateway: Address) -> &mut Self {
        self.aliases.insert(contract, app_gateway);
        self
    }

    pub fn plug_count(&self) -> usize {
        self.plugs.len()
    }
}

impl ConnectionRegistry for StaticConnections {
    fn plug_config(&self, chain_slug: u32, plug: Address) -> Option<PlugConfig> {
        self.plugs.get(&(chain_slug, plug)).copied()
    }

    fn core_app_gateway(&self, contract: Address) -> Address {
        self.aliases.get(&contract).copied().unwrap_or(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_contract_is_its_own_gateway() {
        let connections = StaticConnections::new();
        let contract = Address::repeat_byte(4);
        assert_eq!(connections.core_app_gateway(contract), contract);
    }

    #[test]
    fn test_plug_lookup_is_chain_scoped() {
        let plug = Address::repeat_byte(1);
        let gateway = Address::repeat_byte(2);
        let switchboard = Address::repeat_byte(3);
        let mut connections = StaticConnections::new();
        connections.register_plug(421614, plug, gateway, switchboard);

        let config = connections.plug_config(421614, plug).unwrap();
        assert_eq!(config.app_gateway, gateway);
        assert_eq!(config.switchboard, switchboard);
        assert!(connections.plug_config(1, plug).is_none());
    }
}
