//! Shared fixture for scenario tests

#![allow(dead_code)]

use alloy_primitives::{Address, Bytes, B256};
use async_coordinator::access::AccessControl;
use async_coordinator::clock::ManualClock;
use async_coordinator::host::{CallError, ContractHost, StaticConnections};
use async_coordinator::limiter::{DefaultLimit, LimitKind, LIMIT_UNIT};
use async_coordinator::registry::{RegistryConfig, RequestDetails, RequestRegistry};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub const CHAIN: u32 = 421614;

pub fn owner() -> Address {
    Address::repeat_byte(0x01)
}

pub fn watcher() -> Address {
    Address::repeat_byte(0x02)
}

pub fn helper() -> Address {
    Address::repeat_byte(0x03)
}

pub fn gateway() -> Address {
    Address::repeat_byte(0x10)
}

pub fn plug() -> Address {
    Address::repeat_byte(0x20)
}

/// Second gateway, connected through [`other_plug`]
pub fn other_gateway() -> Address {
    Address::repeat_byte(0x11)
}

pub fn other_plug() -> Address {
    Address::repeat_byte(0x21)
}

pub fn switchboard() -> Address {
    Address::repeat_byte(0x30)
}

pub fn transmitter() -> Address {
    Address::repeat_byte(0x40)
}

pub fn token() -> Address {
    Address::repeat_byte(0x50)
}

/// Invocation seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Resolved { listener: Address, request_id: B256 },
    Reverted { listener: Address, request_id: B256 },
    Gateway { app_gateway: Address, payload: Bytes },
    Inbox { app_gateway: Address, params: B256 },
}

/// Host that records invocations and fails for chosen listeners
#[derive(Default)]
pub struct RecordingHost {
    pub failing: Mutex<HashSet<Address>>,
    pub invocations: Mutex<Vec<Invocation>>,
}

impl RecordingHost {
    pub fn fail_for(&self, address: Address) {
        self.failing.lock().unwrap().insert(address);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn check(&self, address: Address) -> Result<(), CallError> {
        if self.failing.lock().unwrap().contains(&address) {
            Err(CallError(format!("{} reverted", address)))
        } else {
            Ok(())
        }
    }
}

impl ContractHost for RecordingHost {
    fn mark_resolved(
        &self,
        listener: Address,
        _async_id: B256,
        request_id: B256,
        _return_data: &Bytes,
    ) -> Result<bool, CallError> {
        self.check(listener)?;
        self.invocations
            .lock()
            .unwrap()
            .push(Invocation::Resolved { listener, request_id });
        Ok(true)
    }

    fn mark_onchain_revert(
        &self,
        listener: Address,
        _async_id: B256,
        request_id: B256,
    ) -> Result<(), CallError> {
        self.check(listener)?;
        self.invocations
            .lock()
            .unwrap()
            .push(Invocation::Reverted { listener, request_id });
        Ok(())
    }

    fn call_app_gateway(&self, app_gateway: Address, payload: &Bytes) -> Result<(), CallError> {
        self.check(app_gateway)?;
        self.invocations.lock().unwrap().push(Invocation::Gateway {
            app_gateway,
            payload: payload.clone(),
        });
        Ok(())
    }

    fn call_from_inbox(
        &self,
        app_gateway: Address,
        _chain_slug: u32,
        _plug: Address,
        _payload: &Bytes,
        params: B256,
    ) -> Result<(), CallError> {
        self.check(app_gateway)?;
        self.invocations
            .lock()
            .unwrap()
            .push(Invocation::Inbox { app_gateway, params });
        Ok(())
    }
}

pub struct Fixture {
    pub registry: RequestRegistry,
    pub host: Arc<RecordingHost>,
    pub clock: Arc<ManualClock>,
}

/// Registry with two plugs on [`CHAIN`] and `units` of every limit kind
pub fn fixture(units: u128) -> Fixture {
    let mut connections = StaticConnections::new();
    connections.register_plug(CHAIN, plug(), gateway(), switchboard());
    connections.register_plug(CHAIN, other_plug(), other_gateway(), switchboard());

    let host = Arc::new(RecordingHost::default());
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let config = RegistryConfig {
        address: Address::repeat_byte(0xaa),
        fees_address: Address::repeat_byte(0xbb),
        access: AccessControl::new(owner(), watcher(), helper()),
        max_timeout_delay_secs: 86_400,
        expiry_time_secs: 3_600,
        default_limits: LimitKind::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    DefaultLimit {
                        max_limit: units * LIMIT_UNIT,
                        rate_per_second: LIMIT_UNIT,
                    },
                )
            })
            .collect(),
    };
    let registry = RequestRegistry::new(
        config,
        Arc::new(connections),
        host.clone(),
        clock.clone(),
    );

    Fixture {
        registry,
        host,
        clock,
    }
}

pub fn details(async_id: B256, listeners: Vec<Address>) -> RequestDetails {
    RequestDetails {
        app_gateway: gateway(),
        chain_slug: CHAIN,
        target: plug(),
        gas_limit: 1_000_000,
        payload: Bytes::from_static(b"increase(1)"),
        async_id,
        listeners,
    }
}

/// Request from [`other_gateway`] through [`other_plug`]
pub fn other_details(async_id: B256, listeners: Vec<Address>) -> RequestDetails {
    RequestDetails {
        app_gateway: other_gateway(),
        target: other_plug(),
        ..details(async_id, listeners)
    }
}
