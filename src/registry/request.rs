//! Async request records and the commitment root

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// Execution request as submitted by an app gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    /// App gateway the request is made for; honoured only for the delivery helper
    pub app_gateway: Address,
    pub chain_slug: u32,
    /// Plug on the target chain
    pub target: Address,
    pub gas_limit: u64,
    pub payload: Bytes,
    pub async_id: B256,
    /// Contracts notified when the request resolves
    #[serde(default)]
    pub listeners: Vec<Address>,
}

/// Stored request, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncRequest {
    pub origin_gateway: Address,
    pub transmitter: Address,
    pub target: Address,
    /// Switchboard verifying the request on the target chain
    pub verifier: Address,
    pub gas_limit: u64,
    pub async_id: B256,
    pub commitment_root: B256,
    pub payload: Bytes,
    pub listeners: Vec<Address>,
}

/// Result relayed back from the target chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPromise {
    pub request_id: B256,
    #[serde(default)]
    pub return_data: Bytes,
}

/// Content commitment signed by the watcher
///
/// `keccak256(abi.encode(requestId, appGateway, transmitter, target, gasLimit, payload))`
/// with `gasLimit` as `uint256`. Every watcher must recompute this exactly.
pub fn commitment_root(
    request_id: B256,
    app_gateway: Address,
    transmitter: Address,
    target: Address,
    gas_limit: u64,
    payload: &Bytes,
) -> B256 {
    let encoded = (
        request_id,
        app_gateway,
        transmitter,
        target,
        U256::from(gas_limit),
        payload.clone(),
    )
        .abi_encode_params();
    keccak256(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(bytes);
        out
    }

    #[test]
    fn test_root_matches_manual_abi_encoding() {
        let request_id = B256::repeat_byte(0x01);
        let app_gateway = Address::repeat_byte(0x02);
        let transmitter = Address::repeat_byte(0x03);
        let target = Address::repeat_byte(0x04);
        let payload = Bytes::from_static(b"increase(1)");

        let mut expected = Vec::new();
        expected.extend_from_slice(request_id.as_slice());
        expected.extend_from_slice(&word(app_gateway.as_slice()));
        expected.extend_from_slice(&word(transmitter.as_slice()));
        expected.extend_from_slice(&word(target.as_slice()));
        expected.extend_from_slice(&word(&1_000_000u64.to_be_bytes()));
        // offset of the dynamic payload: six head words
        expected.extend_from_slice(&word(&[0xc0]));
        expected.extend_from_slice(&word(&[payload.len() as u8]));
        let mut tail = payload.to_vec();
        tail.resize(32, 0);
        expected.extend_from_slice(&tail);

        let root = commitment_root(request_id, app_gateway, transmitter, target, 1_000_000, &payload);
        assert_eq!(root, keccak256(&expected));
    }

    #[test]
    fn test_root_binds_every_field() {
        let payload = Bytes::from_static(b"x");
        let base = commitment_root(B256::ZERO, Address::ZERO, Address::ZERO, Address::ZERO, 1, &payload);
        assert_ne!(
            base,
            commitment_root(B256::ZERO, Address::ZERO, Address::ZERO, Address::ZERO, 2, &payload)
        );
        assert_ne!(
            base,
            commitment_root(
                B256::ZERO,
                Address::ZERO,
                Address::repeat_byte(1),
                Address::ZERO,
                1,
                &payload
            )
        );
    }
}
