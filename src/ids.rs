//! Bit-packed identifiers
//!
//! Request ids: `{chain slug: 32 bits}{verifier address: 160 bits}{counter: 64 bits}`.
//! Local ids (timeouts, fee withdrawals): `{zero: 32 bits}{issuer address: 160 bits}{counter: 64 bits}`.
//!
//! All fields are big-endian, so the layout is identical to
//! `(chain << 224) | (uint160(addr) << 64) | counter` read as a `uint256`.
//! Collaborators parse these ids independently; the field widths and order
//! are fixed.

use alloy_primitives::{Address, B256};

use crate::error::{CoordinatorError, CoordinatorResult};

const CHAIN_BYTES: std::ops::Range<usize> = 0..4;
const ADDRESS_BYTES: std::ops::Range<usize> = 4..24;
const COUNTER_BYTES: std::ops::Range<usize> = 24..32;

/// Decoded request id fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIdParts {
    pub chain_slug: u32,
    pub verifier: Address,
    pub counter: u64,
}

fn pack(chain_slug: u32, address: Address, counter: u64) -> B256 {
    let mut id = [0u8; 32];
    id[CHAIN_BYTES].copy_from_slice(&chain_slug.to_be_bytes());
    id[ADDRESS_BYTES].copy_from_slice(address.as_slice());
    id[COUNTER_BYTES].copy_from_slice(&counter.to_be_bytes());
    B256::from(id)
}

/// Encode a chain-scoped request id
pub fn encode_request_id(
    chain_slug: u32,
    verifier: Address,
    counter: u64,
) -> CoordinatorResult<B256> {
    if chain_slug == 0 {
        return Err(CoordinatorError::InvalidChainSlug);
    }
    Ok(pack(chain_slug, verifier, counter))
}

/// Recover the chain, verifier and counter from a request id
pub fn decode_request_id(id: &B256) -> RequestIdParts {
    let mut chain = [0u8; 4];
    chain.copy_from_slice(&id[CHAIN_BYTES]);
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&id[COUNTER_BYTES]);

    RequestIdParts {
        chain_slug: u32::from_be_bytes(chain),
        verifier: Address::from_slice(&id[ADDRESS_BYTES]),
        counter: u64::from_be_bytes(counter),
    }
}

/// Encode an id scoped to the issuing component's own address
pub fn encode_local_id(issuer: Address, counter: u64) -> B256 {
    pack(0, issuer, counter)
}

/// Recover the issuer and counter from a local id
pub fn decode_local_id(id: &B256) -> (Address, u64) {
    let parts = decode_request_id(id);
    (parts.verifier, parts.counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, U256};

    #[test]
    fn test_request_id_layout_matches_shifted_uint() {
        let verifier = address!("00000000000000000000000000000000deadbeef");
        let id = encode_request_id(421614, verifier, 7).unwrap();

        let expected = (U256::from(421614u32) << 224)
            | (U256::from_be_slice(verifier.as_slice()) << 64)
            | U256::from(7u64);
        assert_eq!(U256::from_be_bytes(id.0), expected);
    }

    #[test]
    fn test_request_id_decodes_fields() {
        let verifier = Address::repeat_byte(0xab);
        let id = encode_request_id(u32::MAX, verifier, u64::MAX).unwrap();
        let parts = decode_request_id(&id);
        assert_eq!(parts.chain_slug, u32::MAX);
        assert_eq!(parts.verifier, verifier);
        assert_eq!(parts.counter, u64::MAX);
    }

    #[test]
    fn test_zero_chain_slug_rejected() {
        let err = encode_request_id(0, Address::repeat_byte(1), 1).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidChainSlug));
    }

    #[test]
    fn test_ids_unique_across_fields() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let ids = [
            encode_request_id(1, a, 0).unwrap(),
            encode_request_id(1, a, 1).unwrap(),
            encode_request_id(2, a, 0).unwrap(),
            encode_request_id(1, b, 0).unwrap(),
            encode_local_id(a, 0),
        ];
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_local_id_has_empty_chain_field() {
        let issuer = Address::repeat_byte(9);
        let id = encode_local_id(issuer, 42);
        assert_eq!(&id[0..4], &[0u8; 4]);
        assert_eq!(decode_local_id(&id), (issuer, 42));
    }
}
