//! Bearer-token authentication for operations

use alloy_primitives::{keccak256, Address, B256};
use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use tracing::debug;

use crate::config::ApiCredential;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Addresses callers act as, keyed by the keccak hash of their token
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    callers: HashMap<B256, Address>,
}

impl Credentials {
    pub fn new(entries: &[ApiCredential]) -> Self {
        let callers = entries
            .iter()
            .map(|entry| (keccak256(entry.token.as_bytes()), entry.address))
            .collect();
        Self { callers }
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }

    /// Address bound to the request's `Authorization: Bearer` token
    pub fn authenticate(&self, headers: &HeaderMap) -> CoordinatorResult<Address> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(CoordinatorError::Unauthenticated)?;

        match self.callers.get(&keccak256(token.as_bytes())) {
            Some(address) => Ok(*address),
            None => {
                debug!("Rejected unknown bearer token");
                Err(CoordinatorError::Unauthenticated)
            }
        }
    }
}
