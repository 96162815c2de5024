//! Coordination layer for asynchronous multi-chain requests
//!
//! App gateways submit work for execution on independent target chains.
//! This crate records those requests and reconciles their results:
//! - [`registry`]: request, timeout and inbox lifecycle
//! - [`limiter`]: per-principal token buckets gating every action
//! - [`fees`]: escrow of app gateway fees and transmitter payouts
//!
//! The service around them ([`coordination`], [`api`], [`state`],
//! [`metrics`]) serialises operations, journals committed events and
//! exposes everything over HTTP.

pub mod access;
pub mod api;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod fees;
pub mod host;
pub mod ids;
pub mod limiter;
pub mod metrics;
pub mod registry;
pub mod state;

pub use error::{CoordinatorError, CoordinatorResult};
