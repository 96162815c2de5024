//! Async request registry
//!
//! Requests move through submit, root commitment, attestation, execution
//! and resolution or revert. Each step is a separate operation, possibly
//! far apart in time, and each operation is atomic.

pub mod inbox;
pub mod lifecycle;
pub mod promise;
pub mod request;
pub mod timeout;

pub use inbox::{InboxCall, InboxFailure, InboxGuard, InboxReport};
pub use lifecycle::{RegistryConfig, RegistryStats, RequestRegistry};
pub use promise::{Delivery, ExecutionTracker, FanOutReport, PromiseDispatcher};
pub use request::{commitment_root, AsyncRequest, RequestDetails, ResolvedPromise};
pub use timeout::{TimeoutAction, TimeoutRequest, TimeoutScheduler};
