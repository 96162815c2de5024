//! Coordination engine for the registry service
//!
//! The coordination engine:
//! 1. Serialises registry, limiter and ledger operations behind one lock
//! 2. Journals every operation outcome and the events it committed
//! 3. Broadcasts committed events to subscribers
//! 4. Sweeps due timeouts on an interval

pub mod command;
pub mod engine;

pub use command::{Command, CommandOutput};
pub use engine::CoordinationEngine;
