//! Event journal
//!
//! Handles:
//! - Operation outcomes, committed or failed
//! - Committed events, in emission order
//! - Per-subject event history
//! - Journal statistics

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemoryJournal;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::CoordinatorResult;
use crate::events::CoordinatorEvent;

/// One operation as seen by the journal
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub operation_id: Uuid,
    pub operation: String,
    pub caller: Address,
    /// Error code when the operation failed
    pub error_code: Option<String>,
    pub events: Vec<CoordinatorEvent>,
    pub recorded_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(operation: &str, caller: Address) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            operation: operation.to_string(),
            caller,
            error_code: None,
            events: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error_code.is_none()
    }
}

/// Journal statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct JournalStats {
    pub operations: u64,
    pub failed: u64,
    pub events_by_type: HashMap<String, u64>,
}

/// Destination for journal entries
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, entry: &JournalEntry) -> CoordinatorResult<()>;

    /// Events that refer to `subject_id`, oldest first
    async fn events_for(&self, subject_id: B256) -> CoordinatorResult<Vec<CoordinatorEvent>>;

    async fn stats(&self) -> CoordinatorResult<JournalStats>;

    async fn health_check(&self) -> CoordinatorResult<()>;
}
