//! In-memory journal used when no database is configured
//!
//! Keeps the most recent entries up to a fixed capacity. Statistics count
//! every entry ever recorded, including trimmed ones.

use alloy_primitives::B256;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use super::{EventSink, JournalEntry, JournalStats};
use crate::error::CoordinatorResult;
use crate::events::CoordinatorEvent;

/// Entries kept by [`MemoryJournal::new`]
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Journal {
    entries: VecDeque<JournalEntry>,
    stats: JournalStats,
}

#[derive(Debug)]
pub struct MemoryJournal {
    journal: RwLock<Journal>,
    capacity: usize,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            journal: RwLock::new(Journal::default()),
            capacity: capacity.max(1),
        }
    }

    /// Retained entries, oldest first
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.journal.read().await.entries.iter().cloned().collect()
    }
}

#[async_trait]
impl EventSink for MemoryJournal {
    async fn record(&self, entry: &JournalEntry) -> CoordinatorResult<()> {
        let mut journal = self.journal.write().await;

        journal.stats.operations += 1;
        if !entry.succeeded() {
            journal.stats.failed += 1;
        }
        for event in &entry.events {
            *journal
                .stats
                .events_by_type
                .entry(event.name().to_string())
                .or_default() += 1;
        }

        journal.entries.push_back(entry.clone());
        while journal.entries.len() > self.capacity {
            journal.entries.pop_front();
        }
        Ok(())
    }

    async fn events_for(&self, subject_id: B256) -> CoordinatorResult<Vec<CoordinatorEvent>> {
        let journal = self.journal.read().await;
        Ok(journal
            .entries
            .iter()
            .flat_map(|entry| entry.events.iter())
            .filter(|event| event.subject_id() == Some(subject_id))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> CoordinatorResult<JournalStats> {
        Ok(self.journal.read().await.stats.clone())
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    #[tokio::test]
    async fn test_stats_and_subject_lookup() {
        let journal = MemoryJournal::new();
        let timeout_id = B256::repeat_byte(7);

        let mut ok = JournalEntry::new("set_timeout", Address::repeat_byte(1));
        ok.events.push(CoordinatorEvent::TimeoutRequested {
            timeout_id,
            target: Address::repeat_byte(1),
            execute_at: 10,
        });
        journal.record(&ok).await.unwrap();

        let mut failed = JournalEntry::new("resolve_timeout", Address::repeat_byte(2));
        failed.error_code = Some("resolving_timeout_too_early".to_string());
        journal.record(&failed).await.unwrap();

        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.operations, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.events_by_type.get("timeout_requested"), Some(&1));

        assert_eq!(journal.events_for(timeout_id).await.unwrap().len(), 1);
        assert!(journal.events_for(B256::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_trims_oldest_and_keeps_totals() {
        let journal = MemoryJournal::with_capacity(2);
        for i in 0..5u8 {
            let mut entry = JournalEntry::new("resolve_timeout", Address::repeat_byte(i));
            entry.error_code = Some("call_failed".to_string());
            journal.record(&entry).await.unwrap();
        }

        let entries = journal.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].caller, Address::repeat_byte(3));
        assert_eq!(entries[1].caller, Address::repeat_byte(4));

        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.operations, 5);
        assert_eq!(stats.failed, 5);
    }
}
