//! PostgreSQL state manager

use crate::config::DatabaseConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::CoordinatorEvent;

use super::{EventSink, JournalEntry, JournalStats};

use alloy_primitives::B256;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coordinator_operations (
                operation_id UUID PRIMARY KEY,
                operation VARCHAR(50) NOT NULL,
                caller VARCHAR(42) NOT NULL,
                error_code VARCHAR(50),
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coordinator_events (
                id BIGSERIAL PRIMARY KEY,
                operation_id UUID NOT NULL REFERENCES coordinator_operations (operation_id),
                sequence INTEGER NOT NULL,
                event_type VARCHAR(50) NOT NULL,
                subject_id BYTEA,
                event_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_subject
            ON coordinator_events (subject_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl EventSink for StateManager {
    /// Store an operation and its events in one transaction
    async fn record(&self, entry: &JournalEntry) -> CoordinatorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO coordinator_operations (operation_id, operation, caller, error_code, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.operation_id)
        .bind(&entry.operation)
        .bind(entry.caller.to_string())
        .bind(entry.error_code.as_deref())
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await?;

        for (sequence, event) in entry.events.iter().enumerate() {
            let event_data = serde_json::to_value(event)
                .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO coordinator_events (operation_id, sequence, event_type, subject_id, event_data)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(entry.operation_id)
            .bind(sequence as i32)
            .bind(event.name())
            .bind(event.subject_id().map(|id| id.to_vec()))
            .bind(event_data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Journaled operation {} ({}) with {} events",
            entry.operation_id,
            entry.operation,
            entry.events.len()
        );
        Ok(())
    }

    async fn events_for(&self, subject_id: B256) -> CoordinatorResult<Vec<CoordinatorEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_data FROM coordinator_events
            WHERE subject_id = $1
            ORDER BY id
            "#,
        )
        .bind(subject_id.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let data: serde_json::Value = row.get("event_data");
            match serde_json::from_value(data) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping undecodable event for {}: {}",
                    hex::encode(subject_id),
                    e
                ),
            }
        }
        Ok(events)
    }

    /// Get journal statistics
    async fn stats(&self) -> CoordinatorResult<JournalStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as operations,
                COUNT(*) FILTER (WHERE error_code IS NOT NULL) as failed
            FROM coordinator_operations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_type = sqlx::query(
            r#"
            SELECT event_type, COUNT(*) as count
            FROM coordinator_events
            GROUP BY event_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(JournalStats {
            operations: row.get::<i64, _>("operations") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            events_by_type: by_type
                .into_iter()
                .map(|r| {
                    (
                        r.get::<String, _>("event_type"),
                        r.get::<i64, _>("count") as u64,
                    )
                })
                .collect(),
        })
    }

    /// Health check
    async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
