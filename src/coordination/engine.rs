//! Coordination engine serialising every registry operation

use super::command::{Command, CommandOutput};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::CoordinatorEvent;
use crate::registry::RequestRegistry;
use crate::state::{EventSink, JournalEntry};

use alloy_primitives::{Address, B256};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Runs operations one at a time and publishes what they commit
pub struct CoordinationEngine {
    /// Registry, limiter and fee ledger state
    registry: Mutex<RequestRegistry>,
    /// Journal for committed events and operation outcomes
    sink: Arc<dyn EventSink>,
    /// Committed event fan-out
    event_tx: broadcast::Sender<CoordinatorEvent>,
    /// Configuration
    config: CoordinatorConfig,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl CoordinationEngine {
    /// Create a new coordination engine
    pub fn new(
        registry: RequestRegistry,
        sink: Arc<dyn EventSink>,
        config: CoordinatorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            registry: Mutex::new(registry),
            sink,
            event_tx,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Subscribe to committed events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Read registry state under the operation lock
    pub async fn inspect<R>(&self, f: impl FnOnce(&RequestRegistry) -> R) -> R {
        let registry = self.registry.lock().await;
        f(&registry)
    }

    /// Run one command to completion
    ///
    /// Events committed by the command are journaled, broadcast and
    /// counted; a failed command is journaled with its error code.
    pub async fn execute(
        &self,
        caller: Address,
        command: Command,
    ) -> CoordinatorResult<CommandOutput> {
        let operation = command.name();
        let started = Instant::now();
        let mut entry = JournalEntry::new(operation, caller);

        let result = {
            let mut registry = self.registry.lock().await;
            let result = command.apply(&mut registry, caller);
            entry.events = registry.drain_events();
            crate::metrics::record_pending_timeouts(registry.stats().pending_timeouts);
            result
        };

        crate::metrics::record_operation_latency(operation, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            entry.error_code = Some(e.code().to_string());
            crate::metrics::record_operation_failure(operation, e.code());
            if e.is_retryable() {
                debug!("Operation {} from {} failed, retryable: {}", operation, caller, e);
            } else {
                warn!("Operation {} from {} failed: {}", operation, caller, e);
            }
        }

        for event in &entry.events {
            crate::metrics::record_event(event.name());
            // No subscribers is not an error
            let _ = self.event_tx.send(event.clone());
        }

        if let Err(e) = self.sink.record(&entry).await {
            error!(
                "Failed to journal operation {} ({}): {}",
                entry.operation_id, operation, e
            );
        }

        result
    }

    /// Main sweep loop
    pub async fn run(&self) -> CoordinatorResult<()> {
        let mut sweep_interval = interval(Duration::from_millis(self.config.sweep_interval_ms));

        info!("Coordination engine started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            sweep_interval.tick().await;
            self.sweep_timeouts().await;
        }

        info!("Coordination engine stopped");
        Ok(())
    }

    /// Resolve every due timeout as owner
    ///
    /// Returns the ids resolved in this pass. Failures stay pending and are
    /// retried on the next pass.
    pub async fn sweep_timeouts(&self) -> Vec<B256> {
        let (owner, due) = self
            .inspect(|registry| (registry.access().owner, registry.due_timeouts()))
            .await;

        let mut resolved = Vec::with_capacity(due.len());
        for timeout_id in due {
            match self
                .execute(owner, Command::ResolveTimeout { timeout_id })
                .await
            {
                Ok(_) => resolved.push(timeout_id),
                Err(CoordinatorError::TimeoutAlreadyResolved(_)) => {}
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Timeout {} not resolved, will retry: {}",
                        hex::encode(timeout_id),
                        e
                    );
                }
                Err(e) => {
                    error!("Timeout {} cannot be resolved: {}", hex::encode(timeout_id), e);
                }
            }
        }

        if !resolved.is_empty() {
            info!("Swept {} due timeouts", resolved.len());
        }
        resolved
    }

    /// Stop the coordination engine
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Coordination engine shutdown initiated");
    }
}
