//! Transactional outbox relay.
//!
//! Services write an `OutboxEntry` in the same transaction as the entity
//! change that produced it and never publish directly. The relay drains
//! pending entries in insertion order:
//!
//! 1. Read a batch of pending entries
//! 2. Publish each to the broker
//! 3. Delete on success; on failure bump the attempt count and back off
//!
//! A failed publish stops the batch so later entries never overtake it.
//!
//! # Configuration
//!
//! ```yaml
//! outbox:
//!   poll_interval_ms: 500
//!   batch_size: 100
//!   max_backoff_ms: 30000
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Envelope, MessageBroker, RoutingKey};
use crate::storage::StorageError;

// ============================================================================
// Entries
// ============================================================================

/// A message waiting to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: String,
    pub routing_key: RoutingKey,
    pub envelope: Envelope,
    /// Failed publish attempts so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(routing_key: RoutingKey, envelope: Envelope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            routing_key,
            envelope,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Storage side of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending entries first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError>;

    /// Remove an entry after it was published.
    async fn mark_dispatched(&self, id: &str) -> Result<(), StorageError>;

    /// Bump the attempt count after a failed publish.
    async fn record_dispatch_failure(&self, id: &str) -> Result<(), StorageError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Outbox relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Idle poll interval in milliseconds. Default: 500.
    pub poll_interval_ms: u64,
    /// Entries read per drain. Default: 100.
    pub batch_size: usize,
    /// Upper bound on the retry delay in milliseconds. Default: 30000.
    pub max_backoff_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
            max_backoff_ms: 30_000,
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Retry delays while the broker is refusing publishes. Unbounded.
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(self.max_backoff())
            .without_max_times()
            .with_jitter()
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    /// A publish failed; remaining entries were left for the next pass.
    pub stalled: bool,
}

/// Moves outbox entries onto the broker.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    config: OutboxConfig,
    wake: Arc<Notify>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Signal that new entries were written. Notifying before the relay is
    /// waiting is not lost.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Publish pending entries until the batch is exhausted or a publish fails.
    pub async fn drain_once(&self) -> Result<DrainReport, StorageError> {
        let entries = self.store.pending_outbox(self.config.batch_size).await?;
        let mut report = DrainReport::default();

        for entry in entries {
            match self.broker.publish(entry.routing_key, &entry.envelope).await {
                Ok(()) => {
                    self.store.mark_dispatched(&entry.id).await?;
                    report.published += 1;
                    debug!(id = %entry.id, routing_key = %entry.routing_key, "Outbox entry published");
                }
                Err(e) => {
                    warn!(
                        id = %entry.id,
                        routing_key = %entry.routing_key,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Outbox publish failed"
                    );
                    self.store.record_dispatch_failure(&entry.id).await?;
                    report.stalled = true;
                    break;
                }
            }
        }

        if report.published > 0 {
            info!(published = report.published, "Drained outbox");
        }
        Ok(report)
    }

    /// Run the relay until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> RelayHandle {
        let cancel = shutdown.child_token();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let builder = self.config.backoff();
            let mut backoff = builder.build();
            info!(
                poll_interval_ms = self.config.poll_interval_ms,
                "Outbox relay started"
            );

            loop {
                let (stalled, delay) = match self.drain_once().await {
                    Ok(report) if !report.stalled => {
                        backoff = builder.build();
                        (false, self.config.poll_interval())
                    }
                    Ok(_) => (true, backoff.next().unwrap_or(self.config.max_backoff())),
                    Err(e) => {
                        error!(error = %e, "Outbox drain failed");
                        (true, backoff.next().unwrap_or(self.config.max_backoff()))
                    }
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.wake.notified(), if !stalled => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!("Outbox relay stopped");
        });

        RelayHandle { cancel, task }
    }
}

/// Handle to a running relay task.
pub struct RelayHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the relay to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Outbox relay task failed");
        }
    }
}
