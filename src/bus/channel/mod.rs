//! In-memory broker for standalone mode and tests.
//!
//! Mirrors the AMQP topology inside one process: every queue is a FIFO that
//! receives the union of its bound routing keys. Consumers on the same queue
//! compete for messages, hold at most one in flight, and requeue at the
//! front on handler failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dispatch::process_message;
use super::{BrokerError, Envelope, MessageBroker, MessageHandler, Queue, Result, RoutingKey};

/// A message as it sits in a queue: raw bytes, decoded per delivery.
#[derive(Debug, Clone)]
struct RawMessage {
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<RawMessage>>,
    notify: Notify,
}

impl QueueState {
    async fn push_back(&self, message: RawMessage) {
        self.messages.lock().await.push_back(message);
        self.notify.notify_one();
    }

    async fn requeue(&self, mut message: RawMessage) {
        message.redelivered = true;
        self.messages.lock().await.push_front(message);
        self.notify.notify_one();
    }

    /// Wait for the next message. Cancellation-safe: nothing is removed
    /// unless the future completes.
    async fn pop(&self) -> RawMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.messages.lock().await.pop_front() {
                return message;
            }
            notified.await;
        }
    }
}

/// In-process broker with AMQP-like routing, ack and requeue semantics.
pub struct ChannelBroker {
    queues: HashMap<Queue, Arc<QueueState>>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBroker {
    /// Create a broker with every queue of the topology declared.
    pub fn new() -> Self {
        let queues = Queue::ALL
            .into_iter()
            .map(|queue| (queue, Arc::new(QueueState::default())))
            .collect();

        info!("Channel broker initialized");

        Self {
            queues,
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
        }
    }

    fn queue(&self, queue: Queue) -> Result<&Arc<QueueState>> {
        self.queues
            .get(&queue)
            .ok_or_else(|| BrokerError::Consume(format!("queue {} not declared", queue)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    /// Number of messages waiting in `queue` (not counting in-flight ones).
    pub async fn pending(&self, queue: Queue) -> usize {
        match self.queues.get(&queue) {
            Some(state) => state.messages.lock().await.len(),
            None => 0,
        }
    }

    /// Place raw bytes straight onto a queue, bypassing routing and encoding.
    pub async fn inject_raw(
        &self,
        queue: Queue,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.queue(queue)?
            .push_back(RawMessage {
                routing_key: routing_key.into(),
                payload,
                redelivered: false,
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for ChannelBroker {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %key, owner_id = %envelope.owner_id))]
    async fn publish(&self, key: RoutingKey, envelope: &Envelope) -> Result<()> {
        self.ensure_open()?;
        if !key.is_routable() {
            return Err(BrokerError::Unroutable(key));
        }

        let payload = envelope.to_bytes()?;
        for queue in Queue::routed(key) {
            self.queue(queue)?
                .push_back(RawMessage {
                    routing_key: key.as_str().to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                })
                .await;
            debug!(queue = %queue, "Published message to channel queue");
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: Queue,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let state = Arc::clone(self.queue(queue)?);
        let closed = self.close_token.clone();

        tokio::spawn(async move {
            info!(queue = %queue, "Channel consumer started");
            loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = closed.cancelled() => break,
                    message = state.pop() => message,
                };

                let result = process_message(
                    queue,
                    &message.routing_key,
                    &message.payload,
                    message.redelivered,
                    handler.as_ref(),
                )
                .await;

                if !result.should_ack() {
                    state.requeue(message).await;
                    tokio::task::yield_now().await;
                }
            }
            info!(queue = %queue, "Channel consumer stopped");
        });

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_token.cancel();
        info!("Channel broker closed");
        Ok(())
    }
}
