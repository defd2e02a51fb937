//! Mock broker implementation for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{BrokerError, Envelope, MessageBroker, MessageHandler, Queue, Result, RoutingKey};

/// Mock broker that records publishes instead of routing them.
#[derive(Default)]
pub struct MockBroker {
    published: RwLock<Vec<(RoutingKey, Envelope)>>,
    consumers: RwLock<Vec<Queue>>,
    fail_on_publish: RwLock<bool>,
    closed: RwLock<bool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published(&self) -> Vec<(RoutingKey, Envelope)> {
        self.published.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<(RoutingKey, Envelope)> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Queues that have had a consumer attached, in registration order.
    pub async fn consumed_queues(&self) -> Vec<Queue> {
        self.consumers.read().await.clone()
    }
}

#[async_trait]
impl MessageBroker for MockBroker {
    async fn publish(&self, key: RoutingKey, envelope: &Envelope) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        self.published.write().await.push((key, envelope.clone()));
        Ok(())
    }

    async fn consume(
        &self,
        queue: Queue,
        _handler: Arc<dyn MessageHandler>,
        _shutdown: CancellationToken,
    ) -> Result<()> {
        self.consumers.write().await.push(queue);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if *self.closed.read().await {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}
