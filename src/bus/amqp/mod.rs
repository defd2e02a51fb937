//! AMQP (RabbitMQ) broker implementation.
//!
//! One connection and one channel per process. The topic exchange and every
//! durable queue binding are declared on connect, so any service may start
//! first.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatch::process_message;
use super::{
    BrokerError, Envelope, MessageBroker, MessageHandler, Queue, Result, RoutingKey,
    TRIP_EXCHANGE,
};

/// Reply code used for orderly channel and connection shutdown.
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ broker.
///
/// Messages are published to the `trip` topic exchange with the routing key's
/// wire value; each queue is bound to its fixed key set.
pub struct AmqpBroker {
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpBroker {
    /// Connect and declare the full topology. Fails with `Connection` if the
    /// broker is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to create channel: {}", e)))?;

        declare_topology(&channel).await?;

        info!(exchange = TRIP_EXCHANGE, "Connected to AMQP");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            channel: RwLock::new(Some(channel)),
        })
    }

    async fn channel(&self) -> Result<Channel> {
        match self.channel.read().await.as_ref() {
            Some(channel) if channel.status().connected() => Ok(channel.clone()),
            Some(_) => Err(BrokerError::Connection("channel is closed".to_string())),
            None => Err(BrokerError::Closed),
        }
    }
}

/// Declare the exchange, every queue and every binding. Idempotent.
async fn declare_topology(channel: &Channel) -> Result<()> {
    channel
        .exchange_declare(
            TRIP_EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("Failed to declare exchange: {}", e)))?;

    for queue in Queue::ALL {
        channel
            .queue_declare(
                queue.name(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to declare queue {}: {}", queue, e)))?;

        for key in queue.bindings() {
            channel
                .queue_bind(
                    queue.name(),
                    TRIP_EXCHANGE,
                    key.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Connection(format!("Failed to bind queue {}: {}", queue, e))
                })?;
        }

        debug!(queue = %queue, bindings = ?queue.bindings(), "Declared queue");
    }

    Ok(())
}

/// Ack or requeue one delivery according to the handler outcome.
async fn settle(queue: Queue, delivery: lapin::message::Delivery, handler: &dyn MessageHandler) {
    let result = process_message(
        queue,
        delivery.routing_key.as_str(),
        &delivery.data,
        delivery.redelivered,
        handler,
    )
    .await;

    let settled = if result.should_ack() {
        delivery.ack(BasicAckOptions::default()).await
    } else {
        delivery
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
    };

    if let Err(e) = settled {
        error!(queue = %queue, error = %e, "Failed to settle message");
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %key, owner_id = %envelope.owner_id))]
    async fn publish(&self, key: RoutingKey, envelope: &Envelope) -> Result<()> {
        if !key.is_routable() {
            return Err(BrokerError::Unroutable(key));
        }

        let channel = self.channel().await?;
        let payload = envelope.to_bytes()?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        channel
            .basic_publish(
                TRIP_EXCHANGE,
                key.as_str(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BrokerError::Publish(format!("Publish confirmation failed: {}", e)))?;

        debug!(exchange = TRIP_EXCHANGE, "Published message");
        Ok(())
    }

    async fn consume(
        &self,
        queue: Queue,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let channel = self.channel().await?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to set prefetch: {}", e)))?;

        let tag = format!("{}-{}", queue.name(), Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                queue.name(),
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to start consumer: {}", e)))?;

        info!(queue = %queue, consumer_tag = %tag, "Consumer registered");

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = consumer.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => settle(queue, delivery, handler.as_ref()).await,
                    Some(Err(e)) => {
                        error!(queue = %queue, error = %e, "Consumer delivery error, stopping");
                        return;
                    }
                    None => {
                        info!(queue = %queue, "Consumer stream ended");
                        return;
                    }
                }
            }

            if let Err(e) = channel
                .basic_cancel(&tag, BasicCancelOptions::default())
                .await
            {
                warn!(queue = %queue, error = %e, "Failed to cancel consumer");
            }

            // Anything prefetched but not handled goes back to the queue.
            while let Some(Ok(delivery)) = consumer.next().now_or_never().flatten() {
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    warn!(queue = %queue, error = %e, "Failed to return buffered message");
                }
            }

            info!(queue = %queue, consumer_tag = %tag, "Consumer stopped");
        });

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        match self.connection.read().await.as_ref() {
            Some(connection) if connection.status().connected() => {}
            Some(_) => return Err(BrokerError::Connection("connection is closed".to_string())),
            None => return Err(BrokerError::Closed),
        }
        self.channel().await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let channel = self.channel.write().await.take();
        let connection = self.connection.write().await.take();

        let mut first_error = None;

        if let Some(channel) = channel {
            if let Err(e) = channel.close(REPLY_SUCCESS, "closing").await {
                warn!(error = %e, "Failed to close channel");
                first_error.get_or_insert(BrokerError::Connection(format!(
                    "Failed to close channel: {}",
                    e
                )));
            }
        }

        if let Some(connection) = connection {
            if let Err(e) = connection.close(REPLY_SUCCESS, "closing").await {
                warn!(error = %e, "Failed to close connection");
                first_error.get_or_insert(BrokerError::Connection(format!(
                    "Failed to close connection: {}",
                    e
                )));
            }
        }

        info!("AMQP broker closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
