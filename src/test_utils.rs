//! Test utilities and recording doubles.
//!
//! Shared by unit tests across the crate. Integration tests under `tests/`
//! carry their own helpers in `tests/common`.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

use crate::bus::{Delivery, HandlerError, MessageHandler};
use crate::session::{SessionSink, SinkError};

/// Handler that records every successful delivery.
///
/// Can be told to fail its first `n` invocations to exercise requeue.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    failures_remaining: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        let handler = Self::default();
        handler.failures_remaining.store(n, Ordering::SeqCst);
        handler
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let deliveries = Arc::clone(&self.deliveries);
        let failures_remaining = Arc::clone(&self.failures_remaining);
        let attempts = Arc::clone(&self.attempts);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            let failed = failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(HandlerError::Collaborator("injected failure".to_string()));
            }
            deliveries.lock().await.push(delivery);
            Ok(())
        })
    }
}

/// Session sink that forwards frames to a channel the test reads from.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicUsize>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Counter incremented each time the sink is closed.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

#[async_trait::async_trait]
impl SessionSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.tx
            .send(text)
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
