//! WebSocket write half as a `SessionSink`.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;

use super::{SessionSink, SinkError};

pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.inner
            .close()
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
