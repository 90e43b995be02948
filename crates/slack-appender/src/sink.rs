// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery boundary between the batching engine and the network.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, Instrument};

/// A message ready for delivery: text plus the optional sender overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComposedMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    /// `#channel` or `@user`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// When set, the text is delivered as a coloured attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ComposedMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Error shipping message: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &ComposedMessage) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    async fn send(&self, message: &ComposedMessage) -> Result<(), SinkError> {
        (**self).send(message).await
    }
}

#[derive(Debug)]
enum QueueCommand {
    Deliver(ComposedMessage),
    Drain(oneshot::Sender<()>),
}

/// Hands messages to a single delivery task so the caller never waits on the network.
///
/// Messages reach the inner sink in the order `send` was called. Failures are
/// logged by the delivery task; `send` itself only fails once the task is gone.
#[derive(Clone)]
pub struct QueuedSink {
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl QueuedSink {
    /// Spawns the delivery task on the current tokio runtime.
    pub fn spawn<S>(inner: S) -> Self
    where
        S: NotificationSink + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(inner, rx).in_current_span());
        Self { tx }
    }

    /// Waits until every message queued before this call has been attempted.
    pub async fn drained(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(QueueCommand::Drain(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[async_trait]
impl NotificationSink for QueuedSink {
    async fn send(&self, message: &ComposedMessage) -> Result<(), SinkError> {
        self.tx
            .send(QueueCommand::Deliver(message.clone()))
            .map_err(|_| SinkError::Destination(None, "delivery task stopped".to_string()))
    }
}

async fn run_queue<S: NotificationSink>(inner: S, mut rx: mpsc::UnboundedReceiver<QueueCommand>) {
    debug!("Queued sink started");
    while let Some(command) = rx.recv().await {
        match command {
            QueueCommand::Deliver(message) => {
                if let Err(e) = inner.send(&message).await {
                    error!("Failed to deliver queued message: {e}");
                }
            }
            QueueCommand::Drain(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Queued sink stopped");
}
