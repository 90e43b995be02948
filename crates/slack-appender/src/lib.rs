// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches log events and forwards them to a Slack incoming webhook.
//!
//! Events are buffered by a [`Dispatcher`], composed into one message per flush
//! by a [`TextComposer`] and posted by a [`NotificationSink`], normally a
//! [`SlackWebhookSink`]. [`SlackLayer`] plugs the dispatcher into `tracing`.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod composer;
pub mod config;
pub mod errors;
pub mod event;
pub mod layer;
pub mod layout;
pub mod scheduler;
pub mod sink;
pub mod slack;
pub mod util;

pub use buffer::EventBuffer;
pub use composer::TextComposer;
pub use config::{AppenderConfig, BatchConfig, CoalesceNotice, FlushMode, MessageIdentity};
pub use errors::ConfigError;
pub use event::LogEvent;
pub use layer::SlackLayer;
pub use layout::{Layout, SimpleLayout};
pub use scheduler::{Dispatcher, SchedulerState};
pub use sink::{ComposedMessage, NotificationSink, QueuedSink, SinkError};
pub use slack::SlackWebhookSink;

use std::sync::Arc;

/// Builds a dispatcher posting to the configured webhook.
///
/// With `queued_delivery` the sink is wrapped in a [`QueuedSink`], whose
/// delivery task is spawned on the current runtime. The dispatcher is returned
/// idle; call [`Dispatcher::start`] to begin flushing.
pub fn build_dispatcher(
    config: &AppenderConfig,
    layout: Arc<dyn Layout>,
) -> Result<Arc<Dispatcher>, ConfigError> {
    config.validate()?;

    let webhook = SlackWebhookSink::new(&config.webhook_url, config.request_timeout)?;
    let sink: Arc<dyn NotificationSink> = if config.queued_delivery {
        Arc::new(QueuedSink::spawn(webhook))
    } else {
        Arc::new(webhook)
    };

    let dispatcher = Dispatcher::new(
        config.batch.clone(),
        config.identity.clone(),
        layout,
        sink,
    )?;
    Ok(Arc::new(dispatcher))
}
