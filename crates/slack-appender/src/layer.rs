// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration: forwards events at or above a level to a [`Dispatcher`].

use crate::event::LogEvent;
use crate::scheduler::Dispatcher;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Crates whose events are never forwarded, so delivering a batch can not
/// produce more events to deliver. Matches the crate and its modules.
const IGNORED_CRATES: [&str; 6] = [
    "slack_appender",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
];

/// Layer feeding matching events into a dispatcher.
///
/// Only `on_event` is implemented; the layer never disables callsites, so other
/// layers of the subscriber keep seeing everything.
pub struct SlackLayer {
    dispatcher: Arc<Dispatcher>,
    min_level: Level,
}

impl SlackLayer {
    /// Forwards `WARN` and `ERROR` events by default.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            min_level: Level::WARN,
        }
    }

    /// Least severe level that is forwarded.
    #[must_use]
    pub fn with_min_level(mut self, min_level: Level) -> Self {
        self.min_level = min_level;
        self
    }

    fn accepts(&self, level: &Level, target: &str) -> bool {
        // More verbose levels compare greater
        *level <= self.min_level && !IGNORED_CRATES.iter().any(|name| is_within(target, name))
    }
}

impl<S> Layer<S> for SlackLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.accepts(metadata.level(), metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let log_event = visitor.fields.into_iter().fold(
            LogEvent::new(*metadata.level(), metadata.target(), visitor.message),
            |log_event, (key, value)| log_event.with_field(key, value),
        );
        self.dispatcher.on_event(log_event);
    }
}

/// Whether `target` is the `name` crate or one of its modules.
fn is_within(target: &str, name: &str) -> bool {
    target
        .strip_prefix(name)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}
