// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering of a [`LogEvent`] into the text that ends up in a chat message.
//!
//! The batching engine only needs `render`; any closure
//! `Fn(&LogEvent) -> String` is accepted as a layout.

use crate::event::LogEvent;
use chrono::SecondsFormat;
use std::fmt::Write;

pub trait Layout: Send + Sync {
    fn render(&self, event: &LogEvent) -> String;
}

impl<F> Layout for F
where
    F: Fn(&LogEvent) -> String + Send + Sync,
{
    fn render(&self, event: &LogEvent) -> String {
        self(event)
    }
}

/// Default single-line layout: `LEVEL target - message k=v ...` terminated by a newline.
#[derive(Debug, Clone, Default)]
pub struct SimpleLayout {
    with_timestamp: bool,
}

impl SimpleLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every line with the event's RFC 3339 UTC timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }
}

impl Layout for SimpleLayout {
    fn render(&self, event: &LogEvent) -> String {
        let mut line = String::with_capacity(event.message().len() + 32);
        if self.with_timestamp {
            line.push_str(&event.timestamp().to_rfc3339_opts(SecondsFormat::Millis, true));
            line.push(' ');
        }
        // Writing into a String cannot fail
        let _ = write!(line, "{} {} - {}", event.level(), event.target(), event.message());
        for (key, value) in event.fields() {
            let _ = write!(line, " {key}={value}");
        }
        line.push('\n');
        line
    }
}
