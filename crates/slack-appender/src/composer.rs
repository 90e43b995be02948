// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds one bounded-length chat message out of a batch of events.
//!
//! # Truncation rules
//!
//! 1. Each rendered event longer than `max_event_text_length` is cut to
//!    `limit - 2` characters followed by [`EVENT_ELLIPSIS`].
//! 2. Events are concatenated in order. Rendering stops as soon as the
//!    composite exceeds `max_message_text_length`; the events never rendered
//!    are counted.
//! 3. A composite over `max_message_text_length` is cut and terminated with
//!    [`CONTINUATION_MARKER`], extended with `" and N more"` when events were
//!    left out and the longer marker still fits.
//!
//! All lengths are in `char`s. Slack limits message length in characters, and
//! cutting on a `char` boundary keeps the output valid UTF-8.

use crate::event::LogEvent;
use crate::layout::Layout;
use std::sync::Arc;

pub const EVENT_ELLIPSIS: &str = "..";
pub const CONTINUATION_MARKER: &str = "\n..\n..";

pub const DEFAULT_MAX_EVENT_TEXT_LENGTH: usize = 256;
pub const DEFAULT_MAX_MESSAGE_TEXT_LENGTH: usize = 1024;

#[derive(Clone)]
pub struct TextComposer {
    layout: Arc<dyn Layout>,
    max_event_text_length: usize,
    max_message_text_length: usize,
}

impl std::fmt::Debug for TextComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextComposer")
            .field("max_event_text_length", &self.max_event_text_length)
            .field("max_message_text_length", &self.max_message_text_length)
            .finish_non_exhaustive()
    }
}

impl TextComposer {
    pub fn new(
        layout: Arc<dyn Layout>,
        max_event_text_length: usize,
        max_message_text_length: usize,
    ) -> Self {
        Self {
            layout,
            max_event_text_length,
            max_message_text_length,
        }
    }

    pub fn max_event_text_length(&self) -> usize {
        self.max_event_text_length
    }

    pub fn max_message_text_length(&self) -> usize {
        self.max_message_text_length
    }

    /// Composes `events` into a single message.
    ///
    /// `banner` is prepended only when the batch holds more than one event.
    pub fn compose(&self, events: &[LogEvent], banner: Option<&str>) -> String {
        let mut text = String::new();
        let mut length = 0;

        if let Some(banner) = banner.filter(|_| events.len() > 1) {
            text.push_str(banner);
            length += banner.chars().count();
        }

        let mut rendered = 0;
        for event in events {
            if length > self.max_message_text_length {
                break;
            }
            let event_text = self.render_event(event);
            length += event_text.chars().count();
            text.push_str(&event_text);
            rendered += 1;
        }
        let left_out = events.len() - rendered;

        if length <= self.max_message_text_length {
            return text;
        }

        let counted = format!("{CONTINUATION_MARKER} and {left_out} more");
        let marker = if left_out > 0 && counted.chars().count() <= self.max_message_text_length {
            counted.as_str()
        } else {
            CONTINUATION_MARKER
        };
        truncate_with_suffix(&text, self.max_message_text_length, marker)
    }

    /// Renders one event and applies the per-event length limit.
    pub fn render_event(&self, event: &LogEvent) -> String {
        let rendered = self.layout.render(event);
        if rendered.chars().count() <= self.max_event_text_length {
            return rendered;
        }
        truncate_with_suffix(&rendered, self.max_event_text_length, EVENT_ELLIPSIS)
    }
}

/// Cuts `text` so that it ends with `suffix` and is at most `max_chars` long.
fn truncate_with_suffix(text: &str, max_chars: usize, suffix: &str) -> String {
    let suffix_chars = suffix.chars().count();
    if max_chars <= suffix_chars {
        return suffix.chars().take(max_chars).collect();
    }
    let keep = max_chars - suffix_chars;
    let cut = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(index, _)| index);
    let mut truncated = String::with_capacity(cut + suffix.len());
    truncated.push_str(&text[..cut]);
    truncated.push_str(suffix);
    truncated
}
