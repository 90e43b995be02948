// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::composer::{
    CONTINUATION_MARKER, DEFAULT_MAX_EVENT_TEXT_LENGTH, DEFAULT_MAX_MESSAGE_TEXT_LENGTH,
    EVENT_ELLIPSIS,
};
use crate::errors::ConfigError;
use crate::slack::{parse_webhook_url, DEFAULT_REQUEST_TIMEOUT};
use crate::util::{non_empty, parse_bool, parse_level};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BATCHING_SECS: u64 = 10;
pub const DEFAULT_WINDOW_MILLIS: u64 = 2000;

const WEBHOOK_URL_VAR: &str = "SLACK_WEBHOOK_URL";

/// How buffered events are turned into flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush every period, skipping empty ticks.
    Interval(Duration),
    /// Flush on the first event after the window has elapsed since the last flush.
    Window(Duration),
}

impl Default for FlushMode {
    fn default() -> Self {
        Self::Interval(Duration::from_secs(DEFAULT_BATCHING_SECS))
    }
}

impl FlushMode {
    pub fn period(&self) -> Duration {
        match self {
            Self::Interval(period) | Self::Window(period) => *period,
        }
    }
}

/// Notice telling readers that messages are being coalesced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CoalesceNotice {
    #[default]
    Off,
    /// Prepended to every flush that carries more than one event.
    Banner(String),
    /// Window mode only: sent on its own, once per window, when the first
    /// event lands inside an active window.
    Advisory(String),
}

impl CoalesceNotice {
    pub fn banner(&self) -> Option<&str> {
        match self {
            Self::Banner(text) => Some(text),
            _ => None,
        }
    }

    pub fn advisory(&self) -> Option<&str> {
        match self {
            Self::Advisory(text) => Some(text),
            _ => None,
        }
    }
}

/// Settings of the batching engine, fixed for the lifetime of a dispatcher
/// except for the flush mode, which can be swapped through `reconfigure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_event_text_length: usize,
    pub max_message_text_length: usize,
    pub buffer_capacity: usize,
    pub flush_mode: FlushMode,
    pub coalesce_notice: CoalesceNotice,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_event_text_length: DEFAULT_MAX_EVENT_TEXT_LENGTH,
            max_message_text_length: DEFAULT_MAX_MESSAGE_TEXT_LENGTH,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_mode: FlushMode::default(),
            coalesce_notice: CoalesceNotice::Off,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "buffer capacity must be greater than 0".to_string(),
            ));
        }
        validate_flush_mode(self.flush_mode)?;
        if self.max_event_text_length < EVENT_ELLIPSIS.len() {
            return Err(ConfigError::InvalidConfig(format!(
                "max event text length must be at least {}",
                EVENT_ELLIPSIS.len()
            )));
        }
        if self.max_message_text_length < CONTINUATION_MARKER.len() {
            return Err(ConfigError::InvalidConfig(format!(
                "max message text length must be at least {}",
                CONTINUATION_MARKER.len()
            )));
        }
        if self.coalesce_notice.advisory().is_some()
            && matches!(self.flush_mode, FlushMode::Interval(_))
        {
            return Err(ConfigError::InvalidConfig(
                "an advisory notice requires window mode".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_flush_mode(mode: FlushMode) -> Result<(), ConfigError> {
    if mode.period().is_zero() {
        return Err(ConfigError::InvalidConfig(
            "flush interval and window must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Sender identity and presentation applied to every composed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdentity {
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
    /// `#channel` or `@user`; the webhook default when unset
    pub channel: Option<String>,
    /// Deliver batches as an attachment coloured by their most severe level
    pub use_attachments: bool,
}

/// Full configuration of a Slack webhook appender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppenderConfig {
    pub webhook_url: String,
    pub identity: MessageIdentity,
    pub batch: BatchConfig,
    pub request_timeout: Duration,
    /// Least severe level forwarded by the tracing layer
    pub min_level: Level,
    /// Deliver through a background queue instead of awaiting each post
    pub queued_delivery: bool,
}

impl AppenderConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            identity: MessageIdentity::default(),
            batch: BatchConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_level: Level::WARN,
            queued_delivery: false,
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, using the `SLACK_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|value| non_empty(&value));

        let webhook_url = get(WEBHOOK_URL_VAR).ok_or(ConfigError::MissingWebhookUrl(WEBHOOK_URL_VAR))?;
        let mut config = Self::new(webhook_url);

        config.identity = MessageIdentity {
            username: get("SLACK_USERNAME"),
            icon_emoji: get("SLACK_ICON_EMOJI"),
            channel: get("SLACK_CHANNEL"),
            use_attachments: parse_var(&get, "SLACK_USE_ATTACHMENTS", parse_bool)?.unwrap_or(false),
        };

        let batch = &mut config.batch;
        if let Some(length) = parse_var(&get, "SLACK_MAX_EVENT_LENGTH", parse_number::<usize>)? {
            batch.max_event_text_length = length;
        }
        if let Some(length) = parse_var(&get, "SLACK_MAX_TEXT_LENGTH", parse_number::<usize>)? {
            batch.max_message_text_length = length;
        }
        if let Some(capacity) = parse_var(&get, "SLACK_BUFFER_CAPACITY", parse_number::<usize>)? {
            batch.buffer_capacity = capacity;
        }

        let batching_secs =
            parse_var(&get, "SLACK_BATCHING_SECS", parse_number::<u64>)?.unwrap_or(DEFAULT_BATCHING_SECS);
        let window_millis =
            parse_var(&get, "SLACK_WINDOW_MILLIS", parse_number::<u64>)?.unwrap_or(DEFAULT_WINDOW_MILLIS);
        batch.flush_mode = match get("SLACK_FLUSH_MODE").map(|mode| mode.to_lowercase()) {
            None => FlushMode::Interval(Duration::from_secs(batching_secs)),
            Some(mode) if mode == "interval" => FlushMode::Interval(Duration::from_secs(batching_secs)),
            Some(mode) if mode == "window" => FlushMode::Window(Duration::from_millis(window_millis)),
            Some(value) => {
                return Err(ConfigError::InvalidEnvValue {
                    key: "SLACK_FLUSH_MODE",
                    value,
                })
            }
        };

        batch.coalesce_notice = match (get("SLACK_BATCH_BANNER"), get("SLACK_ADVISORY_TEXT")) {
            (None, None) => CoalesceNotice::Off,
            (Some(banner), None) => CoalesceNotice::Banner(unescape_newlines(&banner)),
            (None, Some(advisory)) => CoalesceNotice::Advisory(advisory),
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidConfig(
                    "set only one of SLACK_BATCH_BANNER and SLACK_ADVISORY_TEXT".to_string(),
                ))
            }
        };

        if let Some(secs) = parse_var(&get, "SLACK_REQUEST_TIMEOUT_SECS", parse_number::<u64>)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = parse_var(&get, "SLACK_MIN_LEVEL", parse_level)? {
            config.min_level = level;
        }
        if let Some(queued) = parse_var(&get, "SLACK_QUEUED_DELIVERY", parse_bool)? {
            config.queued_delivery = queued;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_webhook_url(&self.webhook_url)?;
        self.batch.validate()?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<G, T>(
    get: &G,
    key: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(value) => parse(&value)
            .map(Some)
            .ok_or(ConfigError::InvalidEnvValue { key, value }),
    }
}

fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

// Env values cannot easily carry a newline, so accept a literal "\n"
fn unescape_newlines(value: &str) -> String {
    value.replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppenderConfig::new("https://hooks.slack.com/services/T/B/X");
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.max_event_text_length, 256);
        assert_eq!(config.batch.max_message_text_length, 1024);
        assert_eq!(config.batch.buffer_capacity, 20);
        assert_eq!(config.batch.flush_mode, FlushMode::Interval(Duration::from_secs(10)));
        assert_eq!(config.min_level, Level::WARN);
    }

    #[test]
    fn test_validate_rejects_malformed_url() {
        let config = AppenderConfig::new("hooks.slack.com/services");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWebhookUrl(_))));
    }

    #[test]
    fn test_validate_zero_capacity_and_period() {
        let batch = BatchConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(batch.validate().is_err());

        let batch = BatchConfig {
            flush_mode: FlushMode::Window(Duration::ZERO),
            ..Default::default()
        };
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_validate_limits_below_markers() {
        let batch = BatchConfig {
            max_event_text_length: 1,
            ..Default::default()
        };
        assert!(batch.validate().is_err());

        let batch = BatchConfig {
            max_message_text_length: 5,
            ..Default::default()
        };
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_validate_advisory_requires_window_mode() {
        let batch = BatchConfig {
            coalesce_notice: CoalesceNotice::Advisory("batching".to_string()),
            ..Default::default()
        };
        assert!(batch.validate().is_err());

        let batch = BatchConfig {
            flush_mode: FlushMode::Window(Duration::from_millis(2000)),
            coalesce_notice: CoalesceNotice::Advisory("batching".to_string()),
            ..Default::default()
        };
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_ignores_diagnostics_filter() {
        // The binary's own log filter is not appender configuration
        let config = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_APPENDER_LOG_LEVEL", "warn,app=debug"),
        ]))
        .expect("config should be valid");
        assert_eq!(config, AppenderConfig::new("https://hooks.slack.com/x"));
    }

    #[test]
    fn test_from_lookup_requires_url() {
        let result = AppenderConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingWebhookUrl(_))));

        let result = AppenderConfig::from_lookup(lookup(&[("SLACK_WEBHOOK_URL", "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingWebhookUrl(_))));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config =
            AppenderConfig::from_lookup(lookup(&[("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x")]))
                .expect("config should be valid");
        assert_eq!(config, AppenderConfig::new("https://hooks.slack.com/x"));
    }

    #[test]
    fn test_from_lookup_window_mode() {
        let config = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_CHANNEL", "#ops"),
            ("SLACK_USERNAME", "logbot"),
            ("SLACK_ICON_EMOJI", ":scroll:"),
            ("SLACK_FLUSH_MODE", "Window"),
            ("SLACK_WINDOW_MILLIS", "500"),
            ("SLACK_ADVISORY_TEXT", "More messages follow, batching"),
            ("SLACK_BUFFER_CAPACITY", "50"),
            ("SLACK_MAX_EVENT_LENGTH", "128"),
            ("SLACK_MAX_TEXT_LENGTH", "2048"),
            ("SLACK_MIN_LEVEL", "error"),
            ("SLACK_USE_ATTACHMENTS", "true"),
            ("SLACK_QUEUED_DELIVERY", "1"),
        ]))
        .expect("config should be valid");

        assert_eq!(config.identity.channel.as_deref(), Some("#ops"));
        assert_eq!(config.identity.username.as_deref(), Some("logbot"));
        assert_eq!(config.identity.icon_emoji.as_deref(), Some(":scroll:"));
        assert!(config.identity.use_attachments);
        assert_eq!(config.batch.flush_mode, FlushMode::Window(Duration::from_millis(500)));
        assert_eq!(
            config.batch.coalesce_notice,
            CoalesceNotice::Advisory("More messages follow, batching".to_string())
        );
        assert_eq!(config.batch.buffer_capacity, 50);
        assert_eq!(config.batch.max_event_text_length, 128);
        assert_eq!(config.batch.max_message_text_length, 2048);
        assert_eq!(config.min_level, Level::ERROR);
        assert!(config.queued_delivery);
    }

    #[test]
    fn test_from_lookup_banner_unescapes_newlines() {
        let config = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_BATCHING_SECS", "30"),
            ("SLACK_BATCH_BANNER", "Batched messages:\\n"),
        ]))
        .expect("config should be valid");
        assert_eq!(config.batch.flush_mode, FlushMode::Interval(Duration::from_secs(30)));
        assert_eq!(config.batch.coalesce_notice.banner(), Some("Batched messages:\n"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_BATCHING_SECS", "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvValue { key: "SLACK_BATCHING_SECS", .. })
        ));

        let result = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_FLUSH_MODE", "hourly"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvValue { key: "SLACK_FLUSH_MODE", .. })
        ));

        let result = AppenderConfig::from_lookup(lookup(&[
            ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/x"),
            ("SLACK_BATCH_BANNER", "a"),
            ("SLACK_ADVISORY_TEXT", "b"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }
}
