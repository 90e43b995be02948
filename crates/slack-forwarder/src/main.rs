// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use slack_appender::{
    build_dispatcher, util::parse_level, AppenderConfig, LogEvent, SimpleLayout, SlackLayer,
};

const STDIN_TARGET: &str = "stdin";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SLACK_APPENDER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        );

    let config = AppenderConfig::from_env();
    let dispatcher = config.as_ref().ok().map(|config| {
        let layout = SimpleLayout::new().with_timestamp(true);
        build_dispatcher(config, Arc::new(layout))
    });

    let slack_layer = match (&config, &dispatcher) {
        (Ok(config), Some(Ok(dispatcher))) => {
            Some(SlackLayer::new(Arc::clone(dispatcher)).with_min_level(config.min_level))
        }
        _ => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(slack_layer);

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let (config, dispatcher) = match (config, dispatcher) {
        (Ok(config), Some(Ok(dispatcher))) => (config, dispatcher),
        (Err(e), _) | (_, Some(Err(e))) => {
            error!("Error creating Slack appender configuration: {e}");
            return;
        }
        (Ok(_), None) => return,
    };

    dispatcher.start().await;
    info!(
        "Forwarding stdin to {} with {:?}",
        redact_webhook(&config.webhook_url),
        config.batch.flush_mode
    );

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let event = parse_line(&line, config.min_level)
                        .filter(|event| event.level() <= config.min_level);
                    if let Some(event) = event {
                        dispatcher.on_event(event);
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received ctrl-c, shutting down");
                break;
            }
        }
    }

    dispatcher.stop().await;
    debug!("Dropped {} events because the buffer was full", dispatcher.dropped());
}

/// Turns one input line into an event.
///
/// A leading level word (`ERROR disk full`) sets the level, otherwise
/// `default_level` is used. Blank lines are skipped.
fn parse_line(line: &str, default_level: Level) -> Option<LogEvent> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return None;
    }
    let (level, message) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => match parse_level(word) {
            Some(level) => (level, rest.trim_start()),
            None => (default_level, line),
        },
        None => (parse_level(line).unwrap_or(default_level), line),
    };
    Some(LogEvent::new(level, STDIN_TARGET, message))
}

// Webhook URLs embed a secret token in their path
fn redact_webhook(webhook_url: &str) -> String {
    match slack_appender::slack::parse_webhook_url(webhook_url) {
        Ok(url) => format!("{}://{}/...", url.scheme(), url.host_str().unwrap_or_default()),
        Err(_) => "<invalid webhook url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_level_prefix() {
        let event = parse_line("ERROR  database unreachable", Level::WARN).unwrap();
        assert_eq!(event.level(), Level::ERROR);
        assert_eq!(event.message(), "database unreachable");
        assert_eq!(event.target(), STDIN_TARGET);
    }

    #[test]
    fn test_parse_line_without_level_prefix() {
        let event = parse_line("backup finished in 3s\n", Level::WARN).unwrap();
        assert_eq!(event.level(), Level::WARN);
        assert_eq!(event.message(), "backup finished in 3s");
    }

    #[test]
    fn test_parse_line_skips_blank_lines() {
        assert!(parse_line("   ", Level::WARN).is_none());
        assert!(parse_line("", Level::WARN).is_none());
    }

    #[test]
    fn test_redact_webhook() {
        assert_eq!(
            redact_webhook("https://hooks.slack.com/services/T000/B000/XXX"),
            "https://hooks.slack.com/..."
        );
        assert_eq!(redact_webhook("nope"), "<invalid webhook url>");
    }
}
