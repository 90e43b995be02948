// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Slack incoming-webhook delivery.
//!
//! A message is POSTed as JSON:
//!
//! ```json
//! {"username": "...", "icon_emoji": ":ghost:", "channel": "#ops", "text": "..."}
//! ```
//!
//! Optional keys are omitted when unset. A coloured message carries its text in a
//! single attachment field instead of `text`. Anything but `200 OK` is a failure.

use crate::errors::ConfigError;
use crate::sink::{ComposedMessage, NotificationSink, SinkError};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<[Attachment<'a>; 1]>,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    color: &'a str,
    fields: [AttachmentField<'a>; 1],
}

#[derive(Debug, Serialize)]
struct AttachmentField<'a> {
    value: &'a str,
}

/// Posts messages to one Slack webhook URL.
///
/// The URL is never part of an error or log line: its path holds the
/// webhook's secret token.
#[derive(Clone)]
pub struct SlackWebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl std::fmt::Debug for SlackWebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebhookSink")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl SlackWebhookSink {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let url = parse_webhook_url(webhook_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Posts `text` to `to` (`#channel` or `@user`) with the webhook's own identity.
    pub async fn post(&self, text: &str, to: Option<&str>) -> Result<(), SinkError> {
        self.send(&ComposedMessage {
            text: text.to_string(),
            channel: to.map(str::to_string),
            ..Default::default()
        })
        .await
    }

    /// Posts `text` to `to` appearing to come from `username` with `icon_emoji`.
    pub async fn post_as(
        &self,
        text: &str,
        to: Option<&str>,
        username: Option<&str>,
        icon_emoji: Option<&str>,
    ) -> Result<(), SinkError> {
        self.send(&ComposedMessage {
            text: text.to_string(),
            channel: to.map(str::to_string),
            username: username.map(str::to_string),
            icon_emoji: icon_emoji.map(str::to_string),
            color: None,
        })
        .await
    }

    /// Posts `text` as an attachment with the given colour (`good`, `warning`,
    /// `danger` or a hex code).
    pub async fn post_with_color(
        &self,
        text: &str,
        to: Option<&str>,
        color: &str,
    ) -> Result<(), SinkError> {
        self.send(&ComposedMessage {
            text: text.to_string(),
            channel: to.map(str::to_string),
            color: Some(color.to_string()),
            ..Default::default()
        })
        .await
    }

    fn payload(message: &ComposedMessage) -> SlackPayload<'_> {
        let (text, attachments) = match message.color.as_deref() {
            Some(color) => (
                None,
                Some([Attachment {
                    color,
                    fields: [AttachmentField {
                        value: &message.text,
                    }],
                }]),
            ),
            None => (Some(message.text.as_str()), None),
        };
        SlackPayload {
            username: message.username.as_deref(),
            icon_emoji: message.icon_emoji.as_deref(),
            channel: message.channel.as_deref(),
            text,
            attachments,
        }
    }
}

#[async_trait]
impl NotificationSink for SlackWebhookSink {
    async fn send(&self, message: &ComposedMessage) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&Self::payload(message))
            .map_err(|e| SinkError::Payload(e.to_string()))?;

        debug!("Posting {} bytes to Slack webhook", body.len());

        let response = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                let reason = if e.is_connect() {
                    format!("cannot reach Slack, are you offline? {e}")
                } else if e.is_timeout() {
                    format!("request timed out: {e}")
                } else {
                    e.to_string()
                };
                SinkError::Destination(e.status(), reason)
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SinkError::Destination(Some(status), body))
            }
        }
    }
}

/// Parses a webhook URL, accepting only absolute `http`/`https` URLs.
pub fn parse_webhook_url(webhook_url: &str) -> Result<Url, ConfigError> {
    // Errors name the problem only, the URL itself carries the token
    let url = Url::parse(webhook_url.trim())
        .map_err(|e| ConfigError::InvalidWebhookUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(ConfigError::InvalidWebhookUrl("missing host".to_string())),
        scheme => Err(ConfigError::InvalidWebhookUrl(format!(
            "unsupported scheme '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn sink(server: &Server) -> SlackWebhookSink {
        SlackWebhookSink::new(&format!("{}/services/T000/B000/XXX", server.url()), DEFAULT_REQUEST_TIMEOUT)
            .expect("failed to create sink")
    }

    #[test]
    fn test_parse_webhook_url() {
        assert!(parse_webhook_url("https://hooks.slack.com/services/T/B/X").is_ok());
        assert!(parse_webhook_url("  http://localhost:8080/hook ").is_ok());
        assert!(matches!(
            parse_webhook_url("not a url"),
            Err(ConfigError::InvalidWebhookUrl(_))
        ));
        assert!(matches!(
            parse_webhook_url("ftp://hooks.slack.com/x"),
            Err(ConfigError::InvalidWebhookUrl(_))
        ));
        assert!(matches!(
            parse_webhook_url(""),
            Err(ConfigError::InvalidWebhookUrl(_))
        ));
    }

    #[test]
    fn test_payload_carries_message_identity() {
        let plain = ComposedMessage::new("hi");
        assert_eq!(
            serde_json::to_value(SlackWebhookSink::payload(&plain)).unwrap(),
            serde_json::json!({"text": "hi"})
        );

        let identified = ComposedMessage {
            text: "hi".to_string(),
            username: Some("logbot".to_string()),
            icon_emoji: Some(":ghost:".to_string()),
            channel: Some("#ops".to_string()),
            color: None,
        };
        assert_eq!(
            serde_json::to_value(SlackWebhookSink::payload(&identified)).unwrap(),
            serde_json::json!({"username": "logbot", "icon_emoji": ":ghost:", "channel": "#ops", "text": "hi"})
        );
    }

    #[test]
    fn test_colored_payload_moves_text_into_attachment() {
        let message = ComposedMessage {
            text: "disk full".to_string(),
            color: Some("danger".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(SlackWebhookSink::payload(&message)).unwrap(),
            serde_json::json!({"attachments": [{"color": "danger", "fields": [{"value": "disk full"}]}]})
        );
    }

    #[tokio::test]
    async fn test_post_sends_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/T000/B000/XXX")
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({"channel": "#alerts", "text": "hello"})))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        sink(&server)
            .post("hello", Some("#alerts"))
            .await
            .expect("post failed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_with_color() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/T000/B000/XXX")
            .match_body(Matcher::Json(serde_json::json!({
                "attachments": [{"color": "#36a64f", "fields": [{"value": "deployed"}]}]
            })))
            .with_status(200)
            .create_async()
            .await;

        sink(&server)
            .post_with_color("deployed", None, "#36a64f")
            .await
            .expect("post failed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_is_destination_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/T000/B000/XXX")
            .with_status(404)
            .with_body("no_service")
            .create_async()
            .await;

        let result = sink(&server)
            .post_as("hello", None, Some("bot"), Some(":robot_face:"))
            .await;
        match result {
            Err(SinkError::Destination(Some(status), body)) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "no_service");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_host_is_destination_error() {
        // Nothing listens on port 9 of localhost
        let sink = SlackWebhookSink::new(
            "http://127.0.0.1:9/services/T000/B000/SECRETTOKEN",
            Duration::from_secs(1),
        )
        .unwrap();
        let result = sink.post("hello", None).await;
        match result {
            Err(e @ SinkError::Destination(None, _)) => {
                let text = e.to_string();
                assert!(text.contains("cannot reach Slack"), "{text}");
                assert!(!text.contains("SECRETTOKEN"), "{text}");
                assert!(!text.contains("/services/"), "{text}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!format!("{sink:?}").contains("SECRETTOKEN"));
    }

    #[test]
    fn test_invalid_url_errors_do_not_echo_the_url() {
        for url in [
            "ftp://hooks.slack.com/services/T000/B000/SECRETTOKEN",
            "hooks.slack.com/services/SECRETTOKEN",
        ] {
            let error = parse_webhook_url(url).unwrap_err();
            assert!(!error.to_string().contains("SECRETTOKEN"), "{error}");
        }
    }
}
