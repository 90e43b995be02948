// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building an appender from its configuration.
///
/// These are fatal to construction and surface immediately, never at flush time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("Missing webhook URL, set {0}")]
    MissingWebhookUrl(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnvValue { key: &'static str, value: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
