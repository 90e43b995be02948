// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsing helpers for configuration values.

use tracing::Level;

/// Returns the trimmed value, or `None` if nothing but whitespace is left.
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses `true/false`, `1/0`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a level name such as `warn` or `ERROR`.
///
/// `warning` is accepted as an alias of `warn`.
///
/// # Examples
///
/// ```
/// use slack_appender::util::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("warn"), Some(Level::WARN));
/// assert_eq!(parse_level(" Error "), Some(Level::ERROR));
/// assert_eq!(parse_level("loud"), None);
/// ```
pub fn parse_level(value: &str) -> Option<Level> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    trimmed.parse().ok()
}
