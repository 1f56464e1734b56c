//! Writer configuration.
//!
//! Defaults are usable as-is; [`WriterConfig::from_env`] overrides them from
//! `BQWRITE_*` environment variables.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proto::append_rows_request::MissingValueInterpretation;

/// Trace id prefix sent with every request unless overridden.
pub const DEFAULT_TRACE_ID: &str = concat!("rust:bqwrite/", env!("CARGO_PKG_VERSION"));

/// Capacity of each connection's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What happens to unacknowledged writes when a failed channel is replaced,
/// after a transient error or after the service ended the call. A healthy
/// channel replaced on request keeps answering for its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
    /// Keep them queued and send them again, oldest first, on the new channel.
    #[default]
    Resend,
    /// Reject them with a transient-channel error; the caller retries.
    Fail,
}

impl FromStr for InFlightPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resend" => Ok(InFlightPolicy::Resend),
            "fail" => Ok(InFlightPolicy::Fail),
            other => Err(format!("expected resend or fail, got {other}")),
        }
    }
}

/// How the service fills columns missing from a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingValue {
    Null,
    Default,
}

impl From<MissingValue> for MissingValueInterpretation {
    fn from(value: MissingValue) -> Self {
        match value {
            MissingValue::Null => MissingValueInterpretation::NullValue,
            MissingValue::Default => MissingValueInterpretation::DefaultValue,
        }
    }
}

impl FromStr for MissingValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(MissingValue::Null),
            "default" => Ok(MissingValue::Default),
            other => Err(format!("expected null or default, got {other}")),
        }
    }
}

/// Per-connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Trace id set on requests that do not carry one.
    pub trace_id: String,
    pub in_flight_policy: InFlightPolicy,
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            trace_id: DEFAULT_TRACE_ID.to_string(),
            in_flight_policy: InFlightPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    #[must_use]
    pub fn with_in_flight_policy(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight_policy = policy;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Defaults for every connection the client creates.
    pub connection: ConnectionOptions,
    /// Applied to writers the client creates; unset leaves the service default.
    pub default_missing_value: Option<MissingValue>,
}

impl WriterConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// - `BQWRITE_TRACE_ID`
    /// - `BQWRITE_IN_FLIGHT_POLICY`: `resend` or `fail`
    /// - `BQWRITE_EVENT_CAPACITY`
    /// - `BQWRITE_DEFAULT_MISSING_VALUE`: `null` or `default`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(trace_id) = env_string(&lookup, "BQWRITE_TRACE_ID") {
            config.connection.trace_id = trace_id;
        }
        if let Some(policy) = env_parse(&lookup, "BQWRITE_IN_FLIGHT_POLICY")? {
            config.connection.in_flight_policy = policy;
        }
        if let Some(capacity) = env_parse::<usize>(&lookup, "BQWRITE_EVENT_CAPACITY")? {
            if capacity == 0 {
                return Err(ConfigError::Invalid {
                    name: "BQWRITE_EVENT_CAPACITY",
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.connection.event_capacity = capacity;
        }
        config.default_missing_value = env_parse(&lookup, "BQWRITE_DEFAULT_MISSING_VALUE")?;

        Ok(config)
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn with_default_missing_value(mut self, value: MissingValue) -> Self {
        self.default_missing_value = Some(value);
        self
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
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
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WriterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WriterConfig::default());
        assert!(config.connection.trace_id.starts_with("rust:bqwrite/"));
        assert_eq!(config.connection.in_flight_policy, InFlightPolicy::Resend);
        assert_eq!(config.connection.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.default_missing_value, None);
    }

    #[test]
    fn test_overrides() {
        let config = WriterConfig::from_lookup(lookup(&[
            ("BQWRITE_TRACE_ID", " loader "),
            ("BQWRITE_IN_FLIGHT_POLICY", "FAIL"),
            ("BQWRITE_EVENT_CAPACITY", "8"),
            ("BQWRITE_DEFAULT_MISSING_VALUE", "default"),
        ]))
        .unwrap();
        assert_eq!(config.connection.trace_id, "loader");
        assert_eq!(config.connection.in_flight_policy, InFlightPolicy::Fail);
        assert_eq!(config.connection.event_capacity, 8);
        assert_eq!(config.default_missing_value, Some(MissingValue::Default));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            WriterConfig::from_lookup(lookup(&[("BQWRITE_IN_FLIGHT_POLICY", "maybe")])),
            Err(ConfigError::Invalid { name: "BQWRITE_IN_FLIGHT_POLICY", .. })
        ));
        assert!(WriterConfig::from_lookup(lookup(&[("BQWRITE_EVENT_CAPACITY", "0")])).is_err());
        assert!(WriterConfig::from_lookup(lookup(&[("BQWRITE_EVENT_CAPACITY", "lots")])).is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: WriterConfig =
            serde_json::from_str(r#"{"connection": {"in_flight_policy": "fail"}}"#).unwrap();
        assert_eq!(config.connection.in_flight_policy, InFlightPolicy::Fail);
        assert_eq!(config.connection.trace_id, DEFAULT_TRACE_ID);
    }
}
