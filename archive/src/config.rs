//! Configuration for archive control sessions.
//!
//! [`ArchiveContext`] holds the control channels, deadlines and idle tuning a
//! session is built from. Defaults suit an archive on the local host; any field
//! can be overridden from the environment with [`ArchiveContext::from_env`]:
//!
//! | Variable | Field |
//! |---|---|
//! | `TITAN_ARCHIVE_CONTROL_REQUEST_CHANNEL` | `control_request_channel` |
//! | `TITAN_ARCHIVE_CONTROL_REQUEST_STREAM_ID` | `control_request_stream_id` |
//! | `TITAN_ARCHIVE_CONTROL_RESPONSE_CHANNEL` | `control_response_channel` |
//! | `TITAN_ARCHIVE_CONTROL_RESPONSE_STREAM_ID` | `control_response_stream_id` |
//! | `TITAN_ARCHIVE_CONNECT_TIMEOUT_MS` | `connect_timeout` |
//! | `TITAN_ARCHIVE_MESSAGE_TIMEOUT_MS` | `message_timeout` |
//! | `TITAN_ARCHIVE_FRAGMENT_LIMIT` | `fragment_limit` |
//! | `TITAN_ARCHIVE_IDLE_MAX_SPINS` | `idle.max_spins` |
//! | `TITAN_ARCHIVE_IDLE_MAX_YIELDS` | `idle.max_yields` |
//! | `TITAN_ARCHIVE_IDLE_MIN_PARK_US` | `idle.min_park` |
//! | `TITAN_ARCHIVE_IDLE_MAX_PARK_US` | `idle.max_park` |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::error::ValidationError;
use crate::control::types::{validate_channel, validate_stream_id};
use crate::idle::{BackoffConfig, BackoffIdleStrategy};
use crate::transport::DEFAULT_FRAGMENT_LIMIT;

pub const DEFAULT_CONTROL_REQUEST_CHANNEL: &str = "aeron:udp?endpoint=localhost:8010";
pub const DEFAULT_CONTROL_REQUEST_STREAM_ID: i32 = 10;
pub const DEFAULT_CONTROL_RESPONSE_CHANNEL: &str = "aeron:udp?endpoint=localhost:8020";
pub const DEFAULT_CONTROL_RESPONSE_STREAM_ID: i32 = 20;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "TITAN_ARCHIVE_";

/// Errors loading or validating an [`ArchiveContext`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("{field}: {source}")]
    Invalid {
        field: &'static str,
        source: ValidationError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Settings for one archive control session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveContext {
    /// Channel the archive receives control requests on.
    pub control_request_channel: String,
    pub control_request_stream_id: i32,
    /// Channel this client receives control responses on.
    pub control_response_channel: String,
    pub control_response_stream_id: i32,
    /// Deadline for the connect handshake.
    pub connect_timeout: Duration,
    /// Deadline for each control operation's response.
    pub message_timeout: Duration,
    /// Fragments drained per response poll sweep.
    pub fragment_limit: usize,
    /// Tuning for the default backoff idle strategy.
    pub idle: BackoffConfig,
}

impl Default for ArchiveContext {
    fn default() -> Self {
        Self {
            control_request_channel: DEFAULT_CONTROL_REQUEST_CHANNEL.to_owned(),
            control_request_stream_id: DEFAULT_CONTROL_REQUEST_STREAM_ID,
            control_response_channel: DEFAULT_CONTROL_RESPONSE_CHANNEL.to_owned(),
            control_response_stream_id: DEFAULT_CONTROL_RESPONSE_STREAM_ID,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            idle: BackoffConfig::default(),
        }
    }
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: var.to_owned(),
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

impl ArchiveContext {
    /// Defaults overlaid with `TITAN_ARCHIVE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut ctx = Self::default();
        let get = |suffix: &str| {
            let var = format!("{ENV_PREFIX}{suffix}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((_, v)) = get("CONTROL_REQUEST_CHANNEL") {
            ctx.control_request_channel = v;
        }
        if let Some((var, v)) = get("CONTROL_REQUEST_STREAM_ID") {
            ctx.control_request_stream_id = parse_var(&var, &v)?;
        }
        if let Some((_, v)) = get("CONTROL_RESPONSE_CHANNEL") {
            ctx.control_response_channel = v;
        }
        if let Some((var, v)) = get("CONTROL_RESPONSE_STREAM_ID") {
            ctx.control_response_stream_id = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("CONNECT_TIMEOUT_MS") {
            ctx.connect_timeout = Duration::from_millis(parse_var(&var, &v)?);
        }
        if let Some((var, v)) = get("MESSAGE_TIMEOUT_MS") {
            ctx.message_timeout = Duration::from_millis(parse_var(&var, &v)?);
        }
        if let Some((var, v)) = get("FRAGMENT_LIMIT") {
            ctx.fragment_limit = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("IDLE_MAX_SPINS") {
            ctx.idle.max_spins = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("IDLE_MAX_YIELDS") {
            ctx.idle.max_yields = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("IDLE_MIN_PARK_US") {
            ctx.idle.min_park = Duration::from_micros(parse_var(&var, &v)?);
        }
        if let Some((var, v)) = get("IDLE_MAX_PARK_US") {
            ctx.idle.max_park = Duration::from_micros(parse_var(&var, &v)?);
        }

        ctx.validate()?;
        Ok(ctx)
    }

    /// Checks channels, stream ids, deadlines and the fragment limit.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field| move |source| ConfigError::Invalid { field, source };

        validate_channel(&self.control_request_channel)
            .map_err(invalid("control_request_channel"))?;
        validate_stream_id(self.control_request_stream_id)
            .map_err(invalid("control_request_stream_id"))?;
        validate_channel(&self.control_response_channel)
            .map_err(invalid("control_response_channel"))?;
        validate_stream_id(self.control_response_stream_id)
            .map_err(invalid("control_response_stream_id"))?;

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Zero("connect_timeout"));
        }
        if self.message_timeout.is_zero() {
            return Err(ConfigError::Zero("message_timeout"));
        }
        if self.fragment_limit == 0 {
            return Err(ConfigError::Zero("fragment_limit"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_control_request(mut self, channel: impl Into<String>, stream_id: i32) -> Self {
        self.control_request_channel = channel.into();
        self.control_request_stream_id = stream_id;
        self
    }

    #[must_use]
    pub fn with_control_response(mut self, channel: impl Into<String>, stream_id: i32) -> Self {
        self.control_response_channel = channel.into();
        self.control_response_stream_id = stream_id;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_fragment_limit(mut self, limit: usize) -> Self {
        self.fragment_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_idle(mut self, idle: BackoffConfig) -> Self {
        self.idle = idle;
        self
    }

    /// Backoff strategy tuned by [`idle`](Self::idle).
    #[must_use]
    pub fn backoff_idle_strategy(&self) -> BackoffIdleStrategy {
        BackoffIdleStrategy::new(self.idle)
    }
}
