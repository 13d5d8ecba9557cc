//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chatmirror_core::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_QUEUE_CAPACITY, EndpointId};
use chatmirror_transport::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// Endpoint options are optional here so that a missing option surfaces as
/// [`ConfigError::MissingField`](super::ConfigError::MissingField) during
/// validation instead of an opaque extraction error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Credentials for the first backend.
    #[serde(default)]
    pub endpoint_a_credentials: Option<Credentials>,

    /// Credentials for the second backend.
    #[serde(default)]
    pub endpoint_b_credentials: Option<Credentials>,

    /// Channel on the first backend.
    #[serde(default)]
    pub endpoint_a_channel_id: Option<String>,

    /// Channel on the second backend.
    #[serde(default)]
    pub endpoint_b_channel_id: Option<String>,

    /// Relay messages with empty text.
    #[serde(default = "default_true")]
    pub forward_empty: bool,

    /// Relay queue settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Network settings shared by both adapters.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            endpoint_a_credentials: None,
            endpoint_b_credentials: None,
            endpoint_a_channel_id: None,
            endpoint_b_channel_id: None,
            forward_empty: true,
            relay: RelayConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Credentials configured for an endpoint.
    pub fn credentials(&self, id: EndpointId) -> Option<&Credentials> {
        match id {
            EndpointId::A => self.endpoint_a_credentials.as_ref(),
            EndpointId::B => self.endpoint_b_credentials.as_ref(),
        }
    }

    /// Channel id configured for an endpoint.
    pub fn channel_id(&self, id: EndpointId) -> Option<&str> {
        match id {
            EndpointId::A => self.endpoint_a_channel_id.as_deref(),
            EndpointId::B => self.endpoint_b_channel_id.as_deref(),
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Credentials
// =============================================================================

/// Backend selection plus the secrets it needs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Credentials {
    /// Twitch IRC login.
    Twitch(TwitchCredentials),
    /// YouTube Data API OAuth token.
    Youtube(YoutubeCredentials),
}

impl Credentials {
    /// Backend name as written in the config.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Twitch(_) => "twitch",
            Self::Youtube(_) => "youtube",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Twitch(c) => f
                .debug_struct("Twitch")
                .field("username", &c.username)
                .field("oauth_token", &"<redacted>")
                .field("url", &c.url)
                .finish(),
            Self::Youtube(c) => f
                .debug_struct("Youtube")
                .field("access_token", &"<redacted>")
                .field("api_url", &c.api_url)
                .finish(),
        }
    }
}

/// Twitch chat login.
#[derive(Clone, Serialize, Deserialize)]
pub struct TwitchCredentials {
    /// Bot account login.
    #[serde(default)]
    pub username: String,

    /// OAuth token, with or without the `oauth:` prefix.
    #[serde(default)]
    pub oauth_token: String,

    /// Gateway URL override.
    #[serde(default)]
    pub url: Option<String>,
}

/// YouTube Data API access.
#[derive(Clone, Serialize, Deserialize)]
pub struct YoutubeCredentials {
    /// OAuth2 access token.
    #[serde(default)]
    pub access_token: String,

    /// API base URL override.
    #[serde(default)]
    pub api_url: Option<String>,
}

// =============================================================================
// Relay & Network
// =============================================================================

/// Relay queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Capacity of each direction's inbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long an adapter waits for queue space before dropping a message.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Delivery timeout as a duration.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_delivery_timeout_ms() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT.as_millis() as u64
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Timeout for network operations in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry configuration for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30000
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to the transport retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: Some(self.max_retries),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `chatmirror_transport = "warn"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}
