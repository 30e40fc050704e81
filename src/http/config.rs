//! HTTP client configuration.
//!
//! The config is plain data: serde-friendly, cloneable, and validated as a
//! whole before a client is built from it. Timeouts are seconds; a value
//! of 0 leaves the corresponding limit unset.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{HttpError, SUPPORTED_METHODS};

/// Transport timeout knobs, in seconds. 0 disables the limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// TCP connect timeout.
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Whole-request deadline, from first byte sent to body drained.
    #[serde(default = "default_overall_secs")]
    pub overall_secs: u64,
    /// Deadline for the response head (applied as a read timeout).
    #[serde(default = "default_response_header_secs")]
    pub response_header_secs: u64,
    /// How long idle connections stay pooled.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_connect_secs() -> u64 {
    30
}

fn default_overall_secs() -> u64 {
    60
}

fn default_response_header_secs() -> u64 {
    30
}

fn default_keep_alive_secs() -> u64 {
    90
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            overall_secs: default_overall_secs(),
            response_header_secs: default_response_header_secs(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Retry budget for transport failures. Non-2xx responses are returned to
/// the caller and never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first. -1 retries forever.
    #[serde(default)]
    pub times: i32,
    /// Delay between attempts, in milliseconds.
    #[serde(default = "default_retry_sleep_ms")]
    pub sleep_ms: u64,
}

fn default_retry_sleep_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: 0,
            sleep_ms: default_retry_sleep_ms(),
        }
    }
}

impl RetryPolicy {
    pub(crate) fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    /// Whether `attempts` completed attempts exhaust the budget.
    pub(crate) fn exhausted(&self, attempts: u32) -> bool {
        self.times >= 0 && attempts > self.times as u32
    }
}

/// What to capture as wire-image snapshots on each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpPolicy {
    /// No snapshots.
    #[default]
    Off,
    /// Request and response heads only.
    Headers,
    /// Heads plus bodies (response bodies are buffered to capture them).
    WithBody,
}

impl DumpPolicy {
    pub(crate) fn enabled(self) -> bool {
        self != DumpPolicy::Off
    }

    pub(crate) fn with_body(self) -> bool {
        self == DumpPolicy::WithBody
    }
}

/// Full client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Value of the `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Transport timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Retry budget for transport failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Wire-image capture policy.
    #[serde(default)]
    pub dump: DumpPolicy,
    /// Response-cache TTL per method, in seconds. Methods absent from the
    /// table are not cached.
    #[serde(default)]
    pub cache_ttl: HashMap<String, i64>,
    /// Whether the transport keeps a cookie jar across requests.
    #[serde(default)]
    pub use_cookies: bool,
}

fn default_user_agent() -> String {
    format!("GoKit XHTTP Client/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            dump: DumpPolicy::default(),
            cache_ttl: HashMap::new(),
            use_cookies: false,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from a JSON document and validate it.
    ///
    /// # Errors
    ///
    /// [`HttpError::Config`] on malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, HttpError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| HttpError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and the cache TTL table.
    ///
    /// # Errors
    ///
    /// [`HttpError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), HttpError> {
        if self.user_agent.trim().is_empty() {
            return Err(HttpError::Config("user_agent must not be empty".into()));
        }
        if self.retry.times < -1 {
            return Err(HttpError::Config(
                "retry.times must be -1 (forever) or non-negative".into(),
            ));
        }
        for (method, ttl) in &self.cache_ttl {
            if !SUPPORTED_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                return Err(HttpError::Config(format!(
                    "cache_ttl references unsupported method {method:?}"
                )));
            }
            if *ttl <= 0 {
                return Err(HttpError::Config(format!(
                    "cache_ttl for {method} must be positive, got {ttl}"
                )));
            }
        }
        Ok(())
    }
}
