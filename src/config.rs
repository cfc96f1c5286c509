//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines the
//! defaults shared by the REST client and the progress stream.

use crate::progress::ReconnectPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `DOWNLOAD_TRACKER_BASE_URL`.
pub const ENV_PREFIX: &str = "DOWNLOAD_TRACKER";

/// Default base URL of the download service
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/download";
/// Default progress endpoint, relative to the base URL
pub const DEFAULT_PROGRESS_PATH: &str = "task/progress/{task_id}";
/// Placeholder substituted with the task id in `progress_path`
pub const TASK_ID_PLACEHOLDER: &str = "{task_id}";

/// Timeout for ordinary REST calls
pub const REQUEST_TIMEOUT_SECS: u64 = 60;
/// Timeout for establishing a TCP/TLS connection
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// First reconnect delay
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1000;
/// Upper bound for the reconnect delay
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
/// Reconnect attempts before a stream gives up
pub const RECONNECT_MAX_RETRIES: u32 = 5;

/// Freshness window of cached task status replies (5 minutes)
pub const STATUS_CACHE_TTL_SECS: u64 = 300;
/// Maximum number of cached task status replies
pub const STATUS_CACHE_MAX_SIZE: u64 = 100;

/// Application settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL of the download service REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Progress endpoint relative to `base_url`; `{task_id}` is substituted
    #[serde(default = "default_progress_path")]
    pub progress_path: String,

    /// Timeout for REST calls in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds (REST and SSE)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    /// Reconnect delay cap in milliseconds
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up
    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,

    /// Status cache TTL in seconds
    #[serde(default = "default_status_cache_ttl_secs")]
    pub status_cache_ttl_secs: u64,
    /// Status cache capacity
    #[serde(default = "default_status_cache_max_size")]
    pub status_cache_max_size: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_progress_path() -> String {
    DEFAULT_PROGRESS_PATH.to_string()
}

const fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}

const fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT_SECS
}

const fn default_reconnect_initial_delay_ms() -> u64 {
    RECONNECT_INITIAL_DELAY_MS
}

const fn default_reconnect_max_delay_ms() -> u64 {
    RECONNECT_MAX_DELAY_MS
}

const fn default_reconnect_max_retries() -> u32 {
    RECONNECT_MAX_RETRIES
}

const fn default_status_cache_ttl_secs() -> u64 {
    STATUS_CACHE_TTL_SECS
}

const fn default_status_cache_max_size() -> u64 {
    STATUS_CACHE_MAX_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            progress_path: default_progress_path(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            reconnect_initial_delay_ms: RECONNECT_INITIAL_DELAY_MS,
            reconnect_max_delay_ms: RECONNECT_MAX_DELAY_MS,
            reconnect_max_retries: RECONNECT_MAX_RETRIES,
            status_cache_ttl_secs: STATUS_CACHE_TTL_SECS,
            status_cache_max_size: STATUS_CACHE_MAX_SIZE,
        }
    }
}

impl Settings {
    /// Create new settings by loading from config files and environment
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use download_tracker::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg. `DOWNLOAD_TRACKER_BASE_URL=http://host/api/download`
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .ignore_empty(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Reconnect policy for progress streams
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_retries: self.reconnect_max_retries,
        }
    }

    /// REST request timeout
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Status cache TTL
    #[must_use]
    pub const fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test so environment mutations never race each other
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        // 1. Defaults without any overrides
        let settings = Settings::new()?;
        assert_eq!(settings, Settings::default());

        // 2. Prefixed overrides, numeric values parsed from strings
        env::set_var("DOWNLOAD_TRACKER_BASE_URL", "https://files.example.com/api/download");
        env::set_var("DOWNLOAD_TRACKER_RECONNECT_MAX_RETRIES", "3");

        let settings = Settings::new()?;
        assert_eq!(settings.base_url, "https://files.example.com/api/download");
        assert_eq!(settings.reconnect_max_retries, 3);
        assert_eq!(settings.progress_path, DEFAULT_PROGRESS_PATH);

        env::remove_var("DOWNLOAD_TRACKER_BASE_URL");
        env::remove_var("DOWNLOAD_TRACKER_RECONNECT_MAX_RETRIES");

        // 3. Empty values are treated as unset
        env::set_var("DOWNLOAD_TRACKER_BASE_URL", "");
        let settings = Settings::new()?;
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        env::remove_var("DOWNLOAD_TRACKER_BASE_URL");

        Ok(())
    }

    #[test]
    fn test_reconnect_policy_from_settings() {
        let settings = Settings {
            reconnect_initial_delay_ms: 250,
            reconnect_max_delay_ms: 4000,
            reconnect_max_retries: 2,
            ..Settings::default()
        };

        let policy = settings.reconnect_policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
        assert_eq!(policy.max_retries, 2);
    }
}
