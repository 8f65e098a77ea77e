//! Environment parsing for `ConsoleConfig`.
//!
//! # Design
//! - `from_lookup` takes any variable source so tests never touch the process
//!   environment; `from_env` is a thin wrapper over it.
//! - Blank values count as unset.

use std::str::FromStr;
use std::time::Duration;

use lodestar_sync::MIN_INTERVAL;
use lodestar_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};
use tracing::warn;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConsoleConfig, Credentials};

/// Daemon base URL.
pub const ENV_DAEMON_URL: &str = "LODESTAR_DAEMON_URL";
/// Poll interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "LODESTAR_POLL_INTERVAL_MS";
/// HTTP timeout in seconds.
pub const ENV_HTTP_TIMEOUT_SECS: &str = "LODESTAR_HTTP_TIMEOUT_SECS";
/// Login name.
pub const ENV_USERNAME: &str = "LODESTAR_USERNAME";
/// Login password.
pub const ENV_PASSWORD: &str = "LODESTAR_PASSWORD";
/// Log level directive.
pub const ENV_LOG_LEVEL: &str = "LODESTAR_LOG_LEVEL";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "LODESTAR_LOG_FORMAT";

impl ConsoleConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but malformed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let daemon_url = parse_url(
            ENV_DAEMON_URL,
            get(ENV_DAEMON_URL).as_deref().unwrap_or(Self::DEFAULT_DAEMON_URL),
        )?;

        let poll_interval = get(ENV_POLL_INTERVAL_MS)
            .map(|raw| parse_number::<u64>(ENV_POLL_INTERVAL_MS, &raw))
            .transpose()?
            .map_or(Self::DEFAULT_POLL_INTERVAL, Duration::from_millis);
        let poll_interval = if poll_interval < MIN_INTERVAL {
            warn!(
                requested_ms = poll_interval.as_millis(),
                minimum_ms = MIN_INTERVAL.as_millis(),
                "poll interval below minimum; clamping"
            );
            MIN_INTERVAL
        } else {
            poll_interval
        };

        let http_timeout = match get(ENV_HTTP_TIMEOUT_SECS) {
            Some(raw) => {
                let secs = parse_number::<u64>(ENV_HTTP_TIMEOUT_SECS, &raw)?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        variable: ENV_HTTP_TIMEOUT_SECS,
                        value: raw,
                        reason: "must be greater than zero",
                    });
                }
                Duration::from_secs(secs)
            }
            None => Self::DEFAULT_HTTP_TIMEOUT,
        };

        let credentials = match (get(ENV_USERNAME), lookup(ENV_PASSWORD)) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::IncompleteCredentials {
                    present: ENV_USERNAME,
                    missing: ENV_PASSWORD,
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteCredentials {
                    present: ENV_PASSWORD,
                    missing: ENV_USERNAME,
                });
            }
        };

        let log_format = get(ENV_LOG_FORMAT)
            .map(|raw| {
                LogFormat::from_str(&raw).map_err(|_| ConfigError::InvalidValue {
                    variable: ENV_LOG_FORMAT,
                    value: raw,
                    reason: "expected json or pretty",
                })
            })
            .transpose()?
            .unwrap_or_else(LogFormat::infer);

        Ok(Self {
            daemon_url,
            poll_interval,
            http_timeout,
            credentials,
            log_level: get(ENV_LOG_LEVEL).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format,
        })
    }
}

fn parse_url(variable: &'static str, raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        variable,
        value: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            variable,
            value: raw.to_string(),
            reason: "scheme must be http or https",
        });
    }
    Ok(url)
}

fn parse_number<T: FromStr>(variable: &'static str, raw: &str) -> ConfigResult<T> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        variable,
        value: raw.to_string(),
        reason: "expected a non-negative integer",
    })
}
