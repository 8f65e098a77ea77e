//! Typed console settings.

use std::fmt;
use std::time::Duration;

use lodestar_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};
use url::Url;

/// Login pair for the daemon's Web API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fully validated console configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Base URL of the daemon's Web API.
    pub daemon_url: Url,
    /// Poll interval used until the daemon advises one.
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Optional login; anonymous sessions work when the daemon whitelists the host.
    pub credentials: Option<Credentials>,
    /// Log level directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl ConsoleConfig {
    /// Default daemon location.
    pub const DEFAULT_DAEMON_URL: &'static str = "http://127.0.0.1:8080";
    /// Default poll interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_500);
    /// Default HTTP timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Log level, falling back to the workspace default when blank.
    #[must_use]
    pub fn log_level(&self) -> &str {
        if self.log_level.trim().is_empty() {
            DEFAULT_LOG_LEVEL
        } else {
            &self.log_level
        }
    }
}
