//! Error types for configuration loading.

use thiserror::Error;

/// Failures raised while reading console configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable held a value that could not be parsed.
    #[error("invalid configuration value")]
    InvalidValue {
        /// Environment variable name.
        variable: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The daemon URL did not parse.
    #[error("invalid daemon URL")]
    InvalidUrl {
        /// Environment variable name.
        variable: &'static str,
        /// Offending value.
        value: String,
        /// Parse error.
        source: url::ParseError,
    },
    /// Only one half of the credential pair was supplied.
    #[error("incomplete credentials")]
    IncompleteCredentials {
        /// Variable that was set.
        present: &'static str,
        /// Variable that was missing.
        missing: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
