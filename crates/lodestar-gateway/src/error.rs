//! Errors raised while setting up or authenticating the daemon client.

use thiserror::Error;

/// Failures outside the poll path; diff fetches report `FetchError` instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    ClientBuild {
        /// Builder error.
        source: reqwest::Error,
    },
    /// The daemon base URL cannot carry relative paths.
    #[error("daemon URL cannot be used as a base")]
    InvalidBaseUrl {
        /// Offending URL.
        value: String,
    },
    /// An endpoint path could not be joined onto the base URL.
    #[error("invalid endpoint path")]
    InvalidPath {
        /// Path that failed to join.
        path: &'static str,
        /// Parse error.
        source: url::ParseError,
    },
    /// The request never produced a response.
    #[error("daemon request failed")]
    Request {
        /// Operation identifier.
        operation: &'static str,
        /// Transport error.
        source: reqwest::Error,
    },
    /// The daemon refused the supplied credentials.
    #[error("daemon rejected the credentials")]
    LoginRejected {
        /// HTTP status of the login response.
        status: u16,
    },
}

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;
