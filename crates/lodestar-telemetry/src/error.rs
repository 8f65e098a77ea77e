//! Telemetry failures.

use prometheus::Error as PrometheusError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    Subscriber(#[source] TryInitError),
    #[error("unknown log format")]
    UnknownLogFormat {
        /// Normalised value that was rejected.
        value: String,
    },
    #[error("failed to build metric collector")]
    Collector {
        name: &'static str,
        #[source]
        source: PrometheusError,
    },
    /// Usually a duplicate metric name within one registry.
    #[error("failed to register metric collector")]
    Register {
        name: &'static str,
        #[source]
        source: PrometheusError,
    },
    #[error("failed to encode metrics")]
    Encode(#[source] PrometheusError),
    #[error("encoded metrics were not valid utf-8")]
    Utf8(#[source] std::string::FromUtf8Error),
}

impl TelemetryError {
    /// Metric the failure is tied to, when there is one.
    #[must_use]
    pub const fn metric(&self) -> Option<&'static str> {
        match self {
            Self::Collector { name, .. } | Self::Register { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_stay_constant_and_keep_their_cause() {
        let err = TelemetryError::Register {
            name: "sync_ticks_total",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(err.to_string(), "failed to register metric collector");
        assert_eq!(err.metric(), Some("sync_ticks_total"));
        assert!(err.source().is_some());

        let encode = TelemetryError::Encode(PrometheusError::Msg("boom".to_string()));
        assert_eq!(encode.metric(), None);
        assert!(encode.source().is_some());
    }

    #[test]
    fn unknown_format_has_no_cause() {
        let err = TelemetryError::UnknownLogFormat {
            value: "xml".to_string(),
        };
        assert_eq!(err.to_string(), "unknown log format");
        assert!(err.source().is_none());
    }
}
