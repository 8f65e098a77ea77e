#![forbid(unsafe_code)]
//! Telemetry primitives shared across the Lodestar workspace.
//!
//! This crate centralises logging and sync-engine metrics so the console
//! binary and the sync crates adopt a consistent observability story.

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::{GlobalContextGuard, record_daemon};
pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
