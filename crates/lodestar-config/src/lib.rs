#![forbid(unsafe_code)]

//! Console configuration loaded from `LODESTAR_*` environment variables.
//!
//! Layout: `model.rs` (typed settings), `loader.rs` (environment parsing and
//! validation), `error.rs` (`ConfigError`).

pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    ENV_DAEMON_URL, ENV_HTTP_TIMEOUT_SECS, ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_PASSWORD,
    ENV_POLL_INTERVAL_MS, ENV_USERNAME,
};
pub use model::{ConsoleConfig, Credentials};
