//! CLI errors and the connected application context.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use lodestar_config::{ConfigError, ConsoleConfig};
use lodestar_gateway::{DaemonClient, GatewayError};
use tracing::info;

use crate::cli::OutputFormat;

/// Command failure, split by exit code: bad input (2) or a failed run (3).
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let detail = match &err {
            ConfigError::InvalidValue {
                variable,
                value,
                reason,
            } => format!("{err}: {variable}={value:?} ({reason})"),
            ConfigError::InvalidUrl {
                variable, value, ..
            } => format!("{err}: {variable}={value:?}"),
            ConfigError::IncompleteCredentials { present, missing } => {
                format!("{err}: {present} is set but {missing} is not")
            }
        };
        Self::Validation(detail)
    }
}

impl From<GatewayError> for CliError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidBaseUrl { value } => {
                Self::Validation(format!("daemon URL cannot be used as a base: {value}"))
            }
            other => Self::Failure(other.into()),
        }
    }
}

/// Connected daemon client plus the settings every command reads.
#[derive(Debug, Clone)]
pub(crate) struct AppContext {
    pub(crate) client: DaemonClient,
    pub(crate) poll_interval: Duration,
    /// Upper bound on waiting for a controller's first answer.
    pub(crate) settle_timeout: Duration,
    pub(crate) output: OutputFormat,
}

impl AppContext {
    /// Build the daemon client and open a session when credentials are set.
    pub(crate) async fn connect(config: &ConsoleConfig, output: OutputFormat) -> CliResult<Self> {
        let client = DaemonClient::new(config.daemon_url.clone(), config.http_timeout)?;
        if let Some(credentials) = &config.credentials {
            client
                .login(&credentials.username, &credentials.password)
                .await?;
        } else {
            info!(daemon = %config.daemon_url, "no credentials configured; using anonymous session");
        }

        Ok(Self {
            client,
            poll_interval: config.poll_interval,
            settle_timeout: config.http_timeout * 2,
            output,
        })
    }
}
