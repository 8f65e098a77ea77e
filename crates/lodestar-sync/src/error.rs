//! Fetch failure taxonomy and scheduler errors.

use std::error::Error;

use lodestar_events::TaskState;
use thiserror::Error;

/// Whether a failed fetch should end polling for the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry on the next tick with cursor and snapshot untouched.
    Transient,
    /// Subject is gone or access was revoked; stop polling.
    Permanent,
}

impl FailureClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Per-endpoint mapping from non-success HTTP status to failure class.
///
/// Statuses listed in `permanent` stop polling; every other non-success
/// status is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    permanent: &'static [u16],
}

impl StatusPolicy {
    /// Only "not found" ends polling.
    pub const NOT_FOUND: Self = Self::new(&[404]);
    /// Only "forbidden" ends polling.
    pub const FORBIDDEN: Self = Self::new(&[403]);
    /// Both "not found" and "forbidden" end polling.
    pub const NOT_FOUND_OR_FORBIDDEN: Self = Self::new(&[403, 404]);

    /// Policy treating the listed statuses as permanent.
    #[must_use]
    pub const fn new(permanent: &'static [u16]) -> Self {
        Self { permanent }
    }

    /// Classify one non-success status.
    #[must_use]
    pub fn classify(&self, status: u16) -> FailureClass {
        if self.permanent.contains(&status) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }

    /// Build the fetch error for a non-success status on `endpoint`.
    #[must_use]
    pub fn failure_for_status(&self, endpoint: &'static str, status: u16) -> FetchError {
        match self.classify(status) {
            FailureClass::Permanent => FetchError::SubjectUnavailable { endpoint, status },
            FailureClass::Transient => FetchError::UnexpectedStatus { endpoint, status },
        }
    }
}

/// Outcome of a failed diff fetch, already classified by transport outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The subject no longer exists or access to it was revoked.
    #[error("subject unavailable")]
    SubjectUnavailable {
        /// Endpoint that reported the failure.
        endpoint: &'static str,
        /// HTTP status returned by the daemon.
        status: u16,
    },
    /// The daemon answered with a non-success status outside the permanent set.
    #[error("unexpected response status")]
    UnexpectedStatus {
        /// Endpoint that reported the failure.
        endpoint: &'static str,
        /// HTTP status returned by the daemon.
        status: u16,
    },
    /// The request did not complete within the configured timeout.
    #[error("diff request timed out")]
    Timeout {
        /// Endpoint that timed out.
        endpoint: &'static str,
    },
    /// The request failed before a response was received.
    #[error("diff request failed")]
    Transport {
        /// Endpoint that failed.
        endpoint: &'static str,
        /// Underlying transport failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The response body could not be decoded.
    #[error("diff payload could not be decoded")]
    Decode {
        /// Endpoint whose payload was malformed.
        endpoint: &'static str,
        /// Underlying decode failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl FetchError {
    /// Failure class deciding whether polling continues.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::SubjectUnavailable { .. } => FailureClass::Permanent,
            Self::UnexpectedStatus { .. }
            | Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::Decode { .. } => FailureClass::Transient,
        }
    }

    /// Endpoint the failure belongs to.
    #[must_use]
    pub const fn endpoint(&self) -> &'static str {
        match self {
            Self::SubjectUnavailable { endpoint, .. }
            | Self::UnexpectedStatus { endpoint, .. }
            | Self::Timeout { endpoint }
            | Self::Transport { endpoint, .. }
            | Self::Decode { endpoint, .. } => *endpoint,
        }
    }

    /// HTTP status when the daemon answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::SubjectUnavailable { status, .. } | Self::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            Self::Timeout { .. } | Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }
}

/// Errors raised by recurring task and controller lifecycle calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// `start` was called on a task that already left `Idle`.
    #[error("recurring task already started")]
    AlreadyStarted {
        /// State the task was in.
        state: TaskState,
    },
    /// The operation is not valid from the current state.
    #[error("invalid recurring task transition")]
    InvalidTransition {
        /// Operation identifier.
        operation: &'static str,
        /// State the task was in.
        state: TaskState,
    },
    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the task")]
    NoRuntime,
    /// The controller has no active subject.
    #[error("controller is not active")]
    Inactive,
}
