//! Diff-fetch contract consumed from the daemon gateway.

use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::{Cursor, VersionedDiff};

/// One versioned diff endpoint of the daemon API.
///
/// Implementations classify failures from the transport outcome (status code,
/// timeout, undecodable body); they never inspect payload content to decide
/// whether a failure is permanent.
#[async_trait]
pub trait DiffSource: Send + Sync + 'static {
    /// Entity a controller binds to (a torrent hash, or a unit for global data).
    type Subject: Clone + PartialEq + Debug + Display + Send + Sync + 'static;
    /// Diff payload returned by the endpoint.
    type Diff: VersionedDiff + Send + 'static;

    /// Stable endpoint label used in logs, metrics, and errors.
    fn endpoint(&self) -> &'static str;

    /// Fetch changes for `subject` since `cursor`.
    async fn fetch_diff(
        &self,
        subject: &Self::Subject,
        cursor: Cursor,
    ) -> Result<Self::Diff, FetchError>;
}
