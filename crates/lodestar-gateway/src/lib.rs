#![forbid(unsafe_code)]

//! Daemon gateway: an authenticated HTTP client and one `DiffSource` per
//! versioned endpoint.
//!
//! Transport outcomes are classified here, once, into `FetchError`; the poll
//! loop never sees an HTTP status or a `reqwest` error directly.

pub mod client;
pub mod error;
pub mod sources;

pub use client::DaemonClient;
pub use error::GatewayError;
pub use sources::{MainDataSource, TorrentPeersSource, TorrentTrackersSource};
