//! Per-entity instantiations of the generic poll loop.
//!
//! - `maindata`: global torrent list, categories, tags, trackers, server state
//! - `peers`: peers of one torrent
//! - `trackers`: trackers of one torrent

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod maindata;
pub mod peers;
pub mod trackers;

pub use maindata::{
    CategoryEntry, GlobalSubject, MainDataDiff, MainDataSnapshot, ServerState, TorrentEntry,
    reconcile_maindata,
};
pub use peers::{PeerDisplay, PeerEntry, PeersDiff, PeersSnapshot, reconcile_peers};
pub use trackers::{TrackerEntry, TrackersDiff, TrackersSnapshot, reconcile_trackers};

/// Info-hash identifying one torrent on the daemon.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentHash(String);

impl TorrentHash {
    /// Wrap a hash as reported by the daemon.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Hash as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TorrentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TorrentHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TorrentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TorrentHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Field-wise patch of partial entries: every listed `Option` field the
/// incoming value carries overwrites the retained one.
macro_rules! patch_fields {
    ($target:ident, $incoming:ident; $($field:ident),+ $(,)?) => {
        $( $crate::model::patch_field(&mut $target.$field, $incoming.$field); )+
    };
}

pub(crate) use patch_fields;
