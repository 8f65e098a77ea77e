//! Peers of one torrent, keyed by `ip:port`.

use serde::{Deserialize, Serialize};

use super::patch_fields;
use crate::model::{Auxiliary, DiffPayload, Patch, Snapshot, patch_field};
use crate::reconcile::reconcile_patched;

/// One connected peer; incremental diffs only carry the fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerEntry {
    pub ip: Option<String>,
    pub port: Option<u16>,
    /// Client name and version the peer advertises.
    pub client: Option<String>,
    /// Country name; only sent when the daemon resolves peer locations.
    pub country: Option<String>,
    /// ISO 3166 alpha-2 code, lowercase.
    pub country_code: Option<String>,
    /// Transport such as `BT`, `uTP` or `Web`.
    pub connection: Option<String>,
    /// Compact libtorrent flag letters, e.g. `D X E`.
    pub flags: Option<String>,
    /// One human-readable line per flag.
    pub flags_desc: Option<String>,
    /// Share of the torrent the peer holds, 0.0-1.0.
    pub progress: Option<f64>,
    /// Bytes per second we receive from the peer.
    pub dl_speed: Option<u64>,
    /// Bytes per second we send to the peer.
    pub up_speed: Option<u64>,
    pub downloaded: Option<u64>,
    pub uploaded: Option<u64>,
    /// Share of the pieces we still miss that the peer can supply, 0.0-1.0.
    pub relevance: Option<f64>,
    /// Newline-separated names of the files the peer is currently exchanging.
    pub files: Option<String>,
}

impl Patch for PeerEntry {
    fn patch(&mut self, incoming: Self) {
        patch_fields!(self, incoming;
            ip, port, client, country, country_code, connection, flags, flags_desc,
            progress, dl_speed, up_speed, downloaded, uploaded, relevance, files,
        );
    }
}

/// Display hints sent next to the peer list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDisplay {
    /// Tri-state: `None` until the daemon says whether country flags apply.
    pub show_flags: Option<bool>,
}

impl Auxiliary for PeerDisplay {
    fn absorb(&mut self, incoming: Self) {
        patch_field(&mut self.show_flags, incoming.show_flags);
    }
}

/// One peers poll response.
pub type PeersDiff = DiffPayload<String, PeerEntry, PeerDisplay>;

/// Mirror of one torrent's peers.
pub type PeersSnapshot = Snapshot<String, PeerEntry, PeerDisplay>;

/// Fold one peers diff into the prior snapshot.
#[must_use]
pub fn reconcile_peers(prior: &PeersSnapshot, diff: PeersDiff) -> PeersSnapshot {
    reconcile_patched(prior, diff)
}
