#![forbid(unsafe_code)]
//! Wire DTOs for the daemon's qBittorrent-compatible diff endpoints.
//!
//! Each envelope mirrors one response body and converts into the matching
//! `lodestar-sync` diff, so the gateway never touches reconcile types directly.
//! Entity rows reuse the sync crate's types; their serde attributes already
//! describe the wire field names.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use lodestar_sync::Cursor;
use lodestar_sync::entities::{
    CategoryEntry, MainDataDiff, PeerDisplay, PeerEntry, PeersDiff, ServerState, TorrentEntry,
    TorrentHash, TrackerEntry, TrackersDiff,
};

/// Path of the main data diff endpoint.
pub const MAINDATA_PATH: &str = "/api/v2/sync/maindata";
/// Path of the per-torrent peers diff endpoint.
pub const TORRENT_PEERS_PATH: &str = "/api/v2/sync/torrentPeers";
/// Path of the per-torrent trackers endpoint (not versioned).
pub const TORRENT_TRACKERS_PATH: &str = "/api/v2/torrents/trackers";
/// Path of the session login endpoint.
pub const LOGIN_PATH: &str = "/api/v2/auth/login";

/// Query string shared by the diff endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQuery {
    /// Last cursor the client applied; zero requests a full update.
    pub rid: u64,
    /// Torrent hash for per-torrent endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl SyncQuery {
    /// Query for a global collection.
    #[must_use]
    pub const fn global(cursor: Cursor) -> Self {
        Self {
            rid: cursor.get(),
            hash: None,
        }
    }

    /// Query for one torrent's collection.
    #[must_use]
    pub fn torrent(hash: &TorrentHash, cursor: Cursor) -> Self {
        Self {
            rid: cursor.get(),
            hash: Some(hash.to_string()),
        }
    }
}

/// Query string for per-torrent endpoints that carry no version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashQuery {
    /// Torrent hash.
    pub hash: String,
}

impl From<&TorrentHash> for HashQuery {
    fn from(hash: &TorrentHash) -> Self {
        Self {
            hash: hash.to_string(),
        }
    }
}

/// Form body for the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// `/api/v2/sync/maindata` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMainData {
    /// Server version reached by this response.
    pub rid: u64,
    /// Whether the client must discard its prior state.
    pub full_update: bool,
    /// Changed torrents keyed by hash; fields are partial on incremental updates.
    pub torrents: HashMap<String, TorrentEntry>,
    /// Hashes of removed torrents.
    pub torrents_removed: Vec<String>,
    /// Changed categories keyed by name.
    pub categories: HashMap<String, CategoryEntry>,
    /// Names of removed categories.
    pub categories_removed: Vec<String>,
    /// Added tags.
    pub tags: Vec<String>,
    /// Removed tags.
    pub tags_removed: Vec<String>,
    /// Changed trackers keyed by URL, each listing the hashes announcing to it.
    pub trackers: HashMap<String, Vec<String>>,
    /// URLs of removed trackers.
    pub trackers_removed: Vec<String>,
    /// Changed server state fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_state: Option<ServerState>,
}

impl From<SyncMainData> for MainDataDiff {
    fn from(value: SyncMainData) -> Self {
        Self {
            cursor: Cursor::new(value.rid),
            full_update: value.full_update,
            torrents: value
                .torrents
                .into_iter()
                .map(|(hash, entry)| (TorrentHash::from(hash), entry))
                .collect(),
            torrents_removed: value
                .torrents_removed
                .into_iter()
                .map(TorrentHash::from)
                .collect(),
            categories: value.categories,
            categories_removed: value.categories_removed.into_iter().collect(),
            tags: value.tags.into_iter().collect(),
            tags_removed: value.tags_removed.into_iter().collect(),
            trackers: value
                .trackers
                .into_iter()
                .map(|(url, hashes)| {
                    let hashes: BTreeSet<TorrentHash> =
                        hashes.into_iter().map(TorrentHash::from).collect();
                    (url, hashes)
                })
                .collect(),
            trackers_removed: value.trackers_removed.into_iter().collect(),
            server_state: value.server_state,
        }
    }
}

/// `/api/v2/sync/torrentPeers` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTorrentPeers {
    /// Server version reached by this response.
    pub rid: u64,
    /// Whether the client must discard its prior state.
    pub full_update: bool,
    /// Changed peers keyed by `ip:port`; fields are partial on incremental updates.
    pub peers: HashMap<String, PeerEntry>,
    /// Keys of disconnected peers.
    pub peers_removed: Vec<String>,
    /// Whether country flags should be shown; absent when unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_flags: Option<bool>,
}

impl From<SyncTorrentPeers> for PeersDiff {
    fn from(value: SyncTorrentPeers) -> Self {
        Self {
            cursor: Cursor::new(value.rid),
            full_update: value.full_update,
            upserts: value.peers,
            removals: value.peers_removed.into_iter().collect::<HashSet<_>>(),
            auxiliary: PeerDisplay {
                show_flags: value.show_flags,
            },
        }
    }
}

/// `/api/v2/torrents/trackers` response body: the complete tracker list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentTrackers(pub Vec<TrackerEntry>);

impl TorrentTrackers {
    /// Synthesise a full-update diff one version past `previous`.
    ///
    /// The endpoint carries no version, so every response replaces the
    /// snapshot and the cursor simply counts responses.
    #[must_use]
    pub fn into_diff(self, previous: Cursor) -> TrackersDiff {
        let upserts = self
            .0
            .into_iter()
            .map(|entry| (entry.url.clone(), entry))
            .collect();
        TrackersDiff::full(previous.next(), upserts)
    }
}
