//! Main data: the global torrent list plus categories, tags, trackers, and the
//! server state block, all versioned by one cursor.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{TorrentHash, patch_fields};
use crate::model::{Auxiliary, Cursor, DiffPayload, Patch, Snapshot, SnapshotSummary, VersionedDiff};
use crate::reconcile::{reconcile, reconcile_patched};

/// Subject of the main data loop; there is exactly one per daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GlobalSubject;

impl fmt::Display for GlobalSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("global")
    }
}

/// One torrent row; incremental diffs only carry the fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentEntry {
    /// Display name.
    pub name: Option<String>,
    /// Daemon state label such as `downloading` or `stalledUP`.
    pub state: Option<String>,
    /// Completion in the range 0.0-1.0.
    pub progress: Option<f64>,
    /// Bytes selected for download; `-1` until metadata is known.
    pub size: Option<i64>,
    /// Bytes across every file; `-1` until metadata is known (magnet links).
    pub total_size: Option<i64>,
    /// Bytes still to fetch for the selected files.
    pub amount_left: Option<i64>,
    /// Download rate in bytes per second.
    pub dlspeed: Option<u64>,
    /// Upload rate in bytes per second.
    pub upspeed: Option<u64>,
    /// Bytes downloaded over the torrent's lifetime.
    pub downloaded: Option<u64>,
    /// Bytes uploaded over the torrent's lifetime.
    pub uploaded: Option<u64>,
    /// Per-torrent download cap in bytes per second; `-1` or `0` means none.
    pub dl_limit: Option<i64>,
    /// Per-torrent upload cap in bytes per second; `-1` or `0` means none.
    pub up_limit: Option<i64>,
    /// Seconds; the daemon reports 8640000 for "unknown".
    pub eta: Option<i64>,
    /// Share ratio (uploaded over downloaded).
    pub ratio: Option<f64>,
    /// Category name; empty when uncategorised.
    pub category: Option<String>,
    /// Comma-separated tag list.
    pub tags: Option<String>,
    pub save_path: Option<String>,
    /// Root file or folder of the payload.
    pub content_path: Option<String>,
    /// Unix seconds.
    pub added_on: Option<i64>,
    /// Unix seconds; `-1` while incomplete.
    pub completion_on: Option<i64>,
    /// Seeds currently connected.
    pub num_seeds: Option<i64>,
    /// Leechers currently connected.
    pub num_leechs: Option<i64>,
    /// Seeds in the swarm as reported by trackers.
    pub num_complete: Option<i64>,
    /// Leechers in the swarm as reported by trackers.
    pub num_incomplete: Option<i64>,
    /// Tracker currently in use; empty when none is working.
    pub tracker: Option<String>,
    /// Queue position, starting at 1; `0` when queueing is disabled or the torrent is seeding.
    pub priority: Option<i64>,
    /// Sequential download: pieces are fetched in order.
    pub seq_dl: Option<bool>,
    /// Seconds spent active.
    pub time_active: Option<i64>,
}

impl Patch for TorrentEntry {
    fn patch(&mut self, incoming: Self) {
        patch_fields!(self, incoming;
            name, state, progress, size, total_size, amount_left, dlspeed, upspeed,
            downloaded, uploaded, dl_limit, up_limit, eta, ratio, category, tags,
            save_path, content_path, added_on, completion_on, num_seeds, num_leechs,
            num_complete, num_incomplete, tracker, priority, seq_dl, time_active,
        );
    }
}

impl TorrentEntry {
    /// Tags split out of the comma-separated wire form.
    #[must_use]
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Category definition; incremental diffs may carry only the changed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryEntry {
    pub name: Option<String>,
    /// Default download directory for torrents in the category.
    #[serde(rename = "savePath", alias = "save_path")]
    pub save_path: Option<String>,
}

impl Patch for CategoryEntry {
    fn patch(&mut self, incoming: Self) {
        patch_fields!(self, incoming; name, save_path);
    }
}

/// Global transfer and connection status; patched field-wise like torrents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerState {
    /// `connected`, `firewalled` or `disconnected`.
    pub connection_status: Option<String>,
    pub dht_nodes: Option<u64>,
    pub dl_info_speed: Option<u64>,
    pub dl_info_data: Option<u64>,
    pub up_info_speed: Option<u64>,
    pub up_info_data: Option<u64>,
    /// Global download cap in bytes per second; `0` means none.
    pub dl_rate_limit: Option<u64>,
    pub up_rate_limit: Option<u64>,
    pub alltime_dl: Option<u64>,
    pub alltime_ul: Option<u64>,
    pub free_space_on_disk: Option<u64>,
    pub queueing: Option<bool>,
    /// Alternative ("turtle") speed limits are active.
    pub use_alt_speed_limits: Option<bool>,
    /// Daemon-advised poll interval in milliseconds.
    pub refresh_interval: Option<u64>,
}

impl Patch for ServerState {
    fn patch(&mut self, incoming: Self) {
        patch_fields!(self, incoming;
            connection_status, dht_nodes, dl_info_speed, dl_info_data, up_info_speed,
            up_info_data, dl_rate_limit, up_rate_limit, alltime_dl, alltime_ul,
            free_space_on_disk, queueing, use_alt_speed_limits, refresh_interval,
        );
    }
}

/// One main data poll response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainDataDiff {
    /// The daemon's `rid`.
    pub cursor: Cursor,
    pub full_update: bool,
    pub torrents: HashMap<TorrentHash, TorrentEntry>,
    pub torrents_removed: HashSet<TorrentHash>,
    pub categories: HashMap<String, CategoryEntry>,
    pub categories_removed: HashSet<String>,
    pub tags: HashSet<String>,
    pub tags_removed: HashSet<String>,
    /// Tracker URL to the hashes of torrents announcing to it.
    pub trackers: HashMap<String, BTreeSet<TorrentHash>>,
    pub trackers_removed: HashSet<String>,
    pub server_state: Option<ServerState>,
}

impl VersionedDiff for MainDataDiff {
    fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn is_full_update(&self) -> bool {
        self.full_update
    }
}

/// Mirror of every main data collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainDataSnapshot {
    pub torrents: Snapshot<TorrentHash, TorrentEntry>,
    pub categories: Snapshot<String, CategoryEntry>,
    pub tags: Snapshot<String, ()>,
    pub trackers: Snapshot<String, BTreeSet<TorrentHash>>,
    pub server_state: Option<ServerState>,
}

impl MainDataSnapshot {
    /// Poll interval advised by the daemon, if it sent one.
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.server_state
            .as_ref()
            .and_then(|state| state.refresh_interval)
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    /// Tag names in sorted order.
    #[must_use]
    pub fn sorted_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.tags.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl SnapshotSummary for MainDataSnapshot {
    fn entry_count(&self) -> usize {
        self.torrents.len()
    }
}

fn split<K, V>(
    cursor: Cursor,
    full_update: bool,
    upserts: HashMap<K, V>,
    removals: HashSet<K>,
) -> DiffPayload<K, V> {
    DiffPayload {
        cursor,
        full_update,
        upserts,
        removals,
        auxiliary: (),
    }
}

/// Fold one main data diff into the prior snapshot, collection by collection.
#[must_use]
pub fn reconcile_maindata(prior: &MainDataSnapshot, diff: MainDataDiff) -> MainDataSnapshot {
    let MainDataDiff {
        cursor,
        full_update,
        torrents,
        torrents_removed,
        categories,
        categories_removed,
        tags,
        tags_removed,
        trackers,
        trackers_removed,
        server_state,
    } = diff;

    let tags: HashMap<String, ()> = tags.into_iter().map(|tag| (tag, ())).collect();
    let mut retained_state = prior.server_state.clone();
    retained_state.absorb(server_state);

    MainDataSnapshot {
        torrents: reconcile_patched(
            &prior.torrents,
            split(cursor, full_update, torrents, torrents_removed),
        ),
        categories: reconcile_patched(
            &prior.categories,
            split(cursor, full_update, categories, categories_removed),
        ),
        tags: reconcile(&prior.tags, split(cursor, full_update, tags, tags_removed)),
        trackers: reconcile(
            &prior.trackers,
            split(cursor, full_update, trackers, trackers_removed),
        ),
        server_state: retained_state,
    }
}
