//! Trackers of one torrent, keyed by announce URL.
//!
//! The daemon serves this collection whole on every request, so each diff is a
//! full update and entries are overwritten rather than patched.

use serde::{Deserialize, Serialize};

use crate::model::{DiffPayload, Snapshot};
use crate::reconcile::reconcile;

/// Announce state of one tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerEntry {
    pub url: String,
    /// 0 disabled, 1 not contacted, 2 working, 3 updating, 4 not working.
    pub status: i64,
    /// Announce tier; `-1` for the DHT, PeX and LSD pseudo-trackers.
    pub tier: i64,
    pub num_peers: i64,
    pub num_seeds: i64,
    pub num_leeches: i64,
    /// `-1` when the tracker does not report it.
    pub num_downloaded: i64,
    /// Last message the tracker returned.
    pub msg: String,
}

impl TrackerEntry {
    /// Human-readable announce state.
    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        match self.status {
            0 => "disabled",
            1 => "not contacted",
            2 => "working",
            3 => "updating",
            4 => "not working",
            _ => "unknown",
        }
    }
}

/// One trackers poll response.
pub type TrackersDiff = DiffPayload<String, TrackerEntry>;

/// Mirror of one torrent's trackers.
pub type TrackersSnapshot = Snapshot<String, TrackerEntry>;

/// Fold one trackers diff into the prior snapshot.
#[must_use]
pub fn reconcile_trackers(prior: &TrackersSnapshot, diff: TrackersDiff) -> TrackersSnapshot {
    reconcile(prior, diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cursor;
    use std::collections::HashMap;

    #[test]
    fn full_refresh_drops_trackers_no_longer_listed() {
        let entry = |url: &str, status| TrackerEntry {
            url: url.to_string(),
            status,
            ..TrackerEntry::default()
        };
        let prior = reconcile_trackers(
            &TrackersSnapshot::default(),
            TrackersDiff::full(
                Cursor::new(1),
                HashMap::from([
                    ("udp://a".to_string(), entry("udp://a", 2)),
                    ("udp://b".to_string(), entry("udp://b", 4)),
                ]),
            ),
        );
        let next = reconcile_trackers(
            &prior,
            TrackersDiff::full(
                Cursor::new(2),
                HashMap::from([("udp://a".to_string(), entry("udp://a", 3))]),
            ),
        );

        assert_eq!(next.len(), 1);
        assert_eq!(next.get("udp://a").map(TrackerEntry::status_label), Some("updating"));
    }
}
