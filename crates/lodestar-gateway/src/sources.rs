//! `DiffSource` implementations, one per daemon endpoint.
//!
//! Each source fixes the endpoint label used in logs and metrics and the
//! status policy deciding which rejections end polling.

use async_trait::async_trait;
use lodestar_api_models::{
    HashQuery, MAINDATA_PATH, SyncMainData, SyncQuery, SyncTorrentPeers, TORRENT_PEERS_PATH,
    TORRENT_TRACKERS_PATH, TorrentTrackers,
};
use lodestar_sync::entities::{GlobalSubject, MainDataDiff, PeersDiff, TorrentHash, TrackersDiff};
use lodestar_sync::{Cursor, DiffSource, FetchError, StatusPolicy};
use tracing::trace;

use crate::client::DaemonClient;

/// Global main data; a 403 means the session was revoked.
#[derive(Debug, Clone)]
pub struct MainDataSource {
    client: DaemonClient,
}

impl MainDataSource {
    /// Endpoint label.
    pub const ENDPOINT: &'static str = "sync/maindata";
    /// Statuses that end polling.
    pub const POLICY: StatusPolicy = StatusPolicy::FORBIDDEN;

    /// Source backed by `client`.
    #[must_use]
    pub const fn new(client: DaemonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiffSource for MainDataSource {
    type Subject = GlobalSubject;
    type Diff = MainDataDiff;

    fn endpoint(&self) -> &'static str {
        Self::ENDPOINT
    }

    async fn fetch_diff(
        &self,
        _subject: &GlobalSubject,
        cursor: Cursor,
    ) -> Result<MainDataDiff, FetchError> {
        trace!(endpoint = Self::ENDPOINT, %cursor, "fetching main data");
        let body: SyncMainData = self
            .client
            .fetch_json(
                Self::ENDPOINT,
                MAINDATA_PATH,
                &SyncQuery::global(cursor),
                Self::POLICY,
            )
            .await?;
        Ok(body.into())
    }
}

/// Peers of one torrent; a 404 means the torrent is gone.
#[derive(Debug, Clone)]
pub struct TorrentPeersSource {
    client: DaemonClient,
}

impl TorrentPeersSource {
    /// Endpoint label.
    pub const ENDPOINT: &'static str = "sync/torrentPeers";
    /// Statuses that end polling.
    pub const POLICY: StatusPolicy = StatusPolicy::NOT_FOUND;

    /// Source backed by `client`.
    #[must_use]
    pub const fn new(client: DaemonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiffSource for TorrentPeersSource {
    type Subject = TorrentHash;
    type Diff = PeersDiff;

    fn endpoint(&self) -> &'static str {
        Self::ENDPOINT
    }

    async fn fetch_diff(&self, subject: &TorrentHash, cursor: Cursor) -> Result<PeersDiff, FetchError> {
        trace!(endpoint = Self::ENDPOINT, %subject, %cursor, "fetching peers");
        let body: SyncTorrentPeers = self
            .client
            .fetch_json(
                Self::ENDPOINT,
                TORRENT_PEERS_PATH,
                &SyncQuery::torrent(subject, cursor),
                Self::POLICY,
            )
            .await?;
        Ok(body.into())
    }
}

/// Trackers of one torrent.
///
/// The endpoint is unversioned: every response becomes a full update one
/// cursor past the one the controller last applied.
#[derive(Debug, Clone)]
pub struct TorrentTrackersSource {
    client: DaemonClient,
}

impl TorrentTrackersSource {
    /// Endpoint label.
    pub const ENDPOINT: &'static str = "torrents/trackers";
    /// Statuses that end polling.
    pub const POLICY: StatusPolicy = StatusPolicy::NOT_FOUND_OR_FORBIDDEN;

    /// Source backed by `client`.
    #[must_use]
    pub const fn new(client: DaemonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiffSource for TorrentTrackersSource {
    type Subject = TorrentHash;
    type Diff = TrackersDiff;

    fn endpoint(&self) -> &'static str {
        Self::ENDPOINT
    }

    async fn fetch_diff(
        &self,
        subject: &TorrentHash,
        cursor: Cursor,
    ) -> Result<TrackersDiff, FetchError> {
        trace!(endpoint = Self::ENDPOINT, %subject, "fetching trackers");
        let body: TorrentTrackers = self
            .client
            .fetch_json(
                Self::ENDPOINT,
                TORRENT_TRACKERS_PATH,
                &HashQuery::from(subject),
                Self::POLICY,
            )
            .await?;
        Ok(body.into_diff(cursor))
    }
}
