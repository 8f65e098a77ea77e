//! Command handlers and the controller session they share.

pub(crate) mod snapshot;
pub(crate) mod watch;

use std::time::Duration;

use lodestar_gateway::{MainDataSource, TorrentPeersSource, TorrentTrackersSource};
use lodestar_sync::entities::{
    GlobalSubject, MainDataSnapshot, PeersSnapshot, TorrentHash, TrackersSnapshot,
    reconcile_maindata, reconcile_peers, reconcile_trackers,
};
use lodestar_sync::{
    Availability, DiffSource, PollLoopController, SnapshotSummary, SubjectView, SyncContext,
};
use lodestar_telemetry::Metrics;
use tracing::info;

use crate::cli::TargetArgs;
use crate::client::{AppContext, CliError, CliResult};

pub(crate) type MainDataController = PollLoopController<MainDataSource, MainDataSnapshot>;
pub(crate) type PeersController = PollLoopController<TorrentPeersSource, PeersSnapshot>;
pub(crate) type TrackersController = PollLoopController<TorrentTrackersSource, TrackersSnapshot>;

pub(crate) type MainDataView = SubjectView<GlobalSubject, MainDataSnapshot>;
pub(crate) type PeersView = SubjectView<TorrentHash, PeersSnapshot>;
pub(crate) type TrackersView = SubjectView<TorrentHash, TrackersSnapshot>;

/// Every controller a command drives, bound to one sync context.
pub(crate) struct Session {
    pub(crate) sync: SyncContext,
    pub(crate) metrics: Metrics,
    pub(crate) maindata: MainDataController,
    pub(crate) peers: Option<PeersController>,
    pub(crate) trackers: Option<TrackersController>,
}

impl Session {
    /// Create the controllers for `targets` and activate them.
    pub(crate) fn start(ctx: &AppContext, targets: &TargetArgs) -> CliResult<Self> {
        let peers_hash = targets.peers.as_deref().map(parse_hash).transpose()?;
        let trackers_hash = targets.trackers.as_deref().map(parse_hash).transpose()?;

        let metrics = Metrics::new().map_err(CliError::failure)?;
        let sync = SyncContext::with_metrics(metrics.clone());

        let maindata = PollLoopController::new(
            "maindata",
            MainDataSource::new(ctx.client.clone()),
            reconcile_maindata,
            ctx.poll_interval,
            &sync,
        );
        maindata
            .activate(GlobalSubject)
            .map_err(CliError::failure)?;

        let peers = match peers_hash {
            Some(hash) => {
                let controller = PollLoopController::new(
                    "peers",
                    TorrentPeersSource::new(ctx.client.clone()),
                    reconcile_peers,
                    ctx.poll_interval,
                    &sync,
                );
                controller.activate(hash).map_err(CliError::failure)?;
                Some(controller)
            }
            None => None,
        };

        let trackers = match trackers_hash {
            Some(hash) => {
                let controller = PollLoopController::new(
                    "trackers",
                    TorrentTrackersSource::new(ctx.client.clone()),
                    reconcile_trackers,
                    ctx.poll_interval,
                    &sync,
                );
                controller.activate(hash).map_err(CliError::failure)?;
                Some(controller)
            }
            None => None,
        };

        info!(
            peers = peers.is_some(),
            trackers = trackers.is_some(),
            interval_ms = ctx.poll_interval.as_millis(),
            "sync session started"
        );
        Ok(Self {
            sync,
            metrics,
            maindata,
            peers,
            trackers,
        })
    }

    /// Apply a daemon-advised poll interval to every controller.
    pub(crate) fn follow_interval(&self, advised: Duration) -> CliResult<()> {
        if advised == self.maindata.interval() {
            return Ok(());
        }
        info!(interval_ms = advised.as_millis(), "following daemon refresh interval");
        self.maindata
            .set_interval(advised)
            .map_err(CliError::failure)?;
        if let Some(peers) = &self.peers {
            peers.set_interval(advised).map_err(CliError::failure)?;
        }
        if let Some(trackers) = &self.trackers {
            trackers.set_interval(advised).map_err(CliError::failure)?;
        }
        Ok(())
    }

    /// Deactivate every controller and cancel whatever is still scheduled.
    pub(crate) fn shutdown(&self) {
        self.maindata.deactivate();
        if let Some(peers) = &self.peers {
            peers.deactivate();
        }
        if let Some(trackers) = &self.trackers {
            trackers.deactivate();
        }
        self.sync.shutdown.cancel();
    }
}

/// Wait until `controller` leaves `Pending`, returning the settled view.
pub(crate) async fn settled<Src, S>(
    controller: &PollLoopController<Src, S>,
    timeout: Duration,
) -> CliResult<SubjectView<Src::Subject, S>>
where
    Src: DiffSource,
    S: Default + SnapshotSummary + Send + Sync + 'static,
{
    let mut views = controller.subscribe();
    let waited = tokio::time::timeout(
        timeout,
        views.wait_for(|view| view.availability != Availability::Pending),
    )
    .await;
    match waited {
        Ok(Ok(view)) => Ok(view.clone()),
        Ok(Err(_)) => Err(CliError::failure(anyhow::anyhow!(
            "{} controller closed before its first snapshot",
            controller.name()
        ))),
        Err(_) => Err(CliError::failure(anyhow::anyhow!(
            "daemon did not answer {} within {}s",
            controller.name(),
            timeout.as_secs()
        ))),
    }
}

/// Validate a v1 (40 hex) or v2 (64 hex) info-hash.
pub(crate) fn parse_hash(raw: &str) -> CliResult<TorrentHash> {
    let hash = raw.trim().to_ascii_lowercase();
    let valid_length = matches!(hash.len(), 40 | 64);
    if !valid_length || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CliError::validation(format!(
            "'{raw}' is not a torrent info-hash (expected 40 or 64 hex characters)"
        )));
    }
    Ok(TorrentHash::from(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_hashes_are_normalised() {
        let hash = parse_hash(" 8C4ADBF9EBE66F1D804FB6A4FB9B74966C3AB609 ");
        assert!(matches!(
            hash,
            Ok(ref value) if value.as_str() == "8c4adbf9ebe66f1d804fb6a4fb9b74966c3ab609"
        ));
    }

    #[test]
    fn malformed_hashes_are_validation_errors() {
        for raw in ["", "abc", "zz4adbf9ebe66f1d804fb6a4fb9b74966c3ab609"] {
            let err = parse_hash(raw).err();
            assert_eq!(err.map(|err| err.exit_code()), Some(2), "{raw:?}");
        }
    }
}
