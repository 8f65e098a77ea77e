mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use lodestar_sync::entities::TorrentHash;
use lodestar_sync::entities::peers::{PeersDiff, PeersSnapshot, reconcile_peers};
use lodestar_sync::{
    Availability, Cursor, FetchError, PollLoopController, StatusPolicy, SyncContext, TaskState,
    TickOutcome,
};
use lodestar_telemetry::Metrics;
use support::{ENDPOINT, ScriptedSource, full, incremental};

type PeersController = PollLoopController<ScriptedSource, PeersSnapshot>;

const INTERVAL: Duration = Duration::from_secs(1);

fn controller(source: &ScriptedSource, ctx: &SyncContext) -> PeersController {
    PollLoopController::new("peers", source.clone(), reconcile_peers, INTERVAL, ctx)
}

fn keys(snapshot: &PeersSnapshot) -> BTreeSet<String> {
    snapshot.keys().cloned().collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn full_update_then_removal_empties_snapshot() -> Result<()> {
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    source.push("torrent-A", incremental(2, &[], &["p1"]));
    let ctx = SyncContext::new();
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    let snapshot = controller.snapshot();
    assert_eq!(
        snapshot.get("p1").and_then(|peer| peer.ip.as_deref()),
        Some("10.0.0.1")
    );
    assert_eq!(controller.cursor(), Cursor::new(1));

    tokio::time::sleep(INTERVAL).await;
    assert!(controller.snapshot().is_empty());
    assert_eq!(controller.cursor(), Cursor::new(2));
    assert_eq!(controller.availability(), Availability::Live);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_result_never_populates_new_subject() -> Result<()> {
    let metrics = Metrics::new()?;
    let ctx = SyncContext::with_metrics(metrics.clone());
    let source = ScriptedSource::default();
    source.gate("torrent-A");
    source.push("torrent-A", full(9, &[("a1", "10.0.0.1")]));
    source.push("torrent-B", full(1, &[("b1", "10.0.0.2")]));
    let controller = Arc::new(controller(&source, &ctx));

    controller.activate(TorrentHash::from("torrent-A"))?;
    controller.pause()?;
    let in_flight = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.tick().await }
    });
    source.wait_for_calls(1).await;

    controller.activate(TorrentHash::from("torrent-B"))?;
    source.release("torrent-A");
    assert_eq!(in_flight.await?, TickOutcome::Stop);
    settle().await;

    let view = controller.view();
    assert_eq!(view.subject, Some(TorrentHash::from("torrent-B")));
    assert_eq!(keys(&view.snapshot), BTreeSet::from(["b1".to_string()]));
    assert_eq!(view.cursor, Cursor::new(1));
    assert_eq!(metrics.snapshot().stale_results_discarded_total, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reactivation_abandons_scheduled_fetch() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.gate("torrent-A");
    source.push("torrent-A", full(3, &[("a1", "10.0.0.1")]));
    source.push("torrent-B", full(1, &[("b1", "10.0.0.2")]));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    source.wait_for_calls(1).await;
    controller.activate(TorrentHash::from("torrent-B"))?;
    source.release("torrent-A");
    settle().await;

    assert_eq!(keys(&controller.snapshot()), BTreeSet::from(["b1".to_string()]));
    let subjects: Vec<_> = source.calls().into_iter().map(|(subject, _)| subject).collect();
    assert_eq!(subjects, vec!["torrent-A".to_string(), "torrent-B".to_string()]);
    assert_eq!(ctx.registry.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_incremental_diff_keeps_snapshot_unchanged() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1"), ("p2", "10.0.0.2")]));
    source.push("torrent-A", Ok(PeersDiff::incremental(Cursor::new(2))));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    let before = controller.snapshot();

    tokio::time::sleep(INTERVAL).await;
    let after = controller.snapshot();
    assert_eq!(*before, *after);
    assert_eq!(controller.cursor(), Cursor::new(2));
    assert_eq!(
        controller.task_status().map(|status| status.state),
        Some(TaskState::Running)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cursor_tracks_last_applied_diff() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    source.push("torrent-A", incremental(2, &[("p2", "10.0.0.2")], &[]));
    source.push("torrent-A", Err(FetchError::Timeout { endpoint: ENDPOINT }));
    source.push("torrent-A", incremental(5, &[("p3", "10.0.0.3")], &["p1"]));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(controller.cursor(), Cursor::new(5));
    let cursors: Vec<u64> = source
        .calls()
        .into_iter()
        .map(|(_, cursor)| cursor.get())
        .collect();
    assert_eq!(cursors, vec![0, 1, 2, 2]);
    assert_eq!(
        keys(&controller.snapshot()),
        BTreeSet::from(["p2".to_string(), "p3".to_string()])
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_stops_polling_and_reports_once() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    source.push_not_found("torrent-A");
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    tokio::time::sleep(INTERVAL).await;

    assert!(matches!(
        controller.availability(),
        Availability::Unavailable { reason } if reason.contains("404")
    ));
    assert_eq!(controller.cursor(), Cursor::new(1));
    assert_eq!(controller.snapshot().len(), 1);
    assert_eq!(
        controller.task_status().map(|status| status.state),
        Some(TaskState::Stopped)
    );

    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(controller.tick().await, TickOutcome::Stop);
    assert_eq!(source.calls().len(), 2);

    let unavailable = ctx
        .events
        .backlog_since(0)
        .into_iter()
        .filter(|envelope| envelope.event.kind() == "subject_unavailable")
        .count();
    assert_eq!(unavailable, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failure_continues_with_state_untouched() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    source.push("torrent-A", Err(status_error(503)));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    controller.pause()?;
    assert_eq!(controller.tick().await, TickOutcome::Continue);
    let before = controller.view();

    assert_eq!(controller.tick().await, TickOutcome::Continue);
    let after = controller.view();
    assert_eq!(before.cursor, after.cursor);
    assert_eq!(*before.snapshot, *after.snapshot);
    assert_eq!(after.availability, Availability::Live);
    Ok(())
}

fn status_error(status: u16) -> FetchError {
    StatusPolicy::NOT_FOUND.failure_for_status(ENDPOINT, status)
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_preserve_cursor_and_snapshot() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    source.push("torrent-A", incremental(2, &[("p2", "10.0.0.2")], &[]));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    controller.pause()?;
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(source.calls().len(), 1);
    assert_eq!(controller.cursor(), Cursor::new(1));

    controller.resume()?;
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(controller.cursor(), Cursor::new(2));
    assert_eq!(controller.snapshot().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_polls_immediately() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    let controller: PeersController = PollLoopController::new(
        "peers",
        source.clone(),
        reconcile_peers,
        Duration::from_secs(60),
        &ctx,
    );

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    controller.refresh()?;
    settle().await;
    assert_eq!(source.calls().len(), 2);
    Ok(())
}

fn exploding_reconcile(_prior: &PeersSnapshot, _diff: PeersDiff) -> PeersSnapshot {
    panic!("reconcile invariant violated")
}

#[tokio::test(start_paused = true)]
async fn reconcile_panic_faults_task_and_shows_in_registry() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    let controller: PeersController =
        PollLoopController::new("peers", source.clone(), exploding_reconcile, INTERVAL, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;

    let health = ctx.registry.health();
    assert_eq!(health.total, 1);
    let fault = health
        .faulted
        .first()
        .and_then(|status| status.last_fault.clone())
        .ok_or_else(|| anyhow!("expected a faulted task"))?;
    assert!(fault.message.contains("reconcile invariant violated"));

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(source.calls().len(), 1);

    let kinds: Vec<_> = ctx
        .events
        .backlog_since(0)
        .into_iter()
        .map(|envelope| envelope.event.kind())
        .collect();
    assert!(kinds.contains(&"task_faulted"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deactivate_is_idempotent_and_keeps_last_snapshot() -> Result<()> {
    let ctx = SyncContext::new();
    let source = ScriptedSource::default();
    source.push("torrent-A", full(1, &[("p1", "10.0.0.1")]));
    let controller = controller(&source, &ctx);

    controller.activate(TorrentHash::from("torrent-A"))?;
    settle().await;
    controller.deactivate();
    controller.deactivate();

    assert!(controller.subject().is_none());
    assert!(ctx.registry.is_empty());
    assert_eq!(controller.snapshot().len(), 1);
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(source.calls().len(), 1);
    Ok(())
}
