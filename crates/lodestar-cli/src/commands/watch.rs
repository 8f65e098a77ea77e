//! Long-running mirror of the daemon.
//!
//! Renders every published view, follows the daemon-advised refresh interval,
//! and prints task health (and optionally metrics) on exit.

use std::future;
use std::time::Duration;

use anyhow::anyhow;
use lodestar_events::{EventEnvelope, SyncEvent};
use lodestar_sync::{Availability, SubjectView};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::{MainDataView, Session};
use crate::cli::WatchArgs;
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{render_health, render_maindata, render_metrics, render_peers, render_trackers};

pub(crate) async fn handle_watch(ctx: &AppContext, args: WatchArgs) -> CliResult<()> {
    let session = Session::start(ctx, &args.targets)?;
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let result = mirror(ctx, &session, deadline).await;
    session.shutdown();

    render_health(&session.sync.registry.health(), ctx.output)?;
    if args.metrics {
        render_metrics(&session.metrics)?;
    }
    result
}

async fn mirror(ctx: &AppContext, session: &Session, deadline: Option<Instant>) -> CliResult<()> {
    let mut maindata = Some(session.maindata.subscribe());
    let mut peers = session.peers.as_ref().map(|controller| controller.subscribe());
    let mut trackers = session.trackers.as_ref().map(|controller| controller.subscribe());
    // Render whatever was published before subscribing.
    for receiver in maindata.iter_mut() {
        receiver.mark_changed();
    }
    for receiver in peers.iter_mut() {
        receiver.mark_changed();
    }
    for receiver in trackers.iter_mut() {
        receiver.mark_changed();
    }
    let mut events = session.sync.events.subscribe(None);

    loop {
        tokio::select! {
            () = until(deadline) => {
                info!("watch duration elapsed");
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            Some(view) = next_view(&mut maindata) => on_maindata(ctx, session, &view)?,
            Some(view) = next_view(&mut peers) => render_peers(&view, ctx.output)?,
            Some(view) = next_view(&mut trackers) => render_trackers(&view, ctx.output)?,
            Some(envelope) = events.next() => log_event(&envelope),
        }
    }
}

fn on_maindata(ctx: &AppContext, session: &Session, view: &MainDataView) -> CliResult<()> {
    if let Availability::Unavailable { reason } = &view.availability {
        return Err(CliError::failure(anyhow!("main data unavailable: {reason}")));
    }
    if let Some(advised) = view.snapshot.refresh_interval() {
        session.follow_interval(advised)?;
    }
    render_maindata(view, ctx.output)
}

fn log_event(envelope: &EventEnvelope) {
    match &envelope.event {
        SyncEvent::SubjectUnavailable {
            controller,
            subject,
            reason,
        } => warn!(event_id = envelope.id, %controller, %subject, %reason, "subject unavailable"),
        SyncEvent::TaskFaulted { name, message, .. } => {
            warn!(event_id = envelope.id, task = %name, %message, "sync task faulted");
        }
        event => debug!(event_id = envelope.id, kind = event.kind(), "sync event"),
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Next published view; the slot is cleared once its controller is gone.
async fn next_view<Sub: Clone, S>(
    slot: &mut Option<watch::Receiver<SubjectView<Sub, S>>>,
) -> Option<SubjectView<Sub, S>> {
    let receiver = slot.as_mut()?;
    if receiver.changed().await.is_ok() {
        return Some(receiver.borrow_and_update().clone());
    }
    *slot = None;
    None
}
