//! Poll loop controller: one subject, one diff source, one recurring task.
//!
//! # Design
//! - Generic over the source and snapshot type; each entity only supplies a
//!   `DiffSource` and a reconcile function.
//! - A generation counter tags every activation. Results whose generation no
//!   longer matches are discarded on arrival, so a stale subject can never
//!   populate a newer one.
//! - Ticks serialise on an async mutex, keeping at most one fetch in flight and
//!   applying diffs strictly in cursor order.
//! - Snapshots are published as `Arc<S>` through a `watch` channel; the
//!   controller is the only writer.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lodestar_events::{EventBus, SyncEvent};
use lodestar_telemetry::Metrics;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FailureClass, FetchError, SchedulerError};
use crate::model::{Cursor, SnapshotSummary, VersionedDiff};
use crate::registry::TimerRegistry;
use crate::scheduler::{MIN_INTERVAL, RecurringTask, TaskStatus, TickOutcome};
use crate::source::DiffSource;

/// Reconcile function binding a diff type to a snapshot type.
pub type ReconcileFn<S, D> = fn(&S, D) -> S;

/// Whether the bound subject is being mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    /// Activated; no diff applied yet.
    Pending,
    /// At least one diff applied.
    Live,
    /// The daemon reported the subject gone or forbidden; polling stopped.
    Unavailable {
        /// Rendered cause, reported once.
        reason: String,
    },
}

/// Read-only view published to consumers after every change.
#[derive(Debug)]
pub struct SubjectView<Sub, S> {
    /// Bound subject, `None` before activation or after deactivation.
    pub subject: Option<Sub>,
    /// Cursor of the last applied diff.
    pub cursor: Cursor,
    /// Last reconciled snapshot.
    pub snapshot: Arc<S>,
    /// Mirroring state of the subject.
    pub availability: Availability,
}

impl<Sub: Clone, S> Clone for SubjectView<Sub, S> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject.clone(),
            cursor: self.cursor,
            snapshot: Arc::clone(&self.snapshot),
            availability: self.availability.clone(),
        }
    }
}

/// Collaborators shared by every controller of one console session.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    /// Registry every recurring task is registered with.
    pub registry: TimerRegistry,
    /// Bus receiving snapshot, availability, and task health events.
    pub events: EventBus,
    /// Optional Prometheus metrics.
    pub metrics: Option<Metrics>,
    /// Root cancellation scope; cancelling it stops every controller.
    pub shutdown: CancellationToken,
}

impl SyncContext {
    /// Context without metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose registry and controllers record into `metrics`.
    #[must_use]
    pub fn with_metrics(metrics: Metrics) -> Self {
        Self {
            registry: TimerRegistry::with_metrics(metrics.clone()),
            events: EventBus::new(),
            metrics: Some(metrics),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Generic poll loop bound to one [`DiffSource`].
pub struct PollLoopController<Src: DiffSource, S> {
    inner: Arc<Inner<Src, S>>,
    slot: Mutex<Slot>,
}

struct Slot {
    interval: Duration,
    armed: Option<Armed>,
}

struct Armed {
    task: RecurringTask,
    activation: CancellationToken,
}

struct Inner<Src: DiffSource, S> {
    name: String,
    source: Src,
    reconcile: ReconcileFn<S, Src::Diff>,
    ctx: SyncContext,
    binding: Mutex<Binding<Src::Subject, S>>,
    in_flight: tokio::sync::Mutex<()>,
    view: watch::Sender<SubjectView<Src::Subject, S>>,
}

struct Binding<Sub, S> {
    subject: Option<Sub>,
    generation: u64,
    cursor: Cursor,
    snapshot: Arc<S>,
    availability: Availability,
}

impl<Sub: Clone, S> Binding<Sub, S> {
    fn view(&self) -> SubjectView<Sub, S> {
        SubjectView {
            subject: self.subject.clone(),
            cursor: self.cursor,
            snapshot: Arc::clone(&self.snapshot),
            availability: self.availability.clone(),
        }
    }
}

impl<Src, S> PollLoopController<Src, S>
where
    Src: DiffSource,
    S: Default + SnapshotSummary + Send + Sync + 'static,
{
    /// Inactive controller; nothing is fetched until [`Self::activate`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source: Src,
        reconcile: ReconcileFn<S, Src::Diff>,
        interval: Duration,
        ctx: &SyncContext,
    ) -> Self {
        let binding = Binding {
            subject: None,
            generation: 0,
            cursor: Cursor::INITIAL,
            snapshot: Arc::new(S::default()),
            availability: Availability::Pending,
        };
        let (view, _) = watch::channel(binding.view());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                source,
                reconcile,
                ctx: ctx.clone(),
                binding: Mutex::new(binding),
                in_flight: tokio::sync::Mutex::new(()),
                view,
            }),
            slot: Mutex::new(Slot {
                interval: interval.max(MIN_INTERVAL),
                armed: None,
            }),
        }
    }

    /// Bind `subject`, reset cursor and snapshot, and (re)start polling.
    ///
    /// Results still in flight for a previous subject are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] when called outside a tokio
    /// runtime.
    pub fn activate(&self, subject: Src::Subject) -> Result<(), SchedulerError> {
        self.retire();
        let generation = {
            let mut binding = self.inner.binding();
            binding.generation += 1;
            binding.subject = Some(subject.clone());
            binding.cursor = Cursor::INITIAL;
            binding.snapshot = Arc::new(S::default());
            binding.availability = Availability::Pending;
            self.inner.view.send_replace(binding.view());
            binding.generation
        };
        info!(controller = %self.inner.name, subject = %subject, "controller activated");
        self.arm(generation, &subject)
    }

    /// Run one fetch-reconcile-publish cycle for the bound subject now.
    ///
    /// Waits for any tick already in flight, so fetches never overlap.
    pub async fn tick(&self) -> TickOutcome {
        let generation = self.inner.binding().generation;
        self.inner.tick(generation).await
    }

    /// Change the poll interval, keeping subject, cursor, and snapshot.
    ///
    /// A live task is re-armed with the new interval; a paused one stays
    /// paused.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] when a task must be re-armed
    /// outside a tokio runtime.
    pub fn set_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        let interval = interval.max(MIN_INTERVAL);
        let rearm = {
            let mut slot = self.slot();
            if slot.interval == interval {
                return Ok(());
            }
            slot.interval = interval;
            slot.armed
                .as_ref()
                .map(|armed| armed.task.state())
                .filter(|state| !state.is_terminal())
        };
        let Some(previous) = rearm else {
            return Ok(());
        };

        let (generation, subject) = {
            let binding = self.inner.binding();
            match &binding.subject {
                Some(subject) => (binding.generation, subject.clone()),
                None => return Ok(()),
            }
        };
        self.retire();
        self.arm(generation, &subject)?;
        if previous == lodestar_events::TaskState::Paused {
            self.pause()?;
        }
        debug!(
            controller = %self.inner.name,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "poll interval changed"
        );
        Ok(())
    }

    fn arm(&self, generation: u64, subject: &Src::Subject) -> Result<(), SchedulerError> {
        let interval = self.slot().interval;
        let task = RecurringTask::with_events(
            format!("{}:{subject}", self.inner.name),
            interval,
            self.inner.ctx.events.clone(),
        );
        let activation = self.inner.ctx.shutdown.child_token();
        let inner = Arc::clone(&self.inner);
        task.start(
            move || {
                let inner = Arc::clone(&inner);
                async move { Ok::<_, anyhow::Error>(inner.tick(generation).await) }
            },
            activation.clone(),
        )?;
        self.inner.ctx.registry.register(&task);
        self.slot().armed = Some(Armed { task, activation });
        Ok(())
    }
}

impl<Src: DiffSource, S> PollLoopController<Src, S> {
    /// Stop polling and release the cancellation scope. Idempotent.
    ///
    /// The last snapshot stays readable; results still in flight are discarded.
    pub fn deactivate(&self) {
        let retired = self.retire();
        let mut binding = self.inner.binding();
        if binding.subject.is_none() && !retired {
            return;
        }
        binding.generation += 1;
        let subject = binding.subject.take();
        self.inner.view.send_replace(binding.view());
        drop(binding);
        if let Some(subject) = subject {
            info!(controller = %self.inner.name, subject = %subject, "controller deactivated");
        }
    }

    /// Suspend polling; cursor and snapshot are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Inactive`] without a bound task, or the
    /// task's transition error.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.with_task(RecurringTask::pause)
    }

    /// Continue polling after [`Self::pause`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Inactive`] without a bound task, or the
    /// task's transition error.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.with_task(RecurringTask::resume)
    }

    /// Poll immediately, then continue on the normal interval.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Inactive`] without a bound task, or the
    /// task's transition error.
    pub fn refresh(&self) -> Result<(), SchedulerError> {
        self.with_task(RecurringTask::restart)
    }

    /// Controller name used in task names, logs, and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.slot().interval
    }

    /// Bound subject.
    #[must_use]
    pub fn subject(&self) -> Option<Src::Subject> {
        self.inner.binding().subject.clone()
    }

    /// Cursor of the last applied diff.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.inner.binding().cursor
    }

    /// Last reconciled snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.inner.binding().snapshot)
    }

    /// Mirroring state of the bound subject.
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.inner.binding().availability.clone()
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> SubjectView<Src::Subject, S> {
        self.inner.view.borrow().clone()
    }

    /// Observe every published view.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SubjectView<Src::Subject, S>> {
        self.inner.view.subscribe()
    }

    /// Health of the bound recurring task.
    #[must_use]
    pub fn task_status(&self) -> Option<TaskStatus> {
        self.slot().armed.as_ref().map(|armed| armed.task.status())
    }

    fn with_task(
        &self,
        op: impl FnOnce(&RecurringTask) -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError> {
        let slot = self.slot();
        let armed = slot.armed.as_ref().ok_or(SchedulerError::Inactive)?;
        op(&armed.task)
    }

    fn retire(&self) -> bool {
        let armed = self.slot().armed.take();
        let Some(Armed { task, activation }) = armed else {
            return false;
        };
        activation.cancel();
        task.stop();
        self.inner.ctx.registry.unregister(task.id());
        true
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Src: DiffSource, S> Drop for PollLoopController<Src, S> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl<Src: DiffSource, S> fmt::Debug for PollLoopController<Src, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.inner.binding();
        f.debug_struct("PollLoopController")
            .field("name", &self.inner.name)
            .field("subject", &binding.subject)
            .field("cursor", &binding.cursor)
            .field("availability", &binding.availability)
            .finish_non_exhaustive()
    }
}

impl<Src: DiffSource, S> Inner<Src, S> {
    fn binding(&self) -> MutexGuard<'_, Binding<Src::Subject, S>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_tick(&self, outcome: &str) {
        if let Some(metrics) = &self.ctx.metrics {
            metrics.inc_tick(&self.name, outcome);
        }
    }

    fn discard_stale(&self, subject: &Src::Subject) -> TickOutcome {
        debug!(
            controller = %self.name,
            subject = %subject,
            "discarding result for a subject that is no longer bound"
        );
        if let Some(metrics) = &self.ctx.metrics {
            metrics.inc_stale_discarded();
        }
        self.record_tick("stale");
        TickOutcome::Stop
    }
}

impl<Src, S> Inner<Src, S>
where
    Src: DiffSource,
    S: SnapshotSummary + Send + Sync + 'static,
{
    async fn tick(&self, generation: u64) -> TickOutcome {
        let _in_flight = self.in_flight.lock().await;

        let (subject, cursor) = {
            let binding = self.binding();
            if binding.generation != generation {
                return TickOutcome::Stop;
            }
            match (&binding.subject, &binding.availability) {
                (Some(_), Availability::Unavailable { .. }) | (None, _) => {
                    return TickOutcome::Stop;
                }
                (Some(subject), _) => (subject.clone(), binding.cursor),
            }
        };

        match self.source.fetch_diff(&subject, cursor).await {
            Ok(diff) => self.apply(generation, &subject, diff),
            Err(err) => self.fail(generation, &subject, &err),
        }
    }

    fn apply(&self, generation: u64, subject: &Src::Subject, diff: Src::Diff) -> TickOutcome {
        let diff_cursor = diff.cursor();
        let full_update = diff.is_full_update();

        let mut binding = self.binding();
        if binding.generation != generation {
            drop(binding);
            return self.discard_stale(subject);
        }
        let next = (self.reconcile)(&binding.snapshot, diff);
        let entries = next.entry_count();
        binding.snapshot = Arc::new(next);
        binding.cursor = binding.cursor.max(diff_cursor);
        binding.availability = Availability::Live;
        let cursor = binding.cursor;
        self.view.send_replace(binding.view());
        drop(binding);

        debug!(
            controller = %self.name,
            subject = %subject,
            cursor = cursor.get(),
            full_update,
            entries,
            "snapshot published"
        );
        if let Some(metrics) = &self.ctx.metrics {
            metrics.inc_snapshot_published(&self.name);
        }
        self.record_tick("applied");
        self.ctx.events.publish(SyncEvent::SnapshotPublished {
            controller: self.name.clone(),
            subject: subject.to_string(),
            cursor: cursor.get(),
            entries,
        });
        TickOutcome::Continue
    }

    fn fail(&self, generation: u64, subject: &Src::Subject, err: &FetchError) -> TickOutcome {
        let class = err.class();
        if let Some(metrics) = &self.ctx.metrics {
            metrics.inc_fetch_failure(err.endpoint(), class.as_str());
        }

        let mut binding = self.binding();
        if binding.generation != generation {
            drop(binding);
            return self.discard_stale(subject);
        }

        match class {
            FailureClass::Transient => {
                drop(binding);
                warn!(
                    controller = %self.name,
                    subject = %subject,
                    endpoint = err.endpoint(),
                    error = %err,
                    "diff fetch failed; retrying on next tick"
                );
                self.record_tick("transient");
                TickOutcome::Continue
            }
            FailureClass::Permanent => {
                if matches!(binding.availability, Availability::Unavailable { .. }) {
                    return TickOutcome::Stop;
                }
                let reason = err.status().map_or_else(
                    || format!("{err} ({})", err.endpoint()),
                    |status| format!("{err} ({} answered {status})", err.endpoint()),
                );
                binding.availability = Availability::Unavailable {
                    reason: reason.clone(),
                };
                self.view.send_replace(binding.view());
                drop(binding);

                warn!(
                    controller = %self.name,
                    subject = %subject,
                    endpoint = err.endpoint(),
                    reason = %reason,
                    "subject unavailable; polling stopped"
                );
                self.record_tick("unavailable");
                self.ctx.events.publish(SyncEvent::SubjectUnavailable {
                    controller: self.name.clone(),
                    subject: subject.to_string(),
                    reason,
                });
                TickOutcome::Stop
            }
        }
    }
}
