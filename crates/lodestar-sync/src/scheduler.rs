//! Recurring task scheduler.
//!
//! # Design
//! - One spawned tokio task per `RecurringTask`; ticks never overlap because the
//!   next wait is armed only after the current tick returns.
//! - Health is published through a `watch` channel so observers never lock.
//! - Lifecycle: `Idle -> Running <-> Paused -> {Stopped | Faulted}`; terminal
//!   states are never left.
//! - Cancellation is cooperative: a pending wait unwinds without ticking and an
//!   in-flight tick is abandoned at its next suspension point.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use lodestar_events::{EventBus, SyncEvent, TaskState};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Shortest interval a task may tick at; shorter requests are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Stable identifier for one recurring task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decision returned by each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Wait one interval and tick again.
    Continue,
    /// Retire the task.
    Stop,
}

/// Cause recorded when a tick errors or panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFault {
    /// Rendered error chain or panic payload.
    pub message: String,
    /// When the fault was observed.
    pub at: DateTime<Utc>,
}

/// Point-in-time health of a recurring task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    /// Task identifier.
    pub id: TaskId,
    /// Human-readable task name.
    pub name: String,
    /// Effective tick interval after clamping.
    pub interval: Duration,
    /// Lifecycle state.
    pub state: TaskState,
    /// Ticks that ran to completion.
    pub ticks: u64,
    /// Start of the most recent tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// When the next tick is due; `None` while paused or terminal.
    pub next_tick_at: Option<DateTime<Utc>>,
    /// Fault that ended the task, if any.
    pub last_fault: Option<TaskFault>,
}

/// Cancellable, pausable periodic execution unit.
pub struct RecurringTask {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    id: TaskId,
    name: String,
    interval: Duration,
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
    wake: Notify,
    restart_requested: AtomicBool,
    events: Option<EventBus>,
}

impl RecurringTask {
    /// Create an idle task ticking every `interval` once started.
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self::build(name.into(), interval, None)
    }

    /// Create an idle task that publishes terminal transitions to `events`.
    #[must_use]
    pub fn with_events(name: impl Into<String>, interval: Duration, events: EventBus) -> Self {
        Self::build(name.into(), interval, Some(events))
    }

    fn build(name: String, interval: Duration, events: Option<EventBus>) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let id = TaskId::generate();
        let (status, _) = watch::channel(TaskStatus {
            id,
            name: name.clone(),
            interval,
            state: TaskState::Idle,
            ticks: 0,
            last_tick_at: None,
            next_tick_at: None,
            last_fault: None,
        });
        Self {
            shared: Arc::new(Shared {
                id,
                name,
                interval,
                status,
                cancel: CancellationToken::new(),
                wake: Notify::new(),
                restart_requested: AtomicBool::new(false),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Effective interval after clamping.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.shared.status.borrow().state
    }

    /// Copy of the current health record.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.shared.status.borrow().clone()
    }

    /// Observe health changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.shared.status.subscribe()
    }

    /// Begin ticking; the first tick fires immediately.
    ///
    /// `parent` scopes the task: cancelling it stops the task as if `stop` had
    /// been called.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] outside a tokio runtime and
    /// [`SchedulerError::AlreadyStarted`] when the task already left `Idle`.
    pub fn start<F, Fut>(&self, tick: F, parent: CancellationToken) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<TickOutcome>> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut outcome = Ok(());
        self.shared.status.send_if_modified(|status| {
            if status.state == TaskState::Idle {
                status.state = TaskState::Running;
                status.next_tick_at = Some(Utc::now());
                true
            } else {
                outcome = Err(SchedulerError::AlreadyStarted {
                    state: status.state,
                });
                false
            }
        });
        outcome?;

        let shared = Arc::clone(&self.shared);
        let join = handle.spawn(run(shared, tick, parent));
        *self.worker() = Some(join);
        info!(
            task_id = %self.shared.id,
            task = %self.shared.name,
            interval_ms = u64::try_from(self.shared.interval.as_millis()).unwrap_or(u64::MAX),
            "recurring task started"
        );
        Ok(())
    }

    /// Suspend ticking; the remaining wait is kept for `resume`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTransition`] unless the task is
    /// running or already paused.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        let mut outcome = Ok(());
        let changed = self.shared.status.send_if_modified(|status| match status.state {
            TaskState::Running => {
                status.state = TaskState::Paused;
                status.next_tick_at = None;
                true
            }
            TaskState::Paused => false,
            state => {
                outcome = Err(SchedulerError::InvalidTransition {
                    operation: "pause",
                    state,
                });
                false
            }
        });
        outcome?;
        if changed {
            self.shared.wake.notify_one();
            debug!(task = %self.shared.name, "recurring task paused");
        }
        Ok(())
    }

    /// Continue ticking after `pause`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTransition`] unless the task is
    /// paused or already running.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        let mut outcome = Ok(());
        let changed = self.shared.status.send_if_modified(|status| match status.state {
            TaskState::Paused => {
                status.state = TaskState::Running;
                true
            }
            TaskState::Running => false,
            state => {
                outcome = Err(SchedulerError::InvalidTransition {
                    operation: "resume",
                    state,
                });
                false
            }
        });
        outcome?;
        if changed {
            self.shared.wake.notify_one();
            debug!(task = %self.shared.name, "recurring task resumed");
        }
        Ok(())
    }

    /// Tick immediately, then continue on the normal interval.
    ///
    /// A paused task is resumed. When a tick is in flight the extra tick runs
    /// as soon as it completes.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTransition`] unless the task is
    /// running or paused.
    pub fn restart(&self) -> Result<(), SchedulerError> {
        let mut outcome = Ok(());
        self.shared.status.send_if_modified(|status| match status.state {
            TaskState::Running => false,
            TaskState::Paused => {
                status.state = TaskState::Running;
                true
            }
            state => {
                outcome = Err(SchedulerError::InvalidTransition {
                    operation: "restart",
                    state,
                });
                false
            }
        });
        outcome?;
        self.shared.restart_requested.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Cancel pending waits and retire the task. Safe from any state.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        self.shared.finish(TaskState::Stopped, None);
    }

    /// Stop the task and wait for its worker to unwind.
    pub async fn shutdown(&self) {
        self.stop();
        let worker = self.worker().take();
        if let Some(worker) = worker
            && let Err(err) = worker.await
        {
            warn!(task = %self.shared.name, error = %err, "recurring task worker did not exit cleanly");
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for RecurringTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringTask")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn is_cancelled(&self, parent: &CancellationToken) -> bool {
        self.cancel.is_cancelled() || parent.is_cancelled()
    }

    /// Move into a terminal state unless one was already reached.
    fn finish(&self, state: TaskState, fault: Option<String>) {
        let fault = fault.map(|message| TaskFault {
            message,
            at: Utc::now(),
        });
        let recorded = fault.clone();
        let changed = self.status.send_if_modified(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = state;
            status.next_tick_at = None;
            if recorded.is_some() {
                status.last_fault = recorded;
            }
            true
        });
        if !changed {
            return;
        }

        match &fault {
            Some(fault) => error!(
                task_id = %self.id,
                task = %self.name,
                error = %fault.message,
                "recurring task faulted"
            ),
            None => info!(task_id = %self.id, task = %self.name, state = %state, "recurring task ended"),
        }

        if let Some(events) = &self.events {
            events.publish(SyncEvent::TaskStateChanged {
                task_id: self.id.as_uuid(),
                name: self.name.clone(),
                state,
            });
            if let Some(fault) = fault {
                events.publish(SyncEvent::TaskFaulted {
                    task_id: self.id.as_uuid(),
                    name: self.name.clone(),
                    message: fault.message,
                });
            }
        }
    }
}

enum Wake {
    Tick,
    Cancelled,
}

async fn run<F, Fut>(shared: Arc<Shared>, mut tick: F, parent: CancellationToken)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<TickOutcome>> + Send + 'static,
{
    let mut deadline = Instant::now();
    let mut paused_remaining: Option<Duration> = None;

    loop {
        if let Wake::Cancelled =
            wait_for_tick(&shared, &parent, &mut deadline, &mut paused_remaining).await
        {
            shared.finish(TaskState::Stopped, None);
            return;
        }

        shared.status.send_modify(|status| {
            status.last_tick_at = Some(Utc::now());
            status.next_tick_at = None;
        });

        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => None,
            () = parent.cancelled() => None,
            result = AssertUnwindSafe(async { tick().await }).catch_unwind() => Some(result),
        };

        let Some(result) = result else {
            debug!(task = %shared.name, "in-flight tick abandoned after cancellation");
            shared.finish(TaskState::Stopped, None);
            return;
        };

        shared.status.send_modify(|status| status.ticks += 1);

        match result {
            Ok(Ok(TickOutcome::Continue)) => {
                deadline = Instant::now() + shared.interval;
                let next = chrono::Duration::from_std(shared.interval)
                    .ok()
                    .map(|delta| Utc::now() + delta);
                shared.status.send_if_modified(|status| {
                    if status.state == TaskState::Running {
                        status.next_tick_at = next;
                        true
                    } else {
                        false
                    }
                });
            }
            Ok(Ok(TickOutcome::Stop)) => {
                shared.finish(TaskState::Stopped, None);
                return;
            }
            Ok(Err(err)) => {
                shared.finish(TaskState::Faulted, Some(format!("{err:#}")));
                return;
            }
            Err(panic) => {
                shared.finish(TaskState::Faulted, Some(panic_message(panic.as_ref())));
                return;
            }
        }
    }
}

async fn wait_for_tick(
    shared: &Shared,
    parent: &CancellationToken,
    deadline: &mut Instant,
    paused_remaining: &mut Option<Duration>,
) -> Wake {
    loop {
        if shared.is_cancelled(parent) {
            return Wake::Cancelled;
        }

        let state = shared.status.borrow().state;
        if state == TaskState::Running && shared.restart_requested.swap(false, Ordering::AcqRel) {
            *paused_remaining = None;
            return Wake::Tick;
        }

        match state {
            TaskState::Paused => {
                if paused_remaining.is_none() {
                    *paused_remaining = Some(deadline.saturating_duration_since(Instant::now()));
                }
                tokio::select! {
                    () = shared.cancel.cancelled() => return Wake::Cancelled,
                    () = parent.cancelled() => return Wake::Cancelled,
                    () = shared.wake.notified() => {}
                }
            }
            TaskState::Running => {
                if let Some(remaining) = paused_remaining.take() {
                    *deadline = Instant::now() + remaining;
                    let next = chrono::Duration::from_std(remaining)
                        .ok()
                        .map(|delta| Utc::now() + delta);
                    shared.status.send_modify(|status| status.next_tick_at = next);
                }
                tokio::select! {
                    biased;
                    () = shared.cancel.cancelled() => return Wake::Cancelled,
                    () = parent.cancelled() => return Wake::Cancelled,
                    () = shared.wake.notified() => {}
                    () = tokio::time::sleep_until(*deadline) => return Wake::Tick,
                }
            }
            TaskState::Idle | TaskState::Stopped | TaskState::Faulted => return Wake::Cancelled,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "tick panicked".to_string(),
            |message| format!("tick panicked: {message}"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_tick(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<anyhow::Result<TickOutcome>> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(TickOutcome::Continue))
        }
    }

    async fn wait_for_state(task: &RecurringTask, state: TaskState) -> anyhow::Result<TaskStatus> {
        let mut rx = task.subscribe();
        let status = rx.wait_for(|status| status.state == state).await?.clone();
        Ok(status)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_then_fixed_delay() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = RecurringTask::new("ticker", Duration::from_secs(1));
        task.start(counting_tick(&counter), CancellationToken::new())?;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(task.status().ticks, 4);
        task.shutdown().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn interval_is_clamped_to_minimum() {
        let task = RecurringTask::new("fast", Duration::from_millis(10));
        assert_eq!(task.interval(), MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_outcome_retires_task() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&counter);
        let task = RecurringTask::new("once", Duration::from_secs(1));
        task.start(
            move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok(TickOutcome::Stop))
            },
            CancellationToken::new(),
        )?;

        wait_for_state(&task, TaskState::Stopped).await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(task.status().last_fault.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn tick_error_faults_without_retry() -> anyhow::Result<()> {
        let bus = EventBus::with_capacity(8);
        let task = RecurringTask::with_events("broken", Duration::from_secs(1), bus.clone());
        task.start(
            || async { Err::<TickOutcome, _>(anyhow::anyhow!("reconcile exploded")) },
            CancellationToken::new(),
        )?;

        let status = wait_for_state(&task, TaskState::Faulted).await?;
        let fault = status.last_fault.ok_or_else(|| anyhow::anyhow!("fault missing"))?;
        assert!(fault.message.contains("reconcile exploded"));

        let kinds: Vec<_> = bus
            .backlog_since(0)
            .into_iter()
            .map(|envelope| envelope.event.kind())
            .collect();
        assert_eq!(kinds, vec!["task_state_changed", "task_faulted"]);

        task.stop();
        assert_eq!(task.state(), TaskState::Faulted);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn tick_panic_is_recorded_as_fault() -> anyhow::Result<()> {
        let task = RecurringTask::new("panicky", Duration::from_secs(1));
        task.start(
            || -> std::future::Ready<anyhow::Result<TickOutcome>> { panic!("boom") },
            CancellationToken::new(),
        )?;

        let status = wait_for_state(&task, TaskState::Faulted).await?;
        let message = status.last_fault.map(|fault| fault.message).unwrap_or_default();
        assert_eq!(message, "tick panicked: boom");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_ticks_until_resume() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = RecurringTask::new("pausable", Duration::from_secs(1));
        task.start(counting_tick(&counter), CancellationToken::new())?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        task.pause()?;
        task.pause()?;
        assert_eq!(task.state(), TaskState::Paused);
        assert!(task.status().next_tick_at.is_none());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        task.resume()?;
        task.resume()?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn restart_ticks_immediately() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = RecurringTask::new("restartable", Duration::from_secs(60));
        task.start(counting_tick(&counter), CancellationToken::new())?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        task.restart()?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        task.pause()?;
        task.restart()?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(task.state(), TaskState::Running);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_terminal() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = RecurringTask::new("stoppable", Duration::from_secs(1));
        task.stop();
        task.stop();
        assert_eq!(task.state(), TaskState::Stopped);

        assert_eq!(
            task.start(counting_tick(&counter), CancellationToken::new()),
            Err(SchedulerError::AlreadyStarted {
                state: TaskState::Stopped
            })
        );
        assert!(matches!(
            task.resume(),
            Err(SchedulerError::InvalidTransition {
                operation: "resume",
                ..
            })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_pending_wait() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let parent = CancellationToken::new();
        let task = RecurringTask::new("scoped", Duration::from_secs(1));
        task.start(counting_tick(&counter), parent.clone())?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        parent.cancel();
        wait_for_state(&task, TaskState::Stopped).await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_in_flight_tick() -> anyhow::Result<()> {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let task = RecurringTask::new("slow", Duration::from_secs(1));
        task.start(
            move || {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(TickOutcome::Continue)
                }
            },
            CancellationToken::new(),
        )?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(task.status().ticks, 0);
        Ok(())
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let task = RecurringTask::new("orphan", Duration::from_secs(1));
        let result = task.start(
            || std::future::ready(Ok(TickOutcome::Continue)),
            CancellationToken::new(),
        );
        assert_eq!(result, Err(SchedulerError::NoRuntime));
        assert_eq!(task.state(), TaskState::Idle);
    }
}
