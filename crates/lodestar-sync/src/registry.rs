//! Timer registry: diagnostic view over every registered recurring task.
//!
//! # Design
//! - Explicit object handed to controllers; no process-wide state.
//! - Stores `watch` receivers, so reading health never touches a task's worker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lodestar_events::TaskState;
use lodestar_telemetry::Metrics;
use serde::Serialize;
use tokio::sync::watch;

use crate::scheduler::{RecurringTask, TaskId, TaskStatus};

/// Shared registry of recurring tasks.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    tasks: Arc<Mutex<BTreeMap<TaskId, watch::Receiver<TaskStatus>>>>,
    metrics: Option<Metrics>,
}

/// Aggregate health across registered tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryHealth {
    /// Registered tasks.
    pub total: usize,
    /// Tasks still waiting for `start`.
    pub idle: usize,
    /// Tasks ticking on their interval.
    pub running: usize,
    /// Tasks suspended by `pause`.
    pub paused: usize,
    /// Tasks retired normally.
    pub stopped: usize,
    /// Tasks that ended in a fault, with their recorded cause.
    pub faulted: Vec<TaskStatus>,
}

impl RegistryHealth {
    /// Whether no registered task has faulted.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.faulted.is_empty()
    }
}

impl TimerRegistry {
    /// Empty registry without metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry that keeps the task gauges in `metrics` current.
    #[must_use]
    pub fn with_metrics(metrics: Metrics) -> Self {
        Self {
            tasks: Arc::default(),
            metrics: Some(metrics),
        }
    }

    /// Track a task until it is unregistered.
    pub fn register(&self, task: &RecurringTask) {
        self.tasks().insert(task.id(), task.subscribe());
        self.refresh_gauges();
    }

    /// Stop tracking a task; returns whether it was registered.
    pub fn unregister(&self, id: TaskId) -> bool {
        let removed = self.tasks().remove(&id).is_some();
        if removed {
            self.refresh_gauges();
        }
        removed
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    /// Health of one task.
    #[must_use]
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks().get(&id).map(|rx| rx.borrow().clone())
    }

    /// Health of every task, ordered by name then id.
    #[must_use]
    pub fn statuses(&self) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = self
            .tasks()
            .values()
            .map(|rx| rx.borrow().clone())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        statuses
    }

    /// Aggregate health, including the cause of every fault.
    #[must_use]
    pub fn health(&self) -> RegistryHealth {
        let mut health = RegistryHealth::default();
        for status in self.statuses() {
            health.total += 1;
            match status.state {
                TaskState::Idle => health.idle += 1,
                TaskState::Running => health.running += 1,
                TaskState::Paused => health.paused += 1,
                TaskState::Stopped => health.stopped += 1,
                TaskState::Faulted => health.faulted.push(status),
            }
        }
        self.record(&health);
        health
    }

    /// Drop tasks that stopped normally; faulted tasks stay visible.
    pub fn prune_stopped(&self) -> usize {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|_, rx| rx.borrow().state != TaskState::Stopped);
        let pruned = before - tasks.len();
        drop(tasks);
        if pruned > 0 {
            self.refresh_gauges();
        }
        pruned
    }

    fn refresh_gauges(&self) {
        if self.metrics.is_some() {
            let _ = self.health();
        }
    }

    fn record(&self, health: &RegistryHealth) {
        if let Some(metrics) = &self.metrics {
            let active = health.idle + health.running + health.paused;
            metrics.set_active_tasks(i64::try_from(active).unwrap_or(i64::MAX));
            metrics.set_faulted_tasks(i64::try_from(health.faulted.len()).unwrap_or(i64::MAX));
        }
    }

    fn tasks(&self) -> MutexGuard<'_, BTreeMap<TaskId, watch::Receiver<TaskStatus>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("tasks", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickOutcome;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn health_reports_faults_with_cause() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let registry = TimerRegistry::with_metrics(metrics.clone());

        let healthy = RecurringTask::new("maindata:global", Duration::from_secs(1));
        let broken = RecurringTask::new("peers:abc", Duration::from_secs(1));
        registry.register(&healthy);
        registry.register(&broken);
        assert_eq!(metrics.snapshot().active_tasks, 2);

        healthy.start(
            || std::future::ready(Ok(TickOutcome::Continue)),
            CancellationToken::new(),
        )?;
        broken.start(
            || std::future::ready(Err::<TickOutcome, _>(anyhow::anyhow!("decode invariant broken"))),
            CancellationToken::new(),
        )?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let health = registry.health();
        assert_eq!(health.total, 2);
        assert_eq!(health.running, 1);
        assert!(!health.is_healthy());
        assert_eq!(health.faulted.len(), 1);
        assert_eq!(health.faulted[0].name, "peers:abc");
        assert!(
            health.faulted[0]
                .last_fault
                .as_ref()
                .is_some_and(|fault| fault.message.contains("decode invariant broken"))
        );
        assert_eq!(metrics.snapshot().active_tasks, 1);
        assert_eq!(metrics.snapshot().faulted_tasks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unregister_and_prune() {
        let registry = TimerRegistry::new();
        let first = RecurringTask::new("a", Duration::from_secs(1));
        let second = RecurringTask::new("b", Duration::from_secs(1));
        registry.register(&first);
        registry.register(&second);

        assert!(registry.unregister(first.id()));
        assert!(!registry.unregister(first.id()));
        assert_eq!(registry.len(), 1);

        second.stop();
        assert_eq!(registry.prune_stopped(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn statuses_are_sorted_by_name() {
        let registry = TimerRegistry::new();
        let b = RecurringTask::new("b", Duration::from_secs(1));
        let a = RecurringTask::new("a", Duration::from_secs(1));
        registry.register(&b);
        registry.register(&a);
        let names: Vec<_> = registry
            .statuses()
            .into_iter()
            .map(|status| status.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.status(a.id()).map(|s| s.state), Some(TaskState::Idle));
    }
}
