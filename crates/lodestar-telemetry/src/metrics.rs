//! Poll-loop metrics on a private Prometheus registry.
//!
//! Each `Metrics` owns its registry, so separate sessions (and tests) never
//! collide on collector names.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across controllers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    ticks_total: IntCounterVec,
    fetch_failures_total: IntCounterVec,
    snapshots_published_total: IntCounterVec,
    stale_results_discarded_total: IntCounter,
    active_tasks: IntGauge,
    faulted_tasks: IntGauge,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Recurring tasks currently registered and not terminal.
    pub active_tasks: i64,
    /// Recurring tasks that ended in a fault.
    pub faulted_tasks: i64,
    /// Fetch results dropped because their subject changed in flight.
    pub stale_results_discarded_total: u64,
}

impl Metrics {
    /// Fresh registry with every sync collector registered at zero.
    ///
    /// # Errors
    ///
    /// Fails if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ticks_total = counter_vec(
            "sync_ticks_total",
            "Poll ticks executed by controller and outcome",
            &["controller", "outcome"],
        )?;
        let fetch_failures_total = counter_vec(
            "sync_fetch_failures_total",
            "Diff fetch failures by endpoint and failure class",
            &["endpoint", "class"],
        )?;
        let snapshots_published_total = counter_vec(
            "sync_snapshots_published_total",
            "Snapshots published to views by controller",
            &["controller"],
        )?;
        let stale_results_discarded_total = IntCounter::with_opts(Opts::new(
            "sync_stale_results_discarded_total",
            "Fetch results discarded after a subject change",
        ))
        .map_err(|source| TelemetryError::Collector {
            name: "sync_stale_results_discarded_total",
            source,
        })?;
        let active_tasks = gauge("sync_active_tasks", "Recurring tasks that are not terminal")?;
        let faulted_tasks = gauge("sync_faulted_tasks", "Recurring tasks that ended in a fault")?;

        register(&registry, "sync_ticks_total", ticks_total.clone())?;
        register(
            &registry,
            "sync_fetch_failures_total",
            fetch_failures_total.clone(),
        )?;
        register(
            &registry,
            "sync_snapshots_published_total",
            snapshots_published_total.clone(),
        )?;
        register(
            &registry,
            "sync_stale_results_discarded_total",
            stale_results_discarded_total.clone(),
        )?;
        register(&registry, "sync_active_tasks", active_tasks.clone())?;
        register(&registry, "sync_faulted_tasks", faulted_tasks.clone())?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                ticks_total,
                fetch_failures_total,
                snapshots_published_total,
                stale_results_discarded_total,
                active_tasks,
                faulted_tasks,
            }),
        })
    }

    /// Increment the tick counter for a controller and its outcome label.
    pub fn inc_tick(&self, controller: &str, outcome: &str) {
        self.inner
            .ticks_total
            .with_label_values(&[controller, outcome])
            .inc();
    }

    /// Increment the fetch failure counter for an endpoint and failure class.
    pub fn inc_fetch_failure(&self, endpoint: &str, class: &str) {
        self.inner
            .fetch_failures_total
            .with_label_values(&[endpoint, class])
            .inc();
    }

    /// Increment the published snapshot counter for a controller.
    pub fn inc_snapshot_published(&self, controller: &str) {
        self.inner
            .snapshots_published_total
            .with_label_values(&[controller])
            .inc();
    }

    /// Record a fetch result dropped because its subject was replaced.
    pub fn inc_stale_discarded(&self) {
        self.inner.stale_results_discarded_total.inc();
    }

    /// Set the active task gauge.
    pub fn set_active_tasks(&self, count: i64) {
        self.inner.active_tasks.set(count);
    }

    /// Set the faulted task gauge.
    pub fn set_faulted_tasks(&self, count: i64) {
        self.inner.faulted_tasks.set(count);
    }

    /// Current value of the tick counter for a controller and outcome.
    #[must_use]
    pub fn tick_count(&self, controller: &str, outcome: &str) -> u64 {
        self.inner
            .ticks_total
            .with_label_values(&[controller, outcome])
            .get()
    }

    /// Text exposition of every collector.
    ///
    /// # Errors
    ///
    /// Fails if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(TelemetryError::Encode)?;
        String::from_utf8(buffer).map_err(TelemetryError::Utf8)
    }

    /// Take a point-in-time snapshot of the task gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_tasks: self.inner.active_tasks.get(),
            faulted_tasks: self.inner.faulted_tasks.get(),
            stale_results_discarded_total: self.inner.stale_results_discarded_total.get(),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::Collector { name, source })
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::Collector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<()>
where
    C: prometheus::core::Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::Register { name, source })
}
