#![forbid(unsafe_code)]
#![allow(clippy::redundant_pub_crate)]

//! Incremental state synchronisation for the Lodestar console.
//!
//! Layout:
//! - `model.rs`: cursors, snapshots, diff payloads, and the merge traits
//! - `reconcile.rs`: the pure fold of one diff into one snapshot
//! - `scheduler.rs`: cancellable, pausable recurring tasks
//! - `registry.rs`: introspection over every live recurring task
//! - `source.rs`: the diff-fetch contract consumed from the daemon gateway
//! - `controller.rs`: the poll loop binding a subject, a source, and a task
//! - `entities/`: main data, torrent peers, and torrent trackers instantiations
//! - `error.rs`: fetch failure taxonomy and scheduler errors

pub mod controller;
pub mod entities;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod source;

pub use controller::{Availability, PollLoopController, ReconcileFn, SubjectView, SyncContext};
pub use error::{FailureClass, FetchError, SchedulerError, StatusPolicy};
pub use lodestar_events::TaskState;
pub use model::{Auxiliary, Cursor, DiffPayload, Patch, Snapshot, SnapshotSummary, VersionedDiff};
pub use reconcile::{reconcile, reconcile_patched, reconcile_with};
pub use registry::{RegistryHealth, TimerRegistry};
pub use scheduler::{MIN_INTERVAL, RecurringTask, TaskFault, TaskId, TaskStatus, TickOutcome};
pub use source::DiffSource;
