#![forbid(unsafe_code)]
//! Sync event bus for the Lodestar console.
//!
//! The bus carries the signals the sync engine raises towards views and
//! diagnostics: published snapshots, subjects that became terminally
//! unavailable, and recurring-task transitions. Ids are sequential from 1 and a
//! bounded ring of recent events can be replayed to late subscribers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Identifier assigned to each event emitted on the bus.
pub type EventId = u64;

const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Lifecycle states of a recurring task.
///
/// `Stopped` and `Faulted` are terminal: a task never leaves them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created but not yet started.
    Idle,
    /// Ticking on its interval.
    Running,
    /// Waiting without ticking; the interval phase is preserved.
    Paused,
    /// Retired on request or because the tick asked to stop.
    Stopped,
    /// Retired because the tick failed unexpectedly.
    Faulted,
}

impl TaskState {
    /// Whether the state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }

    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed events surfaced by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    SnapshotPublished {
        controller: String,
        subject: String,
        cursor: u64,
        entries: usize,
    },
    SubjectUnavailable {
        controller: String,
        subject: String,
        reason: String,
    },
    TaskStateChanged {
        task_id: Uuid,
        name: String,
        state: TaskState,
    },
    TaskFaulted {
        task_id: Uuid,
        name: String,
        message: String,
    },
}

impl SyncEvent {
    /// Machine-friendly discriminator for consumers and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SnapshotPublished { .. } => "snapshot_published",
            Self::SubjectUnavailable { .. } => "subject_unavailable",
            Self::TaskStateChanged { .. } => "task_state_changed",
            Self::TaskFaulted { .. } => "task_faulted",
        }
    }
}

/// An event stamped with its bus id and emission time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: SyncEvent,
}

/// Replay ring and id counter, guarded together so ids enter the ring in order.
#[derive(Debug)]
struct History {
    next_id: EventId,
    recent: VecDeque<EventEnvelope>,
    capacity: usize,
}

impl History {
    fn stamp(&mut self, event: SyncEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            id: self.next_id,
            timestamp: Utc::now(),
            event,
        };
        self.next_id += 1;
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(envelope.clone());
        envelope
    }

    fn after(&self, since: EventId) -> VecDeque<EventEnvelope> {
        self.recent
            .iter()
            .filter(|envelope| envelope.id > since)
            .cloned()
            .collect()
    }
}

/// Cloneable handle to one broadcast channel plus its replay ring.
///
/// The channel and the ring share one capacity; a subscriber that falls more
/// than `capacity` events behind skips ahead and counts what it missed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    history: Arc<Mutex<History>>,
}

impl EventBus {
    /// Bus holding up to `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(History {
                next_id: 1,
                recent: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Stamp and broadcast `event`, returning its id.
    pub fn publish(&self, event: SyncEvent) -> EventId {
        let mut history = self.history();
        let envelope = history.stamp(event);
        let id = envelope.id;
        // Sent under the lock so live delivery stays in id order; no receivers is fine.
        self.sender.send(envelope).ok();
        id
    }

    /// Live stream of events; with `since`, retained events newer than it come first.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        let history = self.history();
        let backlog = since.map_or_else(VecDeque::new, |since| history.after(since));
        let last_replayed = backlog.back().map_or(since.unwrap_or(0), |envelope| envelope.id);
        EventStream {
            backlog,
            receiver: self.sender.subscribe(),
            last_seen: last_replayed,
            missed: 0,
        }
    }

    /// Id of the most recent event still retained.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.history().recent.back().map(|envelope| envelope.id)
    }

    /// Retained events newer than `since`, oldest first.
    #[must_use]
    pub fn backlog_since(&self, since: EventId) -> Vec<EventEnvelope> {
        self.history().after(since).into()
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.history();
        f.debug_struct("EventBus")
            .field("capacity", &history.capacity)
            .field("next_id", &history.next_id)
            .finish_non_exhaustive()
    }
}

/// Receiving side of [`EventBus::subscribe`].
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: broadcast::Receiver<EventEnvelope>,
    last_seen: EventId,
    missed: u64,
}

impl EventStream {
    /// Next event, or `None` once every bus handle is dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            self.last_seen = envelope.id;
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                // Already delivered from the backlog.
                Ok(envelope) if envelope.id <= self.last_seen => {}
                Ok(envelope) => {
                    self.last_seen = envelope.id;
                    return Some(envelope);
                }
                Err(RecvError::Lagged(skipped)) => self.missed += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events dropped because this stream fell behind.
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_unavailable(index: usize) -> SyncEvent {
        SyncEvent::SubjectUnavailable {
            controller: "peers".to_string(),
            subject: format!("hash-{index}"),
            reason: "not found".to_string(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_unavailable(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }

        assert_eq!(received, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest_events() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            bus.publish(sample_unavailable(i));
        }

        let ids: Vec<_> = bus.backlog_since(0).into_iter().map(|env| env.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn live_subscribers_receive_new_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);

        bus.publish(SyncEvent::TaskStateChanged {
            task_id: Uuid::nil(),
            name: "maindata".to_string(),
            state: TaskState::Stopped,
        });

        let envelope = timeout(RECV_TIMEOUT, stream.next()).await.ok().flatten();
        let Some(envelope) = envelope else {
            panic!("expected a live event");
        };
        assert_eq!(envelope.event.kind(), "task_state_changed");
    }

    #[test]
    fn terminal_states_are_flagged() {
        assert!(TaskState::Stopped.is_terminal());
        assert!(TaskState::Faulted.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        assert_eq!(TaskState::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn replayed_events_are_not_delivered_twice() {
        let bus = EventBus::with_capacity(8);
        bus.publish(sample_unavailable(0));
        let mut stream = bus.subscribe(Some(0));
        bus.publish(sample_unavailable(1));

        let first = timeout(RECV_TIMEOUT, stream.next()).await.ok().flatten();
        let second = timeout(RECV_TIMEOUT, stream.next()).await.ok().flatten();
        assert_eq!(first.map(|env| env.id), Some(1));
        assert_eq!(second.map(|env| env.id), Some(2));
    }

    #[tokio::test]
    async fn lagging_subscriber_counts_missed_events() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe(None);
        for i in 0..5 {
            bus.publish(sample_unavailable(i));
        }

        let next = timeout(RECV_TIMEOUT, stream.next()).await.ok().flatten();
        assert_eq!(next.map(|env| env.id), Some(4));
        assert_eq!(stream.missed(), 3);
    }
}
