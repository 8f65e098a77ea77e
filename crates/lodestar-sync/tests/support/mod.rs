//! Scripted diff source shared by the poll loop integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lodestar_sync::entities::TorrentHash;
use lodestar_sync::entities::peers::{PeerEntry, PeersDiff};
use lodestar_sync::{Cursor, DiffSource, FetchError, StatusPolicy};
use tokio::sync::Semaphore;

pub const ENDPOINT: &str = "sync/torrentPeers";

type Reply = Result<PeersDiff, FetchError>;

/// Replays queued replies per subject; optionally holds fetches at a gate.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Script>,
}

#[derive(Default)]
struct Script {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<(String, Cursor)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedSource {
    pub fn push(&self, subject: &str, reply: Reply) {
        lock(&self.script.replies)
            .entry(subject.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_not_found(&self, subject: &str) {
        self.push(
            subject,
            Err(StatusPolicy::NOT_FOUND.failure_for_status(ENDPOINT, 404)),
        );
    }

    /// Hold fetches for `subject` until `release` is called.
    pub fn gate(&self, subject: &str) {
        lock(&self.script.gates).insert(subject.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, subject: &str) {
        if let Some(gate) = lock(&self.script.gates).get(subject) {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<(String, Cursor)> {
        lock(&self.script.calls).clone()
    }

    /// Yield until at least `count` fetches have started.
    pub async fn wait_for_calls(&self, count: usize) {
        while lock(&self.script.calls).len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl DiffSource for ScriptedSource {
    type Subject = TorrentHash;
    type Diff = PeersDiff;

    fn endpoint(&self) -> &'static str {
        ENDPOINT
    }

    async fn fetch_diff(&self, subject: &TorrentHash, cursor: Cursor) -> Result<PeersDiff, FetchError> {
        lock(&self.script.calls).push((subject.to_string(), cursor));

        let gate = lock(&self.script.gates).get(subject.as_str()).cloned();
        if let Some(gate) = gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        lock(&self.script.replies)
            .get_mut(subject.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(PeersDiff::incremental(cursor)))
    }
}

pub fn peer(ip: &str) -> PeerEntry {
    PeerEntry {
        ip: Some(ip.to_string()),
        ..PeerEntry::default()
    }
}

pub fn full(cursor: u64, peers: &[(&str, &str)]) -> Reply {
    Ok(PeersDiff::full(
        Cursor::new(cursor),
        peers
            .iter()
            .map(|(key, ip)| ((*key).to_string(), peer(ip)))
            .collect(),
    ))
}

pub fn incremental(cursor: u64, upserts: &[(&str, &str)], removals: &[&str]) -> Reply {
    let mut diff = PeersDiff::incremental(Cursor::new(cursor));
    for (key, ip) in upserts {
        diff = diff.with_upsert((*key).to_string(), peer(ip));
    }
    for key in removals {
        diff = diff.with_removal((*key).to_string());
    }
    Ok(diff)
}
