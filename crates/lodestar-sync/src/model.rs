//! Cursors, snapshots, and diff payloads.
//!
//! # Design
//! - Pure data carriers; the merge algorithm lives in `reconcile.rs`.
//! - `Snapshot` is immutable from the outside so consumers can only read it.
//! - Auxiliary blocks and partial entries merge through small traits so each
//!   entity decides what "sticky until overridden" means for its fields.

use std::collections::hash_map;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Last server-observed version for a subject/collection pair.
///
/// Sent back to the daemon as `rid`; zero requests a full update.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    /// Value used before the first successful fetch for a subject.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw server version.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw server version.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether no diff has been applied yet.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// Successor version, saturating at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Side-band data carried next to a collection (server status, display flags).
///
/// `absorb` must keep any prior value the incoming block leaves unset.
pub trait Auxiliary: Clone + Default {
    /// Fold an incoming block into the retained one.
    fn absorb(&mut self, incoming: Self);
}

impl Auxiliary for () {
    fn absorb(&mut self, _incoming: Self) {}
}

impl<T> Auxiliary for Option<T>
where
    T: Patch + Clone,
{
    fn absorb(&mut self, incoming: Self) {
        let Some(incoming) = incoming else {
            return;
        };
        match self {
            Some(current) => current.patch(incoming),
            None => *self = Some(incoming),
        }
    }
}

/// Field-wise merge for entries the daemon sends partially.
pub trait Patch {
    /// Overwrite every field `incoming` carries, keep the rest.
    fn patch(&mut self, incoming: Self);
}

/// Overwrite `slot` only when `incoming` holds a value.
pub(crate) fn patch_field<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// Summary accessors used for logging and published events.
pub trait SnapshotSummary {
    /// Number of primary entries mirrored by the snapshot.
    fn entry_count(&self) -> usize;
}

/// Client-side mirror of one remote collection.
#[derive(Debug, Clone)]
pub struct Snapshot<K, V, A = ()> {
    pub(crate) entries: HashMap<K, V>,
    pub(crate) auxiliary: A,
}

// Map equality needs `K: Eq + Hash`, which a derive would not require.
impl<K, V, A> PartialEq for Snapshot<K, V, A>
where
    K: Eq + Hash,
    V: PartialEq,
    A: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.auxiliary == other.auxiliary
    }
}

impl<K, V, A> Snapshot<K, V, A>
where
    K: Eq + Hash,
    A: Default,
{
    /// Empty snapshot with default auxiliary data.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            auxiliary: A::default(),
        }
    }

    /// Snapshot built from entries and an auxiliary block.
    #[must_use]
    pub const fn from_parts(entries: HashMap<K, V>, auxiliary: A) -> Self {
        Self { entries, auxiliary }
    }

    /// Look up one entry.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    /// Whether the key is mirrored.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Iterate keys in arbitrary order.
    pub fn keys(&self) -> hash_map::Keys<'_, K, V> {
        self.entries.keys()
    }

    /// Retained auxiliary block.
    #[must_use]
    pub const fn auxiliary(&self) -> &A {
        &self.auxiliary
    }

    /// Borrow the underlying entry map.
    #[must_use]
    pub const fn entries(&self) -> &HashMap<K, V> {
        &self.entries
    }

    /// Split into entries and auxiliary block.
    #[must_use]
    pub fn into_parts(self) -> (HashMap<K, V>, A) {
        (self.entries, self.auxiliary)
    }
}

impl<K, V, A> Default for Snapshot<K, V, A>
where
    K: Eq + Hash,
    A: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A> FromIterator<(K, V)> for Snapshot<K, V, A>
where
    K: Eq + Hash,
    A: Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_parts(iter.into_iter().collect(), A::default())
    }
}

impl<K, V, A> SnapshotSummary for Snapshot<K, V, A> {
    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// One poll response describing changes since a cursor.
#[derive(Debug, Clone)]
pub struct DiffPayload<K, V, A = ()> {
    /// Version the snapshot reaches once this diff is applied.
    pub cursor: Cursor,
    /// Discard the prior snapshot and rebuild from `upserts` alone.
    pub full_update: bool,
    /// Entries to insert or overwrite.
    pub upserts: HashMap<K, V>,
    /// Keys to delete; absent keys are ignored.
    pub removals: HashSet<K>,
    /// Side-band block; unset parts keep their prior value.
    pub auxiliary: A,
}

impl<K, V, A> PartialEq for DiffPayload<K, V, A>
where
    K: Eq + Hash,
    V: PartialEq,
    A: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.cursor == other.cursor
            && self.full_update == other.full_update
            && self.upserts == other.upserts
            && self.removals == other.removals
            && self.auxiliary == other.auxiliary
    }
}

impl<K, V, A> DiffPayload<K, V, A>
where
    K: Eq + Hash,
    A: Default,
{
    /// Full update carrying the complete collection.
    #[must_use]
    pub fn full(cursor: Cursor, upserts: HashMap<K, V>) -> Self {
        Self {
            cursor,
            full_update: true,
            upserts,
            removals: HashSet::new(),
            auxiliary: A::default(),
        }
    }

    /// Incremental diff with no changes yet.
    #[must_use]
    pub fn incremental(cursor: Cursor) -> Self {
        Self {
            cursor,
            full_update: false,
            upserts: HashMap::new(),
            removals: HashSet::new(),
            auxiliary: A::default(),
        }
    }

    /// Add one upsert.
    #[must_use]
    pub fn with_upsert(mut self, key: K, value: V) -> Self {
        self.upserts.insert(key, value);
        self
    }

    /// Add one removal.
    #[must_use]
    pub fn with_removal(mut self, key: K) -> Self {
        self.removals.insert(key);
        self
    }

    /// Replace the auxiliary block.
    #[must_use]
    pub fn with_auxiliary(mut self, auxiliary: A) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    /// Whether the diff changes no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.full_update && self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Diffs that carry a server version and a full-update marker.
pub trait VersionedDiff {
    /// Version the snapshot reaches once the diff is applied.
    fn cursor(&self) -> Cursor;
    /// Whether the diff replaces the prior snapshot.
    fn is_full_update(&self) -> bool;
}

impl<K, V, A> VersionedDiff for DiffPayload<K, V, A> {
    fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn is_full_update(&self) -> bool {
        self.full_update
    }
}
