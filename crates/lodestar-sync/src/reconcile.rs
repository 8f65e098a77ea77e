//! State reconciler: fold one diff into one prior snapshot.
//!
//! # Design
//! - Pure functions; the prior snapshot is borrowed and never mutated.
//! - A full update rebuilds from `upserts` alone and ignores `removals`.
//! - Incremental diffs apply removals first, then upserts, so a key listed in
//!   both sets ends up present with the upserted value.
//! - Auxiliary blocks are absorbed on every diff, full or incremental.

use std::collections::hash_map::Entry;
use std::hash::Hash;

use crate::model::{Auxiliary, DiffPayload, Patch, Snapshot};

/// Reconcile with insert-or-overwrite semantics for upserts.
#[must_use]
pub fn reconcile<K, V, A>(prior: &Snapshot<K, V, A>, diff: DiffPayload<K, V, A>) -> Snapshot<K, V, A>
where
    K: Eq + Hash + Clone,
    V: Clone,
    A: Auxiliary,
{
    reconcile_with(prior, diff, |slot, incoming| *slot = incoming)
}

/// Reconcile where upserts of existing keys are field-wise patches.
#[must_use]
pub fn reconcile_patched<K, V, A>(
    prior: &Snapshot<K, V, A>,
    diff: DiffPayload<K, V, A>,
) -> Snapshot<K, V, A>
where
    K: Eq + Hash + Clone,
    V: Clone + Patch,
    A: Auxiliary,
{
    reconcile_with(prior, diff, Patch::patch)
}

/// Reconcile using `merge` to fold an upsert into an entry that already exists.
///
/// New keys are inserted as received. On a full update every upsert is taken
/// verbatim and `merge` is never called.
#[must_use]
pub fn reconcile_with<K, V, A, F>(
    prior: &Snapshot<K, V, A>,
    diff: DiffPayload<K, V, A>,
    mut merge: F,
) -> Snapshot<K, V, A>
where
    K: Eq + Hash + Clone,
    V: Clone,
    A: Auxiliary,
    F: FnMut(&mut V, V),
{
    let DiffPayload {
        full_update,
        upserts,
        removals,
        auxiliary: incoming_auxiliary,
        ..
    } = diff;

    let mut auxiliary = prior.auxiliary.clone();
    auxiliary.absorb(incoming_auxiliary);

    if full_update {
        return Snapshot {
            entries: upserts,
            auxiliary,
        };
    }

    let mut entries = prior.entries.clone();
    for key in &removals {
        entries.remove(key);
    }
    for (key, value) in upserts {
        match entries.entry(key) {
            Entry::Occupied(mut slot) => merge(slot.get_mut(), value),
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }

    Snapshot { entries, auxiliary }
}
