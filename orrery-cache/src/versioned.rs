//! Versioned key/value store.
//!
//! Each entry remembers the remote authority's modify time alongside
//! the value, so the sync engine only downloads items that actually
//! changed and out-of-order writes from a slow response cannot clobber
//! a newer entry.

use crate::error::{CacheError, CacheResult};
use orrery_types::{EntityId, ModifyTime};
use std::collections::HashMap;

/// Map from entity id to (last-known modify time, value), rejecting
/// out-of-order writes.
#[derive(Debug, Clone)]
pub struct VersionedStore<V> {
    entries: HashMap<EntityId, (ModifyTime, V)>,
}

impl<V> Default for VersionedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> VersionedStore<V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Gets the stored value for an id.
    pub fn get(&self, id: EntityId) -> Option<&V> {
        self.entries.get(&id).map(|(_, v)| v)
    }

    /// Gets a mutable reference to the stored value for an id.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut V> {
        self.entries.get_mut(&id).map(|(_, v)| v)
    }

    /// The modify time stored for an id.
    pub fn timestamp_of(&self, id: EntityId) -> Option<ModifyTime> {
        self.entries.get(&id).map(|(t, _)| *t)
    }

    /// Whether the store holds an entry for this id.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Stores `value` under `id` stamped with `time`.
    ///
    /// A non-sentinel time strictly older than the stored time is
    /// rejected with [`CacheError::StaleWrite`]; equal times overwrite
    /// (re-putting an unchanged item is a no-op). The
    /// [`ModifyTime::UNCHECKED`] sentinel skips the check entirely.
    pub fn put(&mut self, id: EntityId, time: ModifyTime, value: V) -> CacheResult<()> {
        if !time.is_unchecked() {
            if let Some((stored, _)) = self.entries.get(&id) {
                if *stored > time {
                    return Err(CacheError::StaleWrite {
                        id,
                        stored: *stored,
                        attempted: time,
                    });
                }
            }
        }
        self.entries.insert(id, (time, value));
        Ok(())
    }

    /// Removes the value and its timestamp together.
    pub fn remove(&mut self, id: EntityId) -> Option<(ModifyTime, V)> {
        self.entries.remove(&id)
    }

    /// Iterates over stored ids in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries.keys().copied()
    }

    /// All stored ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(id, time, value)` in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, ModifyTime, &V)> {
        self.entries.iter().map(|(id, (t, v))| (*id, *t, v))
    }
}

impl<V: Clone> VersionedStore<V> {
    /// Snapshot of every entry as `(id, time, value)`, sorted by id.
    #[must_use]
    pub fn entries(&self) -> Vec<(EntityId, ModifyTime, V)> {
        let mut entries: Vec<(EntityId, ModifyTime, V)> = self
            .entries
            .iter()
            .map(|(id, (t, v))| (*id, *t, v.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _, _)| *id);
        entries
    }
}

impl<V> VersionedStore<V> {
    /// Rebuilds a store from snapshot entries, preserving timestamps
    /// without staleness checks.
    #[must_use]
    pub fn restore(entries: Vec<(EntityId, ModifyTime, V)>) -> Self {
        Self {
            entries: entries.into_iter().map(|(id, t, v)| (id, (t, v))).collect(),
        }
    }
}
