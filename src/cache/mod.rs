//! A small, bounded, linear-scan read cache keyed by `(type_index, id)`.
//!
//! Sizes are tiny by design (default 16 slots, typical deployments stay under a few
//! hundred), so a hash table buys nothing but code size and a dependency; a flat `Vec`
//! scanned linearly is the whole implementation.

#[cfg(test)]
mod tests;

use std::any::Any;
use std::sync::Arc;

/// What a cache slot remembers about the most recent write observed for a key.
pub(crate) enum Entry {
    /// The key was deleted; `get` must report not-found without falling through to the
    /// WAL or main file.
    Tombstone,
    /// The key's current value, as last written or updated.
    Value(Arc<dyn Any + Send + Sync>),
}

struct Slot {
    /// `type_index` paired with `id`; a slot with `id == 0` is empty (0 is never a valid
    /// entity id).
    key: (u8, u32),
    entry: Entry,
    access_tick: u64,
}

/// Bounded `(type_index, id) -> Entry` table with LRU eviction.
pub struct Cache {
    slots: Vec<Slot>,
    capacity: usize,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `(type_index, id)`. Bumps its recency on hit.
    pub(crate) fn get(&mut self, type_index: u8, id: u32) -> Option<&Entry> {
        let tick = self.next_tick();
        let pos = self.slots.iter().position(|s| s.key == (type_index, id));
        match pos {
            Some(i) => {
                self.slots[i].access_tick = tick;
                self.hits += 1;
                Some(&self.slots[i].entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or replace the entry for `(type_index, id)`, evicting the least-recently-used
    /// slot if the cache is full and the key is not already present.
    pub(crate) fn put(&mut self, type_index: u8, id: u32, entry: Entry) {
        let tick = self.next_tick();
        if let Some(i) = self.slots.iter().position(|s| s.key == (type_index, id)) {
            self.slots[i].entry = entry;
            self.slots[i].access_tick = tick;
            return;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                key: (type_index, id),
                entry,
                access_tick: tick,
            });
            return;
        }
        let victim = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.access_tick)
            .map(|(i, _)| i)
            .expect("cache capacity is always >= 1, so at least one slot exists");
        self.slots[victim] = Slot {
            key: (type_index, id),
            entry,
            access_tick: tick,
        };
    }

    /// Remove any cached entry for `(type_index, id)` entirely (used when a key is about
    /// to be re-inserted as an explicit tombstone rather than simply dropped).
    pub(crate) fn invalidate(&mut self, type_index: u8, id: u32) {
        self.slots.retain(|s| s.key != (type_index, id));
    }

    /// Drop every cached entry. Called after a successful checkpoint, since the WAL the
    /// cache was tracking no longer exists.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
