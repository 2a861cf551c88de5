//! Typed row cache.
//!
//! One cache keyed by [`RowId`]. Writers put the row they just persisted,
//! deletes leave a tombstone, and reads only fill a slot when what they
//! loaded is not older than what is already cached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ids::RowId;
use crate::storage::Row;

enum Slot {
    Live(Arc<Row>),
    Gone,
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<Row>),
    /// The row was deleted.
    Gone,
    Miss,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct RowCache {
    slots: DashMap<RowId, Slot>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RowCache {
    /// A cache holding at most `capacity` rows. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, id: RowId) -> Lookup {
        let lookup = match self.slots.get(&id).as_deref() {
            Some(Slot::Live(row)) => Lookup::Hit(Arc::clone(row)),
            Some(Slot::Gone) => Lookup::Gone,
            None => Lookup::Miss,
        };
        match lookup {
            Lookup::Miss => self.misses.fetch_add(1, Ordering::Relaxed),
            _ => self.hits.fetch_add(1, Ordering::Relaxed),
        };
        lookup
    }

    /// Store a row just written by this process.
    pub fn put(&self, row: Arc<Row>) {
        if self.capacity == 0 {
            return;
        }
        self.slots.insert(row.id, Slot::Live(row));
        self.evict();
    }

    /// Store a row loaded from storage unless a newer version or a
    /// tombstone is already cached.
    pub fn fill(&self, row: Arc<Row>) {
        if self.capacity == 0 {
            return;
        }
        match self.slots.entry(row.id) {
            Entry::Occupied(mut slot) => {
                if let Slot::Live(current) = slot.get() {
                    if current.version < row.version {
                        slot.insert(Slot::Live(row));
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Live(row));
            }
        }
        self.evict();
    }

    /// Record that a row is gone.
    pub fn tombstone(&self, id: RowId) {
        if self.capacity == 0 {
            return;
        }
        self.slots.insert(id, Slot::Gone);
        self.evict();
    }

    /// Drop every slot; used when schema changes reshape cached rows.
    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn evict(&self) {
        while self.slots.len() > self.capacity {
            // Take the key first so no shard guard is held while removing.
            let victim = self.slots.iter().next().map(|slot| *slot.key());
            let Some(victim) = victim else {
                break;
            };
            self.slots.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityId, UserId};
    use crate::security::Identity;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn row(id: RowId, version: u64) -> Arc<Row> {
        Arc::new(Row {
            id,
            entity_id: EntityId::new(),
            tenant_id: None,
            folio: 1,
            created_by: Identity::User(UserId::new()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version,
            values: BTreeMap::new(),
        })
    }

    #[test]
    fn test_fill_never_replaces_newer_rows() {
        let cache = RowCache::new(10);
        let id = RowId::new();
        cache.put(row(id, 2));
        cache.fill(row(id, 1));
        match cache.get(id) {
            Lookup::Hit(r) => assert_eq!(r.version, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tombstone_blocks_stale_fill() {
        let cache = RowCache::new(10);
        let id = RowId::new();
        cache.put(row(id, 1));
        cache.tombstone(id);
        cache.fill(row(id, 1));
        assert!(matches!(cache.get(id), Lookup::Gone));
        assert!(matches!(cache.get(RowId::new()), Lookup::Miss));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_capacity_bounds_size() {
        let cache = RowCache::new(2);
        for _ in 0..5 {
            cache.put(row(RowId::new(), 1));
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = RowCache::new(0);
        cache.put(row(RowId::new(), 1));
        assert!(cache.is_empty());
    }
}
