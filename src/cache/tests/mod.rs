use std::sync::Arc;

use super::{Cache, Entry};

#[test]
fn miss_then_hit() {
    let mut cache = Cache::new(2);
    assert!(cache.get(0, 1).is_none());
    cache.put(0, 1, Entry::Value(Arc::new(7i64)));
    assert!(matches!(cache.get(0, 1), Some(Entry::Value(_))));
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
}

#[test]
fn tombstone_reports_as_present_but_deleted() {
    let mut cache = Cache::new(2);
    cache.put(0, 1, Entry::Tombstone);
    assert!(matches!(cache.get(0, 1), Some(Entry::Tombstone)));
}

#[test]
fn eviction_picks_least_recently_used() {
    let mut cache = Cache::new(2);
    cache.put(0, 1, Entry::Value(Arc::new(1i64)));
    cache.put(0, 2, Entry::Value(Arc::new(2i64)));
    // touch (0, 1) so (0, 2) becomes the LRU victim.
    cache.get(0, 1);
    cache.put(0, 3, Entry::Value(Arc::new(3i64)));

    assert!(cache.get(0, 2).is_none());
    assert!(cache.get(0, 1).is_some());
    assert!(cache.get(0, 3).is_some());
}

#[test]
fn invalidate_removes_the_slot() {
    let mut cache = Cache::new(2);
    cache.put(0, 1, Entry::Value(Arc::new(1i64)));
    cache.invalidate(0, 1);
    assert!(cache.get(0, 1).is_none());
    assert_eq!(cache.len(), 0);
}

#[test]
fn put_replaces_in_place_without_evicting() {
    let mut cache = Cache::new(1);
    cache.put(0, 1, Entry::Value(Arc::new(1i64)));
    cache.put(0, 1, Entry::Value(Arc::new(2i64)));
    assert_eq!(cache.len(), 1);
}

#[test]
fn clear_drops_everything() {
    let mut cache = Cache::new(4);
    cache.put(0, 1, Entry::Value(Arc::new(1i64)));
    cache.put(1, 2, Entry::Value(Arc::new(2i64)));
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn distinct_type_indices_do_not_collide() {
    let mut cache = Cache::new(4);
    cache.put(0, 1, Entry::Value(Arc::new(10i64)));
    cache.put(1, 1, Entry::Value(Arc::new(20i64)));
    assert_eq!(cache.len(), 2);
}
