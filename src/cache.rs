//! Lazily-built GPU records keyed by entity identity.
//!
//! The renderer keeps one [`ResourceCache`] per entity type (nodes, cameras,
//! materials, textures, meshes). Keys are identities, never values: a
//! [`hecs::Entity`] (generation-checked, so a despawned-and-reused slot is a
//! different key) or one of the typed asset ids from [`crate::scene`].
//!
//! Records are never evicted. The cache is bounded by scene size, not by the
//! number of frames rendered, and is dropped together with the renderer.

use std::collections::HashMap;
use std::hash::Hash;

pub struct ResourceCache<K, R> {
    records: HashMap<K, R>,
    builds: usize,
}

impl<K: Copy + Eq + Hash, R> ResourceCache<K, R> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            builds: 0,
        }
    }

    /// Returns the record for `key`, invoking `builder` only if none exists yet.
    ///
    /// `builder` must not reach back into this cache.
    pub fn get_or_create<F>(&mut self, key: K, builder: F) -> &mut R
    where
        F: FnOnce() -> R,
    {
        let builds = &mut self.builds;
        self.records.entry(key).or_insert_with(|| {
            *builds += 1;
            builder()
        })
    }

    /// Like [`get_or_create`](Self::get_or_create), but also rebuilds an
    /// existing record for which `is_current` returns `false` (for example a
    /// node whose kind changed since its record was built).
    pub fn get_or_rebuild<P, F>(&mut self, key: K, is_current: P, builder: F) -> &mut R
    where
        P: FnOnce(&R) -> bool,
        F: FnOnce() -> R,
    {
        let stale = self.records.get(&key).is_some_and(|r| !is_current(r));
        if stale {
            self.records.remove(&key);
        }
        self.get_or_create(key, builder)
    }

    pub fn get(&self, key: &K) -> Option<&R> {
        self.records.get(key)
    }

    /// Drops every record. The build counter keeps counting.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Visits every record, e.g. to drop bind groups that reference recreated targets.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut R)) {
        for record in self.records.values_mut() {
            f(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of builder invocations over the cache's lifetime.
    pub fn builds(&self) -> usize {
        self.builds
    }
}

impl<K: Copy + Eq + Hash, R> Default for ResourceCache<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum Record {
        Unlit(u32),
        Volume(u32),
    }

    #[test]
    fn second_lookup_returns_the_same_record_without_rebuilding() {
        let mut cache: ResourceCache<hecs::Entity, Record> = ResourceCache::new();
        let mut world = hecs::World::new();
        let node = world.spawn(());
        let calls = Cell::new(0);

        let first = cache.get_or_create(node, || {
            calls.set(calls.get() + 1);
            Record::Unlit(7)
        }) as *const Record;
        let second = cache.get_or_create(node, || {
            calls.set(calls.get() + 1);
            Record::Unlit(8)
        }) as *const Record;

        assert!(std::ptr::eq(first, second));
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.builds(), 1);
        assert_eq!(cache.get(&node), Some(&Record::Unlit(7)));
    }

    #[test]
    fn distinct_entities_get_distinct_records() {
        let mut cache: ResourceCache<hecs::Entity, Record> = ResourceCache::new();
        let mut world = hecs::World::new();
        let a = world.spawn(());
        let b = world.spawn(());

        cache.get_or_create(a, || Record::Unlit(1));
        cache.get_or_create(b, || Record::Unlit(2));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a), Some(&Record::Unlit(1)));
        assert_eq!(cache.get(&b), Some(&Record::Unlit(2)));
    }

    #[test]
    fn reused_entity_slot_is_a_new_identity() {
        let mut cache: ResourceCache<hecs::Entity, Record> = ResourceCache::new();
        let mut world = hecs::World::new();
        let old = world.spawn(());
        cache.get_or_create(old, || Record::Unlit(1));
        world.despawn(old).unwrap();
        let new = world.spawn(());

        assert_eq!(old.id(), new.id());
        assert!(cache.get(&new).is_none());
    }

    #[test]
    fn kind_change_rebuilds_the_record() {
        let mut cache: ResourceCache<u32, Record> = ResourceCache::new();
        cache.get_or_create(1, || Record::Unlit(1));

        let rebuilt = cache.get_or_rebuild(
            1,
            |r| matches!(r, Record::Volume(_)),
            || Record::Volume(2),
        );
        assert_eq!(*rebuilt, Record::Volume(2));
        assert_eq!(cache.builds(), 2);

        cache.get_or_rebuild(1, |r| matches!(r, Record::Volume(_)), || Record::Volume(3));
        assert_eq!(cache.get(&1), Some(&Record::Volume(2)));
        assert_eq!(cache.builds(), 2);
    }

    #[test]
    fn clear_forces_a_rebuild() {
        let mut cache: ResourceCache<u32, Record> = ResourceCache::new();
        cache.get_or_create(1, || Record::Unlit(1));
        cache.clear();
        assert!(cache.is_empty());

        cache.get_or_create(1, || Record::Unlit(2));
        assert_eq!(cache.get(&1), Some(&Record::Unlit(2)));
        assert_eq!(cache.builds(), 2);
    }
}
