//! In-memory replica of one named cache.
//!
//! A [`MemorySet`] keeps three views over the same objects: the insertion
//! ordered list, the primary identity map and the [`IndexSet`]. Every
//! mutation updates all three before returning, so the views never disagree
//! about which objects are cached.

use crate::config::CacheConfig;
use crate::descriptor::{CacheDescriptor, CollisionPolicy};
use crate::error::{CacheError, CacheResult};
use crate::index::{Index, IndexCollision, IndexSet};
use crate::memo::QueryMemo;
use crate::query::{Selector, ShapeKey};
use crate::record::{CachedObject, Record};
use objcache_codec::{Timestamp, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Result of filing a record into a MemorySet.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The cached object now holding the record's fields.
    pub object: CachedObject,
    /// True if the identity was not cached before.
    pub inserted: bool,
    /// Unique-index leaves that were overwritten.
    pub collisions: Vec<IndexCollision>,
}

/// An object taken out of a MemorySet, with enough state to put it back.
#[derive(Debug, Clone)]
pub struct Removed {
    /// Identity of the removed object.
    pub id: Value,
    /// The removed object itself.
    pub object: CachedObject,
    /// Its former position in the insertion-ordered list.
    pub position: usize,
}

/// List, identity map, indices and fetch memo for one cache.
#[derive(Debug)]
pub struct MemorySet {
    descriptor: Arc<CacheDescriptor>,
    collision_policy: CollisionPolicy,
    list: Vec<CachedObject>,
    by_id: BTreeMap<Value, CachedObject>,
    indices: IndexSet,
    memo: QueryMemo,
}

impl MemorySet {
    /// Creates an empty MemorySet for a cache.
    pub fn new(descriptor: Arc<CacheDescriptor>, config: &CacheConfig) -> Self {
        let collision_policy = descriptor
            .collision_policy()
            .unwrap_or(config.collision_policy);
        Self {
            indices: IndexSet::new(descriptor.indices()),
            memo: QueryMemo::new(config.memo_capacity),
            descriptor,
            collision_policy,
            list: Vec::new(),
            by_id: BTreeMap::new(),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Cache declaration.
    pub fn descriptor(&self) -> &Arc<CacheDescriptor> {
        &self.descriptor
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Cached objects in insertion order.
    pub fn list(&self) -> &[CachedObject] {
        &self.list
    }

    /// Returns true if the identity is cached.
    pub fn contains(&self, id: &Value) -> bool {
        self.by_id.contains_key(id)
    }

    /// Cached object by identity.
    pub fn get_by_id(&self, id: &Value) -> Option<CachedObject> {
        self.by_id.get(id).cloned()
    }

    /// Index by name.
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indices.get(name)
    }

    /// Inserts a raw record, or merges it into the cached object with the
    /// same identity.
    pub fn upsert(&mut self, record: Record) -> CacheResult<UpsertOutcome> {
        let id = self.require_id(&record)?;
        if self.by_id.contains_key(&id) {
            return self.merge_into(&id, &record);
        }
        let object = CachedObject::new(self.descriptor.wrap(record));
        self.insert_object(object)
    }

    /// Inserts an already-wrapped object.
    ///
    /// If its identity is cached meanwhile, its fields are merged into the
    /// existing object instead and the given handle is discarded.
    pub fn insert_object(&mut self, object: CachedObject) -> CacheResult<UpsertOutcome> {
        let record = object.snapshot();
        let id = self.require_id(&record)?;
        if self.by_id.contains_key(&id) {
            return self.merge_into(&id, &record);
        }
        self.check_collisions(&id, &record)?;

        self.list.push(object.clone());
        self.by_id.insert(id.clone(), object.clone());
        let collisions = self.indices.insert(&id, &object, &record);
        self.report(&collisions);
        Ok(UpsertOutcome {
            object,
            inserted: true,
            collisions,
        })
    }

    /// Shallow-merges `fields` into the cached object with identity `id`.
    ///
    /// The object is unfiled from every index under its current key, its
    /// fields are updated in place, and it is refiled under the new key.
    pub fn merge_into(&mut self, id: &Value, fields: &Record) -> CacheResult<UpsertOutcome> {
        let object = self
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::not_found(self.name()))?;
        let mut next = object.snapshot();
        next.merge_from(fields);
        self.check_collisions(id, &next)?;

        self.indices.remove(id);
        object.write().merge_from(fields);
        let collisions = self.indices.insert(id, &object, &next);
        self.report(&collisions);
        Ok(UpsertOutcome {
            object,
            inserted: false,
            collisions,
        })
    }

    /// Replaces every field of a cached object with `snapshot`.
    ///
    /// Fields absent from the snapshot are removed. Returns `None` if the
    /// snapshot's identity is not cached.
    pub fn restore(&mut self, snapshot: Record) -> CacheResult<Option<CachedObject>> {
        let id = self.require_id(&snapshot)?;
        let Some(object) = self.by_id.get(&id).cloned() else {
            return Ok(None);
        };
        self.indices.remove(&id);
        let collisions = self.indices.insert(&id, &object, &snapshot);
        *object.write() = snapshot;
        self.report(&collisions);
        Ok(Some(object))
    }

    /// Removes an object from the list, the identity map and every index.
    pub fn remove(&mut self, id: &Value) -> Option<Removed> {
        let object = self.by_id.remove(id)?;
        let position = self
            .list
            .iter()
            .position(|held| held.same_object(&object))
            .unwrap_or(self.list.len());
        if position < self.list.len() {
            self.list.remove(position);
        }
        self.indices.remove(id);
        Some(Removed {
            id: id.clone(),
            object,
            position,
        })
    }

    /// Puts a removed object back at its former list position.
    ///
    /// If the identity was cached again in the meantime, the removed
    /// object's fields are merged into the newer one.
    pub fn reinsert(&mut self, removed: Removed) -> CacheResult<UpsertOutcome> {
        let record = removed.object.snapshot();
        if self.by_id.contains_key(&removed.id) {
            return self.merge_into(&removed.id, &record);
        }
        let position = removed.position.min(self.list.len());
        self.list.insert(position, removed.object.clone());
        self.by_id.insert(removed.id.clone(), removed.object.clone());
        let collisions = self.indices.insert(&removed.id, &removed.object, &record);
        self.report(&collisions);
        Ok(UpsertOutcome {
            object: removed.object,
            inserted: true,
            collisions,
        })
    }

    /// Objects filed under `key` (or under any key it prefixes) in the named
    /// index.
    pub fn index_lookup(&self, name: &str, key: &[Value]) -> CacheResult<Vec<CachedObject>> {
        let index = self.indices.get(name).ok_or_else(|| CacheError::UnknownIndex {
            cache: self.name().to_string(),
            index: name.to_string(),
        })?;
        if key.len() > index.definition().fields.len() {
            return Err(CacheError::invalid_request(
                self.name(),
                format!(
                    "index {} has {} columns, got a {}-column key",
                    name,
                    index.definition().fields.len(),
                    key.len()
                ),
            ));
        }
        Ok(index.lookup(key))
    }

    /// Cached objects matching a selector.
    ///
    /// Uses the index with the longest bound key prefix when one exists
    /// (results in key order), otherwise scans the list (insertion order).
    pub fn select(&self, selector: &Selector) -> Vec<CachedObject> {
        match self.indices.find_covering(selector) {
            Some((index, prefix)) => index
                .lookup(&prefix)
                .into_iter()
                .filter(|object| selector.matches(&object.read()))
                .collect(),
            None => self
                .list
                .iter()
                .filter(|object| selector.matches(&object.read()))
                .cloned()
                .collect(),
        }
    }

    /// Records the greatest `updatedAt` seen for a query shape.
    pub fn check_updated_at(&mut self, ts: Timestamp, shape: ShapeKey) {
        self.memo.check(shape, ts);
    }

    /// Greatest `updatedAt` recorded for a query shape.
    pub fn last_updated_at(&self, shape: &ShapeKey) -> Option<Timestamp> {
        self.memo.last(shape)
    }

    /// Query-shape memo.
    pub fn memo(&self) -> &QueryMemo {
        &self.memo
    }

    /// Drops every object and every memo entry.
    pub fn clear(&mut self) {
        self.list.clear();
        self.by_id.clear();
        self.indices.clear();
        self.memo.clear();
    }

    /// Switches to a new declaration of the same cache, rebuilding every
    /// index over the cached objects. Objects, identities and the memo are
    /// kept; the identity property may not change.
    pub fn redefine(
        &mut self,
        descriptor: Arc<CacheDescriptor>,
        config: &CacheConfig,
    ) -> CacheResult<()> {
        if descriptor.id_property() != self.descriptor.id_property() {
            return Err(CacheError::invalid_request(
                self.name(),
                format!(
                    "identity property cannot change from {} to {}",
                    self.descriptor.id_property(),
                    descriptor.id_property()
                ),
            ));
        }
        self.collision_policy = descriptor
            .collision_policy()
            .unwrap_or(config.collision_policy);
        self.indices = IndexSet::new(descriptor.indices());
        self.descriptor = descriptor;
        for object in &self.list {
            let record = object.snapshot();
            if let Some(id) = self.descriptor.id_of(&record) {
                let collisions = self.indices.insert(&id, object, &record);
                self.report(&collisions);
            }
        }
        Ok(())
    }

    fn require_id(&self, record: &Record) -> CacheResult<Value> {
        self.descriptor.id_of(record).ok_or_else(|| {
            CacheError::invalid_request(
                self.name(),
                format!("record has no {}", self.descriptor.id_property()),
            )
        })
    }

    fn check_collisions(&self, id: &Value, record: &Record) -> CacheResult<()> {
        if self.collision_policy != CollisionPolicy::Reject {
            return Ok(());
        }
        match self.indices.check_unique(id, record) {
            Some(collision) => Err(CacheError::UniqueViolation {
                cache: self.name().to_string(),
                index: collision.index,
                key: collision.key.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn report(&self, collisions: &[IndexCollision]) {
        for collision in collisions {
            warn!(
                cache = self.name(),
                index = %collision.index,
                key = %collision.key,
                displaced = %collision.displaced,
                incoming = %collision.incoming,
                "unique index key overwritten"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::IndexDefinition;
    use proptest::prelude::*;

    fn users() -> Arc<CacheDescriptor> {
        Arc::new(
            CacheDescriptor::new("users")
                .with_index(IndexDefinition::new("name", ["name"]).unique())
                .with_index(IndexDefinition::new("team", ["team"])),
        )
    }

    fn set() -> MemorySet {
        MemorySet::new(users(), &CacheConfig::default())
    }

    fn user(id: i64, name: &str) -> Record {
        Record::new().with("id", id).with("name", name)
    }

    fn name_key(name: &str) -> Vec<Value> {
        vec![Value::from(name)]
    }

    #[test]
    fn insert_merge_remove_lifecycle() {
        let mut set = set();

        let r1 = set
            .upsert(user(1, "A").with("updatedAt", Timestamp::from_millis(1).unwrap()))
            .unwrap();
        assert!(r1.inserted);
        assert_eq!(set.len(), 1);
        assert!(set.get_by_id(&Value::Integer(1)).unwrap().same_object(&r1.object));
        let by_name = set.index_lookup("name", &name_key("A")).unwrap();
        assert!(by_name[0].same_object(&r1.object));

        let merged = set.upsert(user(1, "B")).unwrap();
        assert!(!merged.inserted);
        assert!(merged.object.same_object(&r1.object));
        assert_eq!(r1.object.get("name"), Some(Value::from("B")));
        assert!(set.index_lookup("name", &name_key("A")).unwrap().is_empty());
        assert!(set.index_lookup("name", &name_key("B")).unwrap()[0].same_object(&r1.object));

        let removed = set.remove(&Value::Integer(1)).unwrap();
        assert_eq!(removed.position, 0);
        assert!(set.is_empty());
        assert!(set.get_by_id(&Value::Integer(1)).is_none());
        assert!(set.index_lookup("name", &name_key("B")).unwrap().is_empty());
    }

    #[test]
    fn upsert_requires_identity() {
        let mut set = set();
        assert!(matches!(
            set.upsert(Record::new().with("name", "A")),
            Err(CacheError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn overwrite_policy_reports_collision() {
        let mut set = set();
        set.upsert(user(1, "A")).unwrap();
        let outcome = set.upsert(user(2, "A")).unwrap();
        assert_eq!(outcome.collisions.len(), 1);
        assert_eq!(set.len(), 2);
        let holders = set.index_lookup("name", &name_key("A")).unwrap();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].same_object(&outcome.object));
    }

    #[test]
    fn reject_policy_leaves_set_untouched() {
        let descriptor = Arc::new(
            CacheDescriptor::new("users")
                .with_index(IndexDefinition::new("name", ["name"]).unique())
                .with_collision_policy(CollisionPolicy::Reject),
        );
        let mut set = MemorySet::new(descriptor, &CacheConfig::default());
        set.upsert(user(1, "A")).unwrap();
        set.upsert(user(2, "B")).unwrap();

        assert!(matches!(set.upsert(user(3, "A")), Err(CacheError::UniqueViolation { .. })));
        assert!(matches!(set.upsert(user(2, "A")), Err(CacheError::UniqueViolation { .. })));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_by_id(&Value::Integer(2)).unwrap().get("name"), Some(Value::from("B")));
    }

    #[test]
    fn restore_replaces_all_fields() {
        let mut set = set();
        let outcome = set.upsert(user(1, "A")).unwrap();
        let snapshot = outcome.object.snapshot();
        set.upsert(user(1, "B").with("score", 5)).unwrap();

        let restored = set.restore(snapshot.clone()).unwrap().unwrap();
        assert!(restored.same_object(&outcome.object));
        assert_eq!(restored.snapshot(), snapshot);
        assert!(set.index_lookup("name", &name_key("B")).unwrap().is_empty());
        assert_eq!(set.index_lookup("name", &name_key("A")).unwrap().len(), 1);
    }

    #[test]
    fn reinsert_restores_position_and_identity() {
        let mut set = set();
        for (id, name) in [(1, "A"), (2, "B"), (3, "C")] {
            set.upsert(user(id, name)).unwrap();
        }
        let removed = set.remove(&Value::Integer(2)).unwrap();
        let original = removed.object.clone();
        assert_eq!(removed.position, 1);

        set.reinsert(removed).unwrap();
        assert!(set.list()[1].same_object(&original));
        assert!(set.get_by_id(&Value::Integer(2)).unwrap().same_object(&original));
        assert_eq!(set.index_lookup("name", &name_key("B")).unwrap().len(), 1);
    }

    #[test]
    fn select_uses_index_or_scan() {
        let mut set = set();
        set.upsert(user(1, "A").with("team", "red").with("role", "dev")).unwrap();
        set.upsert(user(2, "B").with("team", "red").with("role", "lead")).unwrap();
        set.upsert(user(3, "C").with("team", "blue").with("role", "dev")).unwrap();

        assert_eq!(set.select(&Selector::eq("team", "red")).len(), 2);
        assert_eq!(set.select(&Selector::eq("team", "red").and("role", "dev")).len(), 1);
        assert_eq!(set.select(&Selector::eq("role", "dev")).len(), 2);
        assert_eq!(set.select(&Selector::new()).len(), 3);
    }

    #[test]
    fn unknown_index_and_oversized_key() {
        let set = set();
        assert!(matches!(set.index_lookup("nope", &[]), Err(CacheError::UnknownIndex { .. })));
        assert!(matches!(
            set.index_lookup("name", &[Value::from("A"), Value::from("B")]),
            Err(CacheError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn clear_drops_objects_and_memo() {
        let mut set = set();
        set.upsert(user(1, "A")).unwrap();
        let shape = ShapeKey::of_bytes(b"shape");
        set.check_updated_at(Timestamp::from_millis(3).unwrap(), shape);
        set.clear();
        assert!(set.is_empty());
        assert!(set.last_updated_at(&shape).is_none());
        assert!(set.index("team").unwrap().is_empty());
    }

    #[test]
    fn redefine_rebuilds_indices_in_place() {
        let mut set = set();
        let a = set.upsert(user(1, "A").with("role", "dev")).unwrap().object;
        set.upsert(user(2, "B").with("role", "ops")).unwrap();

        let wider = Arc::new(
            CacheDescriptor::new("users")
                .with_index(IndexDefinition::new("role", ["role"]))
                .with_host_memory_set(true),
        );
        set.redefine(wider, &CacheConfig::default()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.index("name").is_none());
        let devs = set.index_lookup("role", &[Value::from("dev")]).unwrap();
        assert_eq!(devs.len(), 1);
        assert!(devs[0].same_object(&a));

        let renamed = Arc::new(CacheDescriptor::new("users").with_id_property("key"));
        let err = set.redefine(renamed, &CacheConfig::default()).unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest { .. }));
        assert!(set.index("role").is_some());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(i64, u8, u8),
        Remove(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0i64..8, 0u8..4, 0u8..3).prop_map(|(id, n, t)| Op::Upsert(id, n, t)),
            1 => (0i64..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn views_stay_consistent(ops in prop::collection::vec(op(), 1..60)) {
            let mut set = set();
            for op in ops {
                match op {
                    Op::Upsert(id, n, t) => {
                        let record = user(id, &format!("n{n}")).with("team", format!("t{t}"));
                        set.upsert(record).unwrap();
                    }
                    Op::Remove(id) => {
                        set.remove(&Value::Integer(id));
                    }
                }

                prop_assert_eq!(set.list().len(), set.by_id.len());
                for object in set.list() {
                    let id = object.get("id").unwrap();
                    prop_assert!(set.get_by_id(&id).unwrap().same_object(object));
                }

                for n in 0..4u8 {
                    let key = name_key(&format!("n{n}"));
                    prop_assert!(set.index_lookup("name", &key).unwrap().len() <= 1);
                }
                for t in 0..3u8 {
                    let team = Value::from(format!("t{t}"));
                    let mut expected: Vec<Value> = set
                        .list()
                        .iter()
                        .filter(|o| o.get("team") == Some(team.clone()))
                        .filter_map(|o| o.get("id"))
                        .collect();
                    let mut actual: Vec<Value> = set
                        .index_lookup("team", &[team])
                        .unwrap()
                        .iter()
                        .filter_map(|o| o.get("id"))
                        .collect();
                    expected.sort();
                    actual.sort();
                    prop_assert_eq!(expected, actual);
                }
            }
        }

        #[test]
        fn reapplying_is_idempotent(id in 0i64..100, n in 0u8..10, t in 0u8..10) {
            let mut set = set();
            let record = user(id, &format!("n{n}")).with("team", format!("t{t}"));
            let first = set.upsert(record.clone()).unwrap();
            let keys_before: Vec<usize> = set.indices.iter().map(Index::key_count).collect();

            let second = set.upsert(record).unwrap();
            prop_assert!(!second.inserted);
            prop_assert!(second.object.same_object(&first.object));
            prop_assert_eq!(set.len(), 1);
            let keys_after: Vec<usize> = set.indices.iter().map(Index::key_count).collect();
            prop_assert_eq!(keys_before, keys_after);
        }
    }
}
