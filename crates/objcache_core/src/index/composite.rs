//! Single composite-key index.

use super::key::IndexKey;
use crate::descriptor::IndexDefinition;
use crate::record::{CachedObject, Record};
use objcache_codec::Value;
use std::collections::BTreeMap;

/// A unique-index key that was already held by another object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCollision {
    /// Index name.
    pub index: String,
    /// Contested key.
    pub key: IndexKey,
    /// Identity of the object that held the key.
    pub displaced: Value,
    /// Identity of the object that now holds (or wanted) it.
    pub incoming: Value,
}

/// Composite-key lookup structure over cached objects.
#[derive(Debug)]
pub struct Index {
    definition: IndexDefinition,
    entries: BTreeMap<IndexKey, Vec<(Value, CachedObject)>>,
    locations: BTreeMap<Value, IndexKey>,
}

impl Index {
    /// Creates an empty index.
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            entries: BTreeMap::new(),
            locations: BTreeMap::new(),
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Index declaration.
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Whether at most one object may hold a key.
    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    /// Number of indexed objects.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Key under which `id` is currently filed.
    pub fn location_of(&self, id: &Value) -> Option<&IndexKey> {
        self.locations.get(id)
    }

    /// Files `object` under the key derived from `record`.
    ///
    /// On a unique index an occupied leaf is overwritten; the displaced
    /// object is dropped from this index and the collision is returned.
    pub fn insert(
        &mut self,
        id: &Value,
        object: &CachedObject,
        record: &Record,
    ) -> Option<IndexCollision> {
        let key = self.definition.key_of(record);
        if self.locations.get(id) == Some(&key) {
            if let Some(leaf) = self.entries.get_mut(&key) {
                if let Some(slot) = leaf.iter_mut().find(|(held, _)| held == id) {
                    slot.1 = object.clone();
                    return None;
                }
            }
        }
        self.remove(id);

        let mut collision = None;
        let leaf = self.entries.entry(key.clone()).or_default();
        if self.definition.unique {
            if let Some((displaced, _)) = leaf.pop() {
                self.locations.remove(&displaced);
                collision = Some(IndexCollision {
                    index: self.definition.name.clone(),
                    key: key.clone(),
                    displaced,
                    incoming: id.clone(),
                });
            }
            leaf.clear();
        }
        leaf.push((id.clone(), object.clone()));
        self.locations.insert(id.clone(), key);
        collision
    }

    /// Drops `id` from the key it was filed under.
    pub fn remove(&mut self, id: &Value) -> bool {
        let Some(key) = self.locations.remove(id) else {
            return false;
        };
        if let Some(leaf) = self.entries.get_mut(&key) {
            leaf.retain(|(held, _)| held != id);
            if leaf.is_empty() {
                self.entries.remove(&key);
            }
        }
        true
    }

    /// Reports the collision inserting `record` as `id` would cause,
    /// without mutating anything.
    pub fn would_collide(&self, id: &Value, record: &Record) -> Option<IndexCollision> {
        if !self.definition.unique {
            return None;
        }
        let key = self.definition.key_of(record);
        let leaf = self.entries.get(&key)?;
        leaf.iter()
            .find(|(held, _)| held != id)
            .map(|(held, _)| IndexCollision {
                index: self.definition.name.clone(),
                key: key.clone(),
                displaced: held.clone(),
                incoming: id.clone(),
            })
    }

    /// Objects filed under exactly `key`.
    pub fn get(&self, key: &[Value]) -> Vec<CachedObject> {
        self.entries
            .get(&IndexKey::new(key.to_vec()))
            .map(|leaf| leaf.iter().map(|(_, obj)| obj.clone()).collect())
            .unwrap_or_default()
    }

    /// The single object filed under `key`.
    pub fn get_unique(&self, key: &[Value]) -> Option<CachedObject> {
        self.entries
            .get(&IndexKey::new(key.to_vec()))
            .and_then(|leaf| leaf.first())
            .map(|(_, obj)| obj.clone())
    }

    /// Objects whose key starts with `prefix`, in key order.
    ///
    /// A full-length prefix is an exact lookup; an empty prefix returns
    /// everything.
    pub fn lookup(&self, prefix: &[Value]) -> Vec<CachedObject> {
        if prefix.len() >= self.definition.fields.len() {
            return self.get(prefix);
        }
        self.entries
            .range(IndexKey::new(prefix.to_vec())..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(_, leaf)| leaf.iter().map(|(_, obj)| obj.clone()))
            .collect()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.locations.clear();
    }
}
