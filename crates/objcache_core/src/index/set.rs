//! All secondary indices of one cache.

use super::composite::{Index, IndexCollision};
use crate::descriptor::IndexDefinition;
use crate::query::Selector;
use crate::record::{CachedObject, Record};
use objcache_codec::Value;

/// The indices declared for a cache, in declaration order.
#[derive(Debug, Default)]
pub struct IndexSet {
    indices: Vec<Index>,
}

impl IndexSet {
    /// Builds empty indices from their definitions.
    pub fn new(definitions: &[IndexDefinition]) -> Self {
        Self {
            indices: definitions.iter().cloned().map(Index::new).collect(),
        }
    }

    /// Number of indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no index is declared.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Index by name.
    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indices.iter().find(|index| index.name() == name)
    }

    /// Iterates indices in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indices.iter()
    }

    /// Files the object in every index, collecting unique collisions.
    pub fn insert(
        &mut self,
        id: &Value,
        object: &CachedObject,
        record: &Record,
    ) -> Vec<IndexCollision> {
        self.indices
            .iter_mut()
            .filter_map(|index| index.insert(id, object, record))
            .collect()
    }

    /// Drops the object from every index.
    pub fn remove(&mut self, id: &Value) {
        for index in &mut self.indices {
            index.remove(id);
        }
    }

    /// First unique collision that filing `record` as `id` would cause.
    pub fn check_unique(&self, id: &Value, record: &Record) -> Option<IndexCollision> {
        self.indices
            .iter()
            .find_map(|index| index.would_collide(id, record))
    }

    /// Picks the index whose leading columns are bound by the selector.
    ///
    /// Returns the index and the bound key prefix; the longest bound prefix
    /// wins, ties go to the earlier declaration.
    pub fn find_covering(&self, selector: &Selector) -> Option<(&Index, Vec<Value>)> {
        let mut best: Option<(&Index, Vec<Value>)> = None;
        for index in &self.indices {
            let prefix: Vec<Value> = index
                .definition()
                .fields
                .iter()
                .map_while(|field| selector.get(field).cloned())
                .collect();
            if prefix.is_empty() {
                continue;
            }
            if best.as_ref().map_or(true, |(_, p)| prefix.len() > p.len()) {
                best = Some((index, prefix));
            }
        }
        best
    }

    /// Empties every index.
    pub fn clear(&mut self) {
        for index in &mut self.indices {
            index.clear();
        }
    }
}
