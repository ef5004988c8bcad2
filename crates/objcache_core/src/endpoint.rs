//! Operations every cache endpoint offers, on either side of the wire.

use crate::cache::Cache;
use crate::error::CacheResult;
use crate::events::EventHub;
use crate::query::{QueryInput, ShapeKey};
use crate::record::{CachedObject, IdOrRecord, Record};
use async_trait::async_trait;
use objcache_codec::Value;

/// Read/write surface of one named cache.
///
/// Implementors provide the five fetching operations; cache-only reads,
/// wrapping, merging and removal come from the shared [`Cache`] state.
#[async_trait]
pub trait CacheEndpoint: Send + Sync {
    /// Shared per-cache state.
    fn cache(&self) -> &Cache;

    /// Fetches one object. With `allow_absent = false` a miss is an error.
    async fn read_object(
        &self,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<CachedObject>>;

    /// Fetches every object matching the input.
    async fn read_objects(&self, input: QueryInput) -> CacheResult<Vec<CachedObject>>;

    /// Creates an object from field values.
    async fn create_object(&self, values: Record) -> CacheResult<CachedObject>;

    /// Updates the object named by the identity field of `values`.
    async fn update_object(&self, values: Record) -> CacheResult<CachedObject>;

    /// Deletes an object; returns the number of affected rows.
    async fn delete_object(&self, target: IdOrRecord) -> CacheResult<u64>;

    /// Cache name.
    fn name(&self) -> &str {
        self.cache().name()
    }

    /// Event subscribers.
    fn events(&self) -> &EventHub {
        self.cache().events()
    }

    /// Cached object by identity; never fetches.
    fn get_object_now(&self, id: &Value) -> Option<CachedObject> {
        self.cache().get_object_now(id)
    }

    /// Cached objects matching the input; never fetches.
    fn get_objects_now(&self, input: &QueryInput) -> Vec<CachedObject> {
        self.cache().get_objects_now(input)
    }

    /// Returns the cached object if exactly one matches, otherwise fetches
    /// (absence allowed).
    async fn get_object(&self, input: QueryInput) -> CacheResult<Option<CachedObject>> {
        let cached = match &input {
            QueryInput::Id(id) => self.get_object_now(id),
            QueryInput::Filter(_) => {
                let mut hits = self.get_objects_now(&input);
                if hits.len() == 1 {
                    hits.pop()
                } else {
                    None
                }
            }
            QueryInput::All => None,
        };
        match cached {
            Some(object) => Ok(Some(object)),
            None => self.read_object(input, true).await,
        }
    }

    /// Builds a cached instance from raw fields.
    async fn wrap_object(&self, raw: Record) -> CachedObject {
        self.cache().wrap_object(raw).await
    }

    /// Merges records into the cache.
    async fn apply_changes(
        &self,
        records: Vec<Record>,
        shape: Option<&ShapeKey>,
    ) -> Vec<CachedObject> {
        self.cache().apply_changes(records, shape).await
    }

    /// Drops an object from the cache without touching the store.
    async fn remove_from_cache(&self, target: &IdOrRecord) -> Option<CachedObject> {
        self.cache().remove_from_cache(target).await
    }
}
