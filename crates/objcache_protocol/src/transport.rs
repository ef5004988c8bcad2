//! Transport contracts between sessions and the authority.

use async_trait::async_trait;
use objcache_codec::Value;
use objcache_core::{CacheResult, IdOrRecord, QueryInput, Record};
use std::fmt;

/// Identifies a registered session on the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Session-to-authority requests.
///
/// This trait abstracts the network layer. Rejections come back as the
/// [`objcache_core::CacheError`] the authority raised, with its kind intact.
#[async_trait]
pub trait CacheTransport: Send + Sync {
    /// Fetches one record.
    async fn read_object(
        &self,
        cache: &str,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<Record>>;

    /// Fetches every record matching the input.
    async fn read_objects(&self, cache: &str, input: QueryInput) -> CacheResult<Vec<Record>>;

    /// Creates a record; the answer carries its identity.
    async fn create_object(&self, cache: &str, values: Record) -> CacheResult<Record>;

    /// Updates a record; the answer is the authoritative version.
    async fn update_object(&self, cache: &str, values: Record) -> CacheResult<Record>;

    /// Deletes a record; the answer is the affected row count.
    async fn delete_object(&self, cache: &str, target: IdOrRecord) -> CacheResult<u64>;
}

/// Authority-to-session pushes.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Merge records into the named cache.
    async fn apply_changes(&self, cache: &str, records: Vec<Record>);

    /// Drop an object from the named cache.
    async fn remove_from_cache(&self, cache: &str, id: Value);
}
