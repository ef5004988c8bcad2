//! Backing store contract.

use async_trait::async_trait;
use objcache_core::{QueryDescriptor, Record, Selector};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a backing store may report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No table backs the named cache.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write violated a store constraint.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// The authoritative persistent store behind the caches.
///
/// Every call names the cache whose table it targets.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// First row matching the descriptor.
    async fn find_one(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Option<Record>>;

    /// Every row matching the descriptor.
    async fn find_all(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Vec<Record>>;

    /// Inserts a row and returns it as stored (identity and timestamps set).
    async fn create(&self, cache: &str, values: Record) -> StoreResult<Record>;

    /// Merges `values` into every row matching `selector`; returns the count.
    async fn update(&self, cache: &str, values: Record, selector: &Selector) -> StoreResult<u64>;

    /// Deletes every row matching `selector`; returns the count.
    async fn destroy(&self, cache: &str, selector: &Selector) -> StoreResult<u64>;
}
