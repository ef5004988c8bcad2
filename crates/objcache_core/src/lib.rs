//! # objcache core
//!
//! In-memory replica structures and the shared cache-endpoint contract.
//!
//! This crate provides:
//! - `Record` and `CachedObject` (shared, in-place mutable handles)
//! - `CacheDescriptor` for declaring a named cache and its indices
//! - `Index` / `IndexSet` composite-key indices with prefix scan
//! - `MemorySet` (list + identity map + indices + query-shape memo)
//! - `CacheRegistry`, an injected owner of MemorySets
//! - `Cache` with the merge algorithm (`apply_changes`)
//! - `CacheEndpoint`, implemented by the authority and by sessions
//!
//! ## Key Invariants
//!
//! - The list, the identity map and every index hold the same objects
//! - Merging a cached record preserves the object's identity
//! - Re-applying an unchanged record changes no membership
//! - A unique index never maps one key to two objects
//! - The commit phase of a merge never suspends

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod descriptor;
mod endpoint;
mod error;
mod events;
mod index;
mod memo;
mod memory_set;
mod query;
mod record;
mod registry;

pub use cache::Cache;
pub use config::{CacheConfig, DEFAULT_MEMO_CAPACITY};
pub use descriptor::{CacheDescriptor, CollisionPolicy, IndexDefinition, InstanceWrapper};
pub use endpoint::CacheEndpoint;
pub use error::{CacheError, CacheResult, ErrorKind};
pub use events::{CacheEvent, CacheListener, EventHub, EventKind, ListenerId, StagedChange};
pub use index::{Index, IndexCollision, IndexKey, IndexSet};
pub use memo::QueryMemo;
pub use memory_set::{MemorySet, Removed, UpsertOutcome};
pub use query::{QueryDescriptor, QueryInput, Selector, ShapeKey};
pub use record::{CachedObject, IdOrRecord, Record};
pub use registry::{CacheRegistry, SharedMemorySet};

pub use objcache_codec::{Timestamp, Value};
