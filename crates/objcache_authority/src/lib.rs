//! # objcache authority
//!
//! The authoritative side of objcache.
//!
//! This crate provides:
//! - `Authority`, which owns installed caches, sessions and the backing store
//! - `AuthorityEndpoint`, the policy-enforcing `CacheEndpoint`
//! - `CachePolicy` and `AccessPolicy` hooks with default rules
//! - `BackingStore` and the in-memory `MemoryStore`
//! - `LoopbackTransport` for driving an authority through the wire codec
//!
//! ## Key Invariants
//!
//! - Every request is compiled by its cache policy before the store is touched
//! - Unbounded reads and identity-less mutations are rejected by default
//! - Caches with a host MemorySet answer list reads incrementally, fetching only
//!   rows updated after the last time the same query shape was seen
//! - Pushes only reach the session that made the request

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod authority;
mod config;
mod endpoint;
mod loopback;
mod memory_store;
mod policy;
mod sessions;
mod store;

pub use authority::Authority;
pub use config::AuthorityConfig;
pub use endpoint::{AuthorityCache, AuthorityEndpoint, RequestContext};
pub use loopback::LoopbackTransport;
pub use memory_store::MemoryStore;
pub use policy::{
    defaults, AccessPolicy, AllowAll, CachePolicy, CompiledUpdate, DefaultPolicy, Operation,
    PolicyContext, Principal, RoleTable,
};
pub use sessions::SessionTable;
pub use store::{BackingStore, StoreError, StoreResult};
