//! # objcache session
//!
//! The session side of objcache.
//!
//! This crate provides:
//! - `SessionEndpoint`, which owns the session's MemorySets and receives
//!   authority pushes
//! - `SessionCache`, the `CacheEndpoint` for one cache, backed by a transport
//! - `MockTransport` for scripted tests
//!
//! ## Key Invariants
//!
//! - Reads never fail the caller: rejections fire `error` and resolve empty
//! - Updates and deletes are applied locally before the authority answers
//! - A rejected mutation is undone exactly once, restoring the prior snapshot
//!   or list position, and the rejection reaches the caller

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod session;
mod transport;

pub use config::SessionConfig;
pub use session::{SessionCache, SessionEndpoint};
pub use transport::{MockCall, MockTransport};
