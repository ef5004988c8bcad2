//! # objcache testkit
//!
//! Test utilities for objcache.
//!
//! This crate provides:
//! - Fixtures: a sample `users` cache and an in-memory authority around it
//! - Property-based test generators using proptest
//! - `RecordingListener` for asserting on cache events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objcache_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reads_through_authority() {
//!     let fixture = TestAuthority::allow_all();
//!     fixture.seed(USERS, [record(json!({"name": "ann"}))]).await;
//!     // ... drive sessions against fixture.authority
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recording::*;
    pub use serde_json::json;
}

pub use fixtures::*;
pub use generators::*;
pub use recording::*;
