//! # objcache protocol
//!
//! Wire messages and transport contracts for objcache.
//!
//! This crate provides:
//! - `CacheMessage` requests, responses and pushes with CBOR codecs
//! - `CacheTransport`, the session-to-authority request contract
//! - `PushSink`, the authority-to-session push contract
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod messages;
mod transport;

pub use messages::{
    ApplyChangesPush, CacheMessage, CreateObjectRequest, DeleteObjectRequest, DeleteResponse,
    ErrorResponse, ObjectResponse, ObjectsResponse, ReadObjectRequest, ReadObjectsRequest,
    RemoveFromCachePush, UpdateObjectRequest,
};
pub use transport::{CacheTransport, PushSink, SessionId};
