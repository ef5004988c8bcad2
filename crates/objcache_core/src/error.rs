//! Error types for objcache core.

use objcache_codec::CodecError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The access policy refused the operation.
    #[error("access denied on cache {cache}: {reason}")]
    AccessDenied {
        /// Cache the request targeted.
        cache: String,
        /// Why the policy refused.
        reason: String,
    },

    /// Query input or mutation values were ambiguous or malformed.
    #[error("invalid request on cache {cache}: {reason}")]
    InvalidRequest {
        /// Cache the request targeted.
        cache: String,
        /// What was wrong with the input.
        reason: String,
    },

    /// A single-object read found nothing and absence was not allowed.
    #[error("object not found in cache {cache}")]
    NotFound {
        /// Cache the request targeted.
        cache: String,
    },

    /// The backing store failed.
    #[error("store error on cache {cache}: {message}")]
    Store {
        /// Cache whose query failed.
        cache: String,
        /// Store-provided description.
        message: String,
    },

    /// A unique index already holds another object under the key.
    #[error("unique index {index} on cache {cache} already holds key {key}")]
    UniqueViolation {
        /// Cache name.
        cache: String,
        /// Index name.
        index: String,
        /// Rendered key tuple.
        key: String,
    },

    /// No cache is installed under this name.
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    /// No index is declared under this name.
    #[error("unknown index {index} on cache {cache}")]
    UnknownIndex {
        /// Cache name.
        cache: String,
        /// Requested index name.
        index: String,
    },

    /// A cache declaration is unusable.
    #[error("invalid descriptor for cache {cache}: {reason}")]
    InvalidDescriptor {
        /// Cache name.
        cache: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The transport between session and authority failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// One or more event listeners failed.
    #[error("{} listener(s) failed on {event}: {}", failures.len(), failures.join("; "))]
    Listeners {
        /// Event name.
        event: &'static str,
        /// Individual failure messages.
        failures: Vec<String>,
    },
}

/// Wire-level classification of a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Policy rejection.
    AccessDenied,
    /// Malformed or ambiguous input.
    InvalidRequest,
    /// Missing object.
    NotFound,
    /// Backing store failure.
    Store,
    /// Anything else (codec, listener, unknown cache).
    Internal,
}

impl ErrorKind {
    /// Stable numeric code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::AccessDenied => 1,
            ErrorKind::InvalidRequest => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::Store => 4,
            ErrorKind::Internal => 5,
        }
    }

    /// Inverse of [`ErrorKind::code`]; unknown codes map to `Internal`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ErrorKind::AccessDenied,
            2 => ErrorKind::InvalidRequest,
            3 => ErrorKind::NotFound,
            4 => ErrorKind::Store,
            _ => ErrorKind::Internal,
        }
    }
}

impl CacheError {
    /// Creates an access-denied error.
    pub fn access_denied(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(cache: impl Into<String>) -> Self {
        Self::NotFound {
            cache: cache.into(),
        }
    }

    /// Creates a store error annotated with the cache name.
    pub fn store(cache: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Store {
            cache: cache.into(),
            message: message.to_string(),
        }
    }

    /// Returns the wire classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::AccessDenied { .. } => ErrorKind::AccessDenied,
            CacheError::InvalidRequest { .. } | CacheError::UniqueViolation { .. } => {
                ErrorKind::InvalidRequest
            }
            CacheError::NotFound { .. } => ErrorKind::NotFound,
            CacheError::Store { .. } => ErrorKind::Store,
            _ => ErrorKind::Internal,
        }
    }

    /// Rebuilds an error received over the wire.
    pub fn from_kind(
        kind: ErrorKind,
        cache: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let cache = cache.into();
        let message = message.into();
        match kind {
            ErrorKind::AccessDenied => Self::AccessDenied {
                cache,
                reason: message,
            },
            ErrorKind::InvalidRequest => Self::InvalidRequest {
                cache,
                reason: message,
            },
            ErrorKind::NotFound => Self::NotFound { cache },
            ErrorKind::Store => Self::Store { cache, message },
            ErrorKind::Internal => Self::Transport(message),
        }
    }

    /// Returns the detail text carried on the wire for this error.
    pub fn detail(&self) -> String {
        match self {
            CacheError::AccessDenied { reason, .. } | CacheError::InvalidRequest { reason, .. } => {
                reason.clone()
            }
            CacheError::Store { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true if the caller's input or identity caused the failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AccessDenied | ErrorKind::InvalidRequest | ErrorKind::NotFound
        )
    }
}
