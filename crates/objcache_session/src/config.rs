//! Configuration for session endpoints.

use objcache_core::CacheConfig;

/// Configuration for one session endpoint.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label attached to this session's log lines.
    pub label: String,
    /// Configuration for the session's MemorySets.
    pub cache: CacheConfig,
}

impl SessionConfig {
    /// Creates a configuration with the given log label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cache: CacheConfig::default(),
        }
    }

    /// Sets the MemorySet configuration.
    #[must_use]
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("session")
    }
}
