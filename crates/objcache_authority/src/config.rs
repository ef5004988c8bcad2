//! Authority configuration.

use objcache_core::CacheConfig;

/// Configuration for the authority endpoint.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Settings for the shared MemorySets.
    pub cache: CacheConfig,
    /// Push read results to the requesting session as `applyChanges`.
    pub push_reads: bool,
    /// Push mutation results to the originating session.
    pub push_mutations: bool,
    /// Largest number of rows one read may return from the store.
    pub max_rows_per_read: usize,
}

impl AuthorityConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            cache: CacheConfig::default(),
            push_reads: false,
            push_mutations: true,
            max_rows_per_read: 10_000,
        }
    }

    /// Sets the MemorySet configuration.
    #[must_use]
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Enables or disables pushing read results.
    #[must_use]
    pub fn with_push_reads(mut self, enabled: bool) -> Self {
        self.push_reads = enabled;
        self
    }

    /// Enables or disables pushing mutation results.
    #[must_use]
    pub fn with_push_mutations(mut self, enabled: bool) -> Self {
        self.push_mutations = enabled;
        self
    }

    /// Sets the row limit per read.
    #[must_use]
    pub fn with_max_rows_per_read(mut self, max: usize) -> Self {
        self.max_rows_per_read = max;
        self
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self::new()
    }
}
