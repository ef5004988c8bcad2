//! Cache engine configuration.

use crate::descriptor::CollisionPolicy;

/// Number of distinct query shapes a MemorySet tracks by default.
pub const DEFAULT_MEMO_CAPACITY: usize = 100;

/// Configuration shared by every MemorySet a registry creates.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of query shapes remembered for incremental fetches.
    /// The oldest inserted shape is evicted first.
    pub memo_capacity: usize,

    /// Collision policy for unique indices whose descriptor does not pick one.
    pub collision_policy: CollisionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            collision_policy: CollisionPolicy::Overwrite,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query-shape memo capacity (at least 1).
    #[must_use]
    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity.max(1);
        self
    }

    /// Sets the default unique-index collision policy.
    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memo_capacity, 100);
        assert_eq!(config.collision_policy, CollisionPolicy::Overwrite);
    }

    #[test]
    fn capacity_never_zero() {
        assert_eq!(CacheConfig::new().with_memo_capacity(0).memo_capacity, 1);
    }
}
