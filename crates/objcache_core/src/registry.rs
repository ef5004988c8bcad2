//! Registry of MemorySets keyed by cache name.

use crate::config::CacheConfig;
use crate::descriptor::CacheDescriptor;
use crate::error::CacheResult;
use crate::memory_set::MemorySet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A MemorySet shared between every endpoint that serves its cache.
pub type SharedMemorySet = Arc<Mutex<MemorySet>>;

/// Owns the MemorySets of one process side (the authority, or one session).
///
/// Created once and handed to the endpoints that need it; nothing is kept in
/// globals. [`CacheRegistry::teardown`] drops every set.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    config: CacheConfig,
    sets: RwLock<HashMap<String, SharedMemorySet>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the MemorySet for a cache, creating it on first use.
    ///
    /// An existing set declared by a different descriptor is redefined in
    /// place, so its indices follow the latest declaration.
    pub fn memory_set(&self, descriptor: &Arc<CacheDescriptor>) -> CacheResult<SharedMemorySet> {
        descriptor.validate()?;
        if let Some(set) = self.get(descriptor.name()) {
            let mut guard = set.lock();
            if !Arc::ptr_eq(guard.descriptor(), descriptor) {
                guard.redefine(Arc::clone(descriptor), &self.config)?;
                debug!(cache = descriptor.name(), "memory set redefined");
            }
            drop(guard);
            return Ok(set);
        }
        let mut sets = self.sets.write();
        let set = sets.entry(descriptor.name().to_string()).or_insert_with(|| {
            debug!(cache = descriptor.name(), "creating memory set");
            Arc::new(Mutex::new(MemorySet::new(Arc::clone(descriptor), &self.config)))
        });
        Ok(Arc::clone(set))
    }

    /// Returns an existing MemorySet.
    pub fn get(&self, name: &str) -> Option<SharedMemorySet> {
        self.sets.read().get(name).cloned()
    }

    /// Empties a cache's MemorySet, keeping it registered.
    pub fn clear(&self, name: &str) -> bool {
        match self.get(name) {
            Some(set) => {
                set.lock().clear();
                true
            }
            None => false,
        }
    }

    /// Unregisters a cache's MemorySet.
    pub fn remove(&self, name: &str) -> Option<SharedMemorySet> {
        self.sets.write().remove(name)
    }

    /// Names of every registered cache, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Clears and unregisters every MemorySet.
    pub fn teardown(&self) {
        let drained: Vec<_> = self.sets.write().drain().collect();
        for (name, set) in drained {
            set.lock().clear();
            debug!(cache = %name, "memory set torn down");
        }
    }
}
