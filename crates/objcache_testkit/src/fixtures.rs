//! Fixtures: a sample cache declaration and a ready-to-use authority.

use objcache_authority::{
    AccessPolicy, AllowAll, Authority, AuthorityConfig, AuthorityEndpoint, BackingStore,
    MemoryStore, Principal, RequestContext,
};
use objcache_codec::from_json;
use objcache_core::{CacheDescriptor, CollisionPolicy, IndexDefinition, Record};
use objcache_protocol::SessionId;
use std::sync::Arc;

/// Name of the sample cache.
pub const USERS: &str = "users";

/// The sample `users` cache: unique index on `name`, non-unique index on
/// `team`, shared MemorySet on the authority.
pub fn users_descriptor() -> CacheDescriptor {
    CacheDescriptor::new(USERS)
        .with_index(IndexDefinition::new("name", ["name"]).unique())
        .with_index(IndexDefinition::new("team", ["team"]))
        .with_host_memory_set(true)
}

/// Like [`users_descriptor`] but rejecting unique-key collisions.
pub fn strict_users_descriptor() -> CacheDescriptor {
    users_descriptor().with_collision_policy(CollisionPolicy::Reject)
}

/// Builds a record from a JSON object literal.
///
/// # Panics
///
/// Panics if `json` is not an object of integer, text, bool, null, array or
/// object fields.
pub fn record(json: serde_json::Value) -> Record {
    let value = from_json(&json).expect("Fixture JSON must use integers, not floats");
    Record::from_value(&value).expect("Fixture JSON must be an object")
}

/// An authority over a [`MemoryStore`] with the `users` cache installed.
pub struct TestAuthority {
    /// The authority.
    pub authority: Arc<Authority>,
    /// Its backing store.
    pub store: Arc<MemoryStore>,
}

impl TestAuthority {
    /// Authority that permits everything.
    pub fn allow_all() -> Self {
        Self::with_access(AuthorityConfig::default(), Arc::new(AllowAll))
    }

    /// Authority with a custom configuration and access policy.
    pub fn with_access(config: AuthorityConfig, access: Arc<dyn AccessPolicy>) -> Self {
        Self::with_descriptors(config, access, [users_descriptor()])
    }

    /// Authority with custom caches installed.
    ///
    /// # Panics
    ///
    /// Panics if a descriptor is invalid.
    pub fn with_descriptors<I>(
        config: AuthorityConfig,
        access: Arc<dyn AccessPolicy>,
        descriptors: I,
    ) -> Self
    where
        I: IntoIterator<Item = CacheDescriptor>,
    {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(Authority::new(config, store.clone(), access));
        for descriptor in descriptors {
            store.define_table(&descriptor);
            authority.install(descriptor).expect("Failed to install fixture cache");
        }
        Self { authority, store }
    }

    /// Writes rows straight into the store, bypassing every cache.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects a row.
    pub async fn seed(&self, cache: &str, rows: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut created = Vec::new();
        for row in rows {
            created.push(
                self.store
                    .create(cache, row)
                    .await
                    .expect("Failed to seed fixture row"),
            );
        }
        created
    }

    /// Registers a session without a push sink.
    pub fn register(&self, principal: Principal) -> SessionId {
        self.authority.register_session(principal, None)
    }

    /// In-process endpoint acting for `principal`.
    ///
    /// # Panics
    ///
    /// Panics if the cache is not installed.
    pub fn endpoint(&self, cache: &str, principal: Principal) -> AuthorityEndpoint {
        self.authority
            .endpoint(cache, RequestContext::new(principal))
            .expect("Fixture cache is not installed")
    }
}
