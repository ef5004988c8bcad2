//! Session endpoint: local MemorySets fed by an authority over a transport.

use crate::config::SessionConfig;
use async_trait::async_trait;
use objcache_codec::Value;
use objcache_core::{
    Cache, CacheDescriptor, CacheEndpoint, CacheError, CacheEvent, CacheRegistry, CacheResult,
    CachedObject, IdOrRecord, QueryInput, Record, SharedMemorySet,
};
use objcache_protocol::{CacheTransport, PushSink};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One cache as seen from a session.
///
/// Reads are best effort: a rejected read fires `error` and resolves to
/// nothing. Mutations are applied locally first and undone exactly once if
/// the authority rejects them.
pub struct SessionCache {
    cache: Cache,
    memory_set: SharedMemorySet,
    transport: Arc<dyn CacheTransport>,
    label: String,
}

impl SessionCache {
    /// The session-scoped MemorySet behind this cache.
    pub fn memory_set(&self) -> &SharedMemorySet {
        &self.memory_set
    }

    async fn announce_read(&self, input: &QueryInput) {
        self.cache
            .fire(CacheEvent::SendingReadQueryToHost {
                cache: self.name().to_string(),
                input: input.clone(),
            })
            .await;
    }

    async fn absorb(&self, err: CacheError) {
        warn!(session = %self.label, cache = self.name(), error = %err, "read failed");
        self.cache.fire_error(err).await;
    }

    async fn fire_updated(&self, object: CachedObject, added: bool) {
        self.cache
            .fire(CacheEvent::Updated {
                cache: self.name().to_string(),
                objects: vec![object.clone()],
                added: if added { vec![object] } else { Vec::new() },
            })
            .await;
    }

    async fn merge_answer(&self, record: Record) -> CachedObject {
        let mut merged = self.cache.apply_changes(vec![record.clone()], None).await;
        match merged.pop() {
            Some(object) => object,
            None => self.cache.wrap_object(record).await,
        }
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("label", &self.label)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheEndpoint for SessionCache {
    fn cache(&self) -> &Cache {
        &self.cache
    }

    async fn read_object(
        &self,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<CachedObject>> {
        self.announce_read(&input).await;
        match self.transport.read_object(self.name(), input, allow_absent).await {
            Ok(Some(record)) => Ok(self.cache.apply_changes(vec![record], None).await.pop()),
            Ok(None) => Ok(None),
            Err(err) => {
                self.absorb(err).await;
                Ok(None)
            }
        }
    }

    async fn read_objects(&self, input: QueryInput) -> CacheResult<Vec<CachedObject>> {
        self.announce_read(&input).await;
        match self.transport.read_objects(self.name(), input).await {
            Ok(records) => {
                debug!(
                    session = %self.label,
                    cache = self.name(),
                    fetched = records.len(),
                    "read objects"
                );
                Ok(self.cache.apply_changes(records, None).await)
            }
            Err(err) => {
                self.absorb(err).await;
                Ok(Vec::new())
            }
        }
    }

    async fn create_object(&self, values: Record) -> CacheResult<CachedObject> {
        let record = self.transport.create_object(self.name(), values).await?;
        Ok(self.merge_answer(record).await)
    }

    async fn update_object(&self, values: Record) -> CacheResult<CachedObject> {
        let descriptor = Arc::clone(self.cache.descriptor());
        let id = descriptor.id_of(&values).ok_or_else(|| {
            CacheError::invalid_request(
                self.name(),
                format!("update requires field {}", descriptor.id_property()),
            )
        })?;

        let snapshot = self.memory_set.lock().get_by_id(&id).map(|o| o.snapshot());
        if snapshot.is_some() {
            let outcome = self.memory_set.lock().merge_into(&id, &values)?;
            self.fire_updated(outcome.object, false).await;
        }

        match self.transport.update_object(self.name(), values).await {
            Ok(record) => Ok(self.merge_answer(record).await),
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    debug!(
                        session = %self.label,
                        cache = self.name(),
                        id = %id,
                        "rolling back update"
                    );
                    let restored = self.memory_set.lock().restore(snapshot);
                    match restored {
                        Ok(Some(object)) => self.fire_updated(object, false).await,
                        Ok(None) => {}
                        Err(restore_err) => {
                            warn!(cache = self.name(), error = %restore_err, "rollback failed");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn delete_object(&self, target: IdOrRecord) -> CacheResult<u64> {
        let removed = self
            .cache
            .descriptor()
            .target_id(&target)
            .and_then(|id| self.memory_set.lock().remove(&id));
        if let Some(removed) = &removed {
            self.cache
                .fire(CacheEvent::Removed {
                    cache: self.name().to_string(),
                    object: removed.object.clone(),
                })
                .await;
        }

        match self.transport.delete_object(self.name(), target).await {
            Ok(affected) => Ok(affected),
            Err(err) => {
                if let Some(removed) = removed {
                    debug!(
                        session = %self.label,
                        cache = self.name(),
                        id = %removed.id,
                        "rolling back delete"
                    );
                    let reinserted = self.memory_set.lock().reinsert(removed);
                    match reinserted {
                        Ok(outcome) => self.fire_updated(outcome.object, outcome.inserted).await,
                        Err(reinsert_err) => {
                            warn!(cache = self.name(), error = %reinsert_err, "rollback failed");
                        }
                    }
                }
                Err(err)
            }
        }
    }
}

/// The session side of every cache, talking to one authority.
pub struct SessionEndpoint {
    config: SessionConfig,
    registry: CacheRegistry,
    transport: Arc<dyn CacheTransport>,
    caches: RwLock<HashMap<String, Arc<SessionCache>>>,
}

impl SessionEndpoint {
    /// Creates a session and installs every descriptor not marked
    /// `manual_init`.
    pub fn new<I>(
        config: SessionConfig,
        transport: Arc<dyn CacheTransport>,
        descriptors: I,
    ) -> CacheResult<Self>
    where
        I: IntoIterator<Item = CacheDescriptor>,
    {
        let session = Self {
            registry: CacheRegistry::new(config.cache.clone()),
            config,
            transport,
            caches: RwLock::new(HashMap::new()),
        };
        for descriptor in descriptors {
            if descriptor.is_manual_init() {
                debug!(
                    session = %session.config.label,
                    cache = descriptor.name(),
                    "skipping manual cache"
                );
                continue;
            }
            session.install(descriptor)?;
        }
        Ok(session)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's MemorySets.
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Installs a cache. Reinstalling keeps the existing MemorySet and every
    /// event subscriber.
    pub fn install(&self, descriptor: CacheDescriptor) -> CacheResult<Arc<SessionCache>> {
        let descriptor = Arc::new(descriptor);
        let memory_set = self.registry.memory_set(&descriptor)?;
        let shared = Some(Arc::clone(&memory_set));
        let previous = self.caches.read().get(descriptor.name()).cloned();
        let cache = match previous {
            Some(previous) => previous.cache.redeclare(Arc::clone(&descriptor), shared),
            None => Cache::new(Arc::clone(&descriptor), shared),
        };
        let entry = Arc::new(SessionCache {
            cache,
            memory_set,
            transport: Arc::clone(&self.transport),
            label: self.config.label.clone(),
        });
        self.caches
            .write()
            .insert(descriptor.name().to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Installed cache by name.
    pub fn cache(&self, name: &str) -> CacheResult<Arc<SessionCache>> {
        self.caches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Names of every installed cache, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forgets every cache and drops the session's MemorySets.
    pub fn teardown(&self) {
        self.caches.write().clear();
        self.registry.teardown();
    }

    fn routed(&self, cache: &str) -> Option<Arc<SessionCache>> {
        let found = self.caches.read().get(cache).cloned();
        if found.is_none() {
            warn!(session = %self.config.label, cache, "push for unknown cache ignored");
        }
        found
    }
}

impl std::fmt::Debug for SessionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEndpoint")
            .field("config", &self.config)
            .field("caches", &self.cache_names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PushSink for SessionEndpoint {
    async fn apply_changes(&self, cache: &str, records: Vec<Record>) {
        if let Some(entry) = self.routed(cache) {
            debug!(session = %self.config.label, cache, records = records.len(), "push received");
            entry.cache.apply_changes(records, None).await;
        }
    }

    async fn remove_from_cache(&self, cache: &str, id: Value) {
        if let Some(entry) = self.routed(cache) {
            entry.cache.remove_from_cache(&IdOrRecord::Id(id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCall, MockTransport};
    use objcache_core::{ErrorKind, EventKind, IndexDefinition};
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    fn users() -> CacheDescriptor {
        CacheDescriptor::new("users").with_index(IndexDefinition::new("name", ["name"]).unique())
    }

    fn session(transport: &Arc<MockTransport>) -> SessionEndpoint {
        let transport: Arc<dyn CacheTransport> = transport.clone();
        SessionEndpoint::new(SessionConfig::new("test"), transport, [users()]).unwrap()
    }

    fn record(id: i64, name: &str) -> Record {
        Record::new().with("id", id).with("name", name)
    }

    async fn seed(users: &SessionCache, records: Vec<Record>) {
        users.apply_changes(records, None).await;
    }

    fn record_kinds(users: &SessionCache) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Updated,
            EventKind::Removed,
            EventKind::Error,
            EventKind::SendingReadQueryToHost,
        ] {
            let seen = Arc::clone(&seen);
            users.events().subscribe_fn(kind, move |event| {
                seen.lock().push(event.kind());
                Ok(())
            });
        }
        seen
    }

    #[tokio::test]
    async fn manual_caches_are_not_installed() {
        let transport: Arc<dyn CacheTransport> = Arc::new(MockTransport::new());
        let session = SessionEndpoint::new(
            SessionConfig::default(),
            transport,
            [users(), CacheDescriptor::new("audit").with_manual_init(true)],
        )
        .unwrap();
        assert_eq!(session.cache_names(), vec!["users".to_string()]);
        assert!(matches!(session.cache("audit"), Err(CacheError::UnknownCache(_))));
        session.install(CacheDescriptor::new("audit")).unwrap();
        assert!(session.cache("audit").is_ok());
    }

    #[tokio::test]
    async fn reinstall_keeps_listeners_and_objects() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let before = session.cache("users").unwrap();
        let seen = record_kinds(&before);
        seed(&before, vec![record(1, "A").with("team", "red")]).await;

        let after = session
            .install(users().with_index(IndexDefinition::new("team", ["team"])))
            .unwrap();
        let reds = after.cache().index_lookup("team", &[Value::from("red")]).unwrap();
        assert_eq!(reds.len(), 1);

        seed(&after, vec![record(2, "B")]).await;
        assert_eq!(*seen.lock(), vec![EventKind::Updated, EventKind::Updated]);
    }

    #[tokio::test]
    async fn reads_merge_and_announce() {
        let transport = Arc::new(MockTransport::new());
        transport.set_objects_response(vec![record(1, "A"), record(2, "B")]);
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        let seen = record_kinds(&users);

        let objects = users.read_objects(QueryInput::All).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert!(users.get_object_now(&Value::Integer(2)).unwrap().same_object(&objects[1]));
        assert_eq!(
            *seen.lock(),
            vec![EventKind::SendingReadQueryToHost, EventKind::Updated]
        );
    }

    #[tokio::test]
    async fn read_failures_are_absorbed() {
        let transport = Arc::new(MockTransport::new());
        transport.reject_next(ErrorKind::AccessDenied, "nope");
        transport.reject_next(ErrorKind::Store, "down");
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        let seen = record_kinds(&users);

        assert!(users.read_objects(QueryInput::All).await.unwrap().is_empty());
        assert!(users
            .read_object(QueryInput::Id(Value::Integer(1)), false)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::SendingReadQueryToHost,
                EventKind::Error,
                EventKind::SendingReadQueryToHost,
                EventKind::Error,
            ]
        );
    }

    #[tokio::test]
    async fn create_failure_inserts_nothing() {
        let transport = Arc::new(MockTransport::new());
        transport.reject_next(ErrorKind::InvalidRequest, "bad");
        let session = session(&transport);
        let users = session.cache("users").unwrap();

        let err = users.create_object(Record::new().with("name", "A")).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest { .. }));
        assert!(users.memory_set().lock().is_empty());

        transport.set_object_response(Some(record(7, "A")));
        let created = users.create_object(Record::new().with("name", "A")).await.unwrap();
        assert!(users.get_object_now(&Value::Integer(7)).unwrap().same_object(&created));
    }

    #[tokio::test]
    async fn update_requires_identity() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        let err = users.update_object(Record::new().with("name", "A")).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_update_restores_snapshot() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        seed(&users, vec![record(2, "A").with("score", 1)]).await;
        let before = users.get_object_now(&Value::Integer(2)).unwrap();
        let snapshot = before.snapshot();

        transport.reject_next(ErrorKind::AccessDenied, "read only");
        let err = users
            .update_object(Record::new().with("id", 2).with("score", 5).with("name", "Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AccessDenied { .. }));

        let after = users.get_object_now(&Value::Integer(2)).unwrap();
        assert!(after.same_object(&before));
        assert_eq!(after.snapshot(), snapshot);
        let set = users.memory_set().lock();
        assert!(set.index_lookup("name", &[Value::from("A")]).unwrap()[0].same_object(&before));
        assert!(set.index_lookup("name", &[Value::from("Z")]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_removes_fields_added_optimistically() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        seed(&users, vec![record(2, "A")]).await;

        transport.reject_next(ErrorKind::Store, "down");
        users
            .update_object(Record::new().with("id", 2).with("nickname", "aa"))
            .await
            .unwrap_err();
        let after = users.get_object_now(&Value::Integer(2)).unwrap();
        assert!(!after.read().contains("nickname"));
    }

    #[tokio::test]
    async fn update_is_visible_before_the_answer() {
        let transport = Arc::new(MockTransport::new());
        let gate = Arc::new(Notify::new());
        transport.hold_responses(Arc::clone(&gate));
        transport.set_object_response(Some(record(3, "B").with("updatedAt", 10)));
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        seed(&users, vec![record(3, "A")]).await;

        let pending = {
            let users = Arc::clone(&users);
            tokio::spawn(async move { users.update_object(record(3, "B")).await })
        };
        while transport.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            users.get_object_now(&Value::Integer(3)).unwrap().get("name"),
            Some(Value::from("B"))
        );
        gate.notify_one();
        let object = pending.await.unwrap().unwrap();
        assert!(object.get("updatedAt").and_then(|v| v.as_timestamp()).is_some());
    }

    #[tokio::test]
    async fn update_of_uncached_record_merges_the_answer() {
        let transport = Arc::new(MockTransport::new());
        transport.set_object_response(Some(record(4, "D")));
        let session = session(&transport);
        let users = session.cache("users").unwrap();

        let object = users.update_object(record(4, "D")).await.unwrap();
        assert!(users.get_object_now(&Value::Integer(4)).unwrap().same_object(&object));
    }

    #[tokio::test]
    async fn rejected_delete_reinserts_at_same_position() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        seed(&users, vec![record(1, "A"), record(2, "B"), record(3, "C")]).await;
        let middle = users.get_object_now(&Value::Integer(2)).unwrap();
        let seen = record_kinds(&users);

        transport.reject_next(ErrorKind::AccessDenied, "no");
        let err = users.delete_object(IdOrRecord::from(2)).await.unwrap_err();
        assert!(matches!(err, CacheError::AccessDenied { .. }));

        let set = users.memory_set().lock();
        assert!(set.list()[1].same_object(&middle));
        assert!(set.index_lookup("name", &[Value::from("B")]).unwrap()[0].same_object(&middle));
        assert_eq!(*seen.lock(), vec![EventKind::Removed, EventKind::Updated]);
    }

    #[tokio::test]
    async fn accepted_delete_stays_removed() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        let users = session.cache("users").unwrap();
        seed(&users, vec![record(1, "A")]).await;

        assert_eq!(users.delete_object(IdOrRecord::from(1)).await.unwrap(), 1);
        assert!(users.get_object_now(&Value::Integer(1)).is_none());
        assert!(matches!(
            &transport.calls()[0],
            MockCall::DeleteObject { cache, .. } if cache == "users"
        ));
    }

    #[tokio::test]
    async fn pushes_route_by_cache_name() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        session.apply_changes("users", vec![record(1, "A")]).await;
        session.apply_changes("orders", vec![record(1, "X")]).await;
        let users = session.cache("users").unwrap();
        assert_eq!(users.memory_set().lock().len(), 1);

        session.remove_from_cache("users", Value::Integer(1)).await;
        assert!(users.get_object_now(&Value::Integer(1)).is_none());
    }

    #[tokio::test]
    async fn teardown_drops_everything() {
        let transport = Arc::new(MockTransport::new());
        let session = session(&transport);
        session.teardown();
        assert!(session.cache_names().is_empty());
        assert!(session.registry().names().is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_rejected_update_is_undone(
                score in 0i64..100,
                patch_score in 0i64..100,
                extra in proptest::option::of("[a-z]{1,6}"),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let transport = Arc::new(MockTransport::new());
                    let session = session(&transport);
                    let users = session.cache("users").unwrap();
                    seed(&users, vec![record(9, "N").with("score", score)]).await;
                    let snapshot = users.get_object_now(&Value::Integer(9)).unwrap().snapshot();

                    let mut patch = Record::new().with("id", 9).with("score", patch_score);
                    if let Some(extra) = extra {
                        patch.set("extra", extra);
                    }
                    transport.reject_next(ErrorKind::AccessDenied, "no");
                    prop_assert!(users.update_object(patch).await.is_err());
                    prop_assert_eq!(
                        users.get_object_now(&Value::Integer(9)).unwrap().snapshot(),
                        snapshot
                    );
                    Ok(())
                })?;
            }
        }
    }
}
