//! The authority: installed caches, backing store, access policy and
//! connected sessions.

use crate::config::AuthorityConfig;
use crate::endpoint::{AuthorityCache, AuthorityEndpoint, RequestContext};
use crate::policy::{AccessPolicy, CachePolicy, DefaultPolicy, Principal};
use crate::sessions::SessionTable;
use crate::store::BackingStore;
use objcache_core::{
    Cache, CacheDescriptor, CacheEndpoint, CacheError, CacheRegistry, CacheResult,
};
use objcache_protocol::{
    CacheMessage, DeleteResponse, ErrorResponse, ObjectResponse, ObjectsResponse, PushSink,
    SessionId,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The authoritative side of every cache.
///
/// Sessions register here, then send requests through
/// [`Authority::handle_message`] (or [`Authority::handle_bytes`] for the
/// encoded form). In-process callers can also take an
/// [`AuthorityEndpoint`] directly via [`Authority::endpoint`].
pub struct Authority {
    config: AuthorityConfig,
    registry: CacheRegistry,
    store: Arc<dyn BackingStore>,
    access: Arc<dyn AccessPolicy>,
    caches: RwLock<HashMap<String, Arc<AuthorityCache>>>,
    sessions: Arc<SessionTable>,
}

impl Authority {
    /// Creates an authority with no caches installed.
    pub fn new(
        config: AuthorityConfig,
        store: Arc<dyn BackingStore>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            registry: CacheRegistry::new(config.cache.clone()),
            config,
            store,
            access,
            caches: RwLock::new(HashMap::new()),
            sessions: Arc::new(SessionTable::new()),
        }
    }

    /// Authority configuration.
    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Shared MemorySets.
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Connected sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Installs a cache with the default policy.
    pub fn install(&self, descriptor: CacheDescriptor) -> CacheResult<Arc<AuthorityCache>> {
        self.install_with_policy(descriptor, Arc::new(DefaultPolicy))
    }

    /// Installs a cache with a custom policy. Reinstalling replaces the
    /// policy and declaration but keeps the shared MemorySet and every event
    /// subscriber.
    pub fn install_with_policy(
        &self,
        descriptor: CacheDescriptor,
        policy: Arc<dyn CachePolicy>,
    ) -> CacheResult<Arc<AuthorityCache>> {
        descriptor.validate()?;
        let descriptor = Arc::new(descriptor);
        let memory_set = if descriptor.has_host_memory_set() {
            Some(self.registry.memory_set(&descriptor)?)
        } else {
            None
        };
        let previous = self.caches.read().get(descriptor.name()).cloned();
        let cache = match previous {
            Some(previous) => previous.cache.redeclare(Arc::clone(&descriptor), memory_set),
            None => Cache::new(Arc::clone(&descriptor), memory_set),
        };
        let entry = Arc::new(AuthorityCache { cache, policy });
        debug!(
            cache = descriptor.name(),
            shared = descriptor.has_host_memory_set(),
            "cache installed"
        );
        self.caches
            .write()
            .insert(descriptor.name().to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Installed cache by name.
    pub fn cache(&self, name: &str) -> CacheResult<Arc<AuthorityCache>> {
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

    /// Endpoint for one cache, acting for `context`.
    pub fn endpoint(&self, name: &str, context: RequestContext) -> CacheResult<AuthorityEndpoint> {
        Ok(AuthorityEndpoint {
            entry: self.cache(name)?,
            store: Arc::clone(&self.store),
            access: Arc::clone(&self.access),
            sessions: Arc::clone(&self.sessions),
            config: self.config.clone(),
            context,
        })
    }

    /// Registers a session, optionally with the sink its pushes go to.
    pub fn register_session(
        &self,
        principal: Principal,
        sink: Option<&Arc<dyn PushSink>>,
    ) -> SessionId {
        let id = self.sessions.register(principal);
        if let Some(sink) = sink {
            self.sessions.attach_sink(id, sink);
        }
        id
    }

    /// Routes a registered session's pushes to `sink`.
    pub fn attach_push_sink(&self, id: SessionId, sink: &Arc<dyn PushSink>) -> bool {
        self.sessions.attach_sink(id, sink)
    }

    /// Disconnects a session.
    pub fn end_session(&self, id: SessionId) -> bool {
        self.sessions.end(id)
    }

    /// Handles one request from a session and returns the response.
    pub async fn handle_message(&self, session: SessionId, message: CacheMessage) -> CacheMessage {
        let cache = message.cache().to_string();
        match self.dispatch(session, message).await {
            Ok(response) => response,
            Err(err) => {
                debug!(session = %session, cache = %cache, error = %err, "request rejected");
                CacheMessage::Error(ErrorResponse::from_error(cache, &err))
            }
        }
    }

    /// Handles one encoded request and returns the encoded response.
    pub async fn handle_bytes(&self, session: SessionId, bytes: &[u8]) -> Vec<u8> {
        let response = match CacheMessage::decode(bytes) {
            Ok(message) => self.handle_message(session, message).await,
            Err(err) => {
                warn!(session = %session, error = %err, "undecodable request");
                let err = CacheError::from(err);
                CacheMessage::Error(ErrorResponse::from_error(String::new(), &err))
            }
        };
        response.encode()
    }

    /// Clears every shared MemorySet and forgets installed caches.
    pub fn teardown(&self) {
        self.caches.write().clear();
        self.registry.teardown();
    }

    async fn dispatch(
        &self,
        session: SessionId,
        message: CacheMessage,
    ) -> CacheResult<CacheMessage> {
        let principal = self.sessions.principal(session).ok_or_else(|| {
            CacheError::access_denied(message.cache(), format!("{session} is not registered"))
        })?;
        let context = RequestContext::new(principal).with_session(session);
        let cache = message.cache().to_string();

        match message {
            CacheMessage::ReadObject(req) => {
                let endpoint = self.endpoint(&req.cache, context)?;
                let object = endpoint.read_object(req.input, req.allow_absent).await?;
                Ok(CacheMessage::Object(ObjectResponse {
                    cache,
                    record: object.map(|o| o.snapshot()),
                }))
            }
            CacheMessage::ReadObjects(req) => {
                let endpoint = self.endpoint(&req.cache, context)?;
                let objects = endpoint.read_objects(req.input).await?;
                Ok(CacheMessage::Objects(ObjectsResponse {
                    cache,
                    records: objects.iter().map(|o| o.snapshot()).collect(),
                }))
            }
            CacheMessage::CreateObject(req) => {
                let endpoint = self.endpoint(&req.cache, context)?;
                let object = endpoint.create_object(req.values).await?;
                Ok(CacheMessage::Object(ObjectResponse {
                    cache,
                    record: Some(object.snapshot()),
                }))
            }
            CacheMessage::UpdateObject(req) => {
                let endpoint = self.endpoint(&req.cache, context)?;
                let object = endpoint.update_object(req.values).await?;
                Ok(CacheMessage::Object(ObjectResponse {
                    cache,
                    record: Some(object.snapshot()),
                }))
            }
            CacheMessage::DeleteObject(req) => {
                let endpoint = self.endpoint(&req.cache, context)?;
                let affected = endpoint.delete_object(req.target).await?;
                Ok(CacheMessage::Deleted(DeleteResponse { cache, affected }))
            }
            other => Err(CacheError::invalid_request(
                cache,
                format!("unexpected message type {}", other.type_code()),
            )),
        }
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("config", &self.config)
            .field("caches", &self.cache_names())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
