//! Sessions connected to the authority.

use crate::policy::Principal;
use objcache_codec::Value;
use objcache_core::Record;
use objcache_protocol::{PushSink, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct SessionEntry {
    principal: Principal,
    sink: Option<Weak<dyn PushSink>>,
}

/// Registered sessions, their principals and push sinks.
///
/// Sinks are held weakly, so a session that goes away without calling
/// [`SessionTable::end`] simply stops receiving pushes.
#[derive(Default)]
pub struct SessionTable {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session.
    pub fn register(&self, principal: Principal) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(session = %id, principal = %principal, "session registered");
        self.sessions
            .write()
            .insert(id, SessionEntry { principal, sink: None });
        id
    }

    /// Routes pushes for a session to `sink`.
    pub fn attach_sink(&self, id: SessionId, sink: &Arc<dyn PushSink>) -> bool {
        match self.sessions.write().get_mut(&id) {
            Some(entry) => {
                entry.sink = Some(Arc::downgrade(sink));
                true
            }
            None => false,
        }
    }

    /// Removes a session.
    pub fn end(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            debug!(session = %id, "session ended");
        }
        removed
    }

    /// Principal a session registered with.
    pub fn principal(&self, id: SessionId) -> Option<Principal> {
        self.sessions.read().get(&id).map(|e| e.principal.clone())
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn sink(&self, id: SessionId) -> Option<Arc<dyn PushSink>> {
        self.sessions
            .read()
            .get(&id)
            .and_then(|e| e.sink.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Pushes records to one session, if it has a live sink.
    pub async fn push_apply(&self, id: SessionId, cache: &str, records: Vec<Record>) {
        if let Some(sink) = self.sink(id) {
            debug!(session = %id, cache, count = records.len(), "pushing applyChanges");
            sink.apply_changes(cache, records).await;
        }
    }

    /// Pushes a removal to one session, if it has a live sink.
    pub async fn push_remove(&self, id: SessionId, cache: &str, object_id: Value) {
        if let Some(sink) = self.sink(id) {
            debug!(session = %id, cache, id = %object_id, "pushing removeFromCache");
            sink.remove_from_cache(cache, object_id).await;
        }
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("sessions", &self.len())
            .finish()
    }
}
