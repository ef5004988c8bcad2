//! Cache lifecycle events and their subscribers.

use crate::error::{CacheError, CacheResult};
use crate::query::QueryInput;
use crate::record::{CachedObject, Record};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Event discriminant, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A raw record became a cached instance.
    Wrapped,
    /// A merge staged its changes; indices are not touched yet.
    Updating,
    /// A merge committed.
    Updated,
    /// An object left the cache.
    Removed,
    /// A session-side read failed and was absorbed.
    Error,
    /// A session is about to ask the authority for data.
    SendingReadQueryToHost,
}

impl EventKind {
    /// Event name as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Wrapped => "wrapped",
            EventKind::Updating => "updating",
            EventKind::Updated => "updated",
            EventKind::Removed => "removed",
            EventKind::Error => "error",
            EventKind::SendingReadQueryToHost => "sendingReadQueryToHost",
        }
    }
}

/// One record staged by a merge.
#[derive(Debug, Clone)]
pub enum StagedChange {
    /// First seen; already wrapped into a fresh object.
    New(CachedObject),
    /// Cached; `incoming` will be merged into `existing`.
    Update {
        /// Cached object that will absorb the fields.
        existing: CachedObject,
        /// Raw incoming fields.
        incoming: Record,
    },
}

/// A cache lifecycle event.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// See [`EventKind::Wrapped`].
    Wrapped {
        /// Cache name.
        cache: String,
        /// The new instance.
        object: CachedObject,
    },
    /// See [`EventKind::Updating`].
    Updating {
        /// Cache name.
        cache: String,
        /// Staged changes in input order.
        staged: Vec<StagedChange>,
    },
    /// See [`EventKind::Updated`].
    Updated {
        /// Cache name.
        cache: String,
        /// One object per merged record, in input order.
        objects: Vec<CachedObject>,
        /// Objects that were not cached before this merge.
        added: Vec<CachedObject>,
    },
    /// See [`EventKind::Removed`].
    Removed {
        /// Cache name.
        cache: String,
        /// The removed object.
        object: CachedObject,
    },
    /// See [`EventKind::Error`].
    Error {
        /// Cache name.
        cache: String,
        /// The absorbed failure.
        error: Arc<CacheError>,
    },
    /// See [`EventKind::SendingReadQueryToHost`].
    SendingReadQueryToHost {
        /// Cache name.
        cache: String,
        /// Query about to be sent.
        input: QueryInput,
    },
}

impl CacheEvent {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Wrapped { .. } => EventKind::Wrapped,
            CacheEvent::Updating { .. } => EventKind::Updating,
            CacheEvent::Updated { .. } => EventKind::Updated,
            CacheEvent::Removed { .. } => EventKind::Removed,
            CacheEvent::Error { .. } => EventKind::Error,
            CacheEvent::SendingReadQueryToHost { .. } => EventKind::SendingReadQueryToHost,
        }
    }

    /// Cache the event belongs to.
    pub fn cache(&self) -> &str {
        match self {
            CacheEvent::Wrapped { cache, .. }
            | CacheEvent::Updating { cache, .. }
            | CacheEvent::Updated { cache, .. }
            | CacheEvent::Removed { cache, .. }
            | CacheEvent::Error { cache, .. }
            | CacheEvent::SendingReadQueryToHost { cache, .. } => cache,
        }
    }
}

/// Receives cache events.
#[async_trait]
pub trait CacheListener: Send + Sync {
    /// Handles one event. An error is reported but never undoes the
    /// operation that fired the event.
    async fn on_event(&self, event: &CacheEvent) -> Result<(), String>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F> CacheListener for FnListener<F>
where
    F: Fn(&CacheEvent) -> Result<(), String> + Send + Sync,
{
    async fn on_event(&self, event: &CacheEvent) -> Result<(), String> {
        (self.0)(event)
    }
}

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Subscription {
    id: ListenerId,
    kind: Option<EventKind>,
    listener: Arc<dyn CacheListener>,
}

/// Subscriber list for one cache.
///
/// Every listener interested in an event is invoked and all of them are
/// awaited together; failures are collected into a single
/// [`CacheError::Listeners`].
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventHub {
    /// Creates a hub with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every event.
    pub fn subscribe(&self, listener: Arc<dyn CacheListener>) -> ListenerId {
        self.add(None, listener)
    }

    /// Subscribes to one kind of event.
    pub fn subscribe_to(&self, kind: EventKind, listener: Arc<dyn CacheListener>) -> ListenerId {
        self.add(Some(kind), listener)
    }

    /// Subscribes a synchronous closure to one kind of event.
    pub fn subscribe_fn<F>(&self, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(&CacheEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(FnListener(f)))
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of subscriptions.
    pub fn listener_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Delivers an event to every interested listener and waits for all.
    pub async fn emit(&self, event: &CacheEvent) -> CacheResult<()> {
        let kind = event.kind();
        let listeners: Vec<Arc<dyn CacheListener>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| Arc::clone(&s.listener))
            .collect();
        if listeners.is_empty() {
            return Ok(());
        }

        let results = join_all(listeners.iter().map(|l| l.on_event(event))).await;
        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }
        warn!(
            cache = event.cache(),
            event = kind.as_str(),
            failed = failures.len(),
            "event listeners failed"
        );
        Err(CacheError::Listeners {
            event: kind.as_str(),
            failures,
        })
    }

    fn add(&self, kind: Option<EventKind>, listener: Arc<dyn CacheListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription { id, kind, listener });
        id
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn removed_event() -> CacheEvent {
        CacheEvent::Removed {
            cache: "users".into(),
            object: CachedObject::new(Record::new().with("id", 1)),
        }
    }

    #[tokio::test]
    async fn every_matching_listener_runs() {
        let hub = EventHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for kind in [EventKind::Removed, EventKind::Removed, EventKind::Updated] {
            let hits = Arc::clone(&hits);
            hub.subscribe_fn(kind, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        hub.emit(&removed_event()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_aggregated() {
        let hub = EventHub::new();
        let ran = Arc::new(AtomicUsize::new(0));
        hub.subscribe_fn(EventKind::Removed, |_| Err("first".into()));
        let counter = Arc::clone(&ran);
        hub.subscribe_fn(EventKind::Removed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hub.subscribe_fn(EventKind::Removed, |_| Err("second".into()));

        let err = hub.emit(&removed_event()).await.unwrap_err();
        match err {
            CacheError::Listeners { event, failures } => {
                assert_eq!(event, "removed");
                assert_eq!(failures, vec!["first".to_string(), "second".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = EventHub::new();
        let id = hub.subscribe_fn(EventKind::Removed, |_| Err("boom".into()));
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert!(hub.emit(&removed_event()).await.is_ok());
        assert_eq!(hub.listener_count(), 0);
    }
}
