//! An event listener that records what it sees.

use async_trait::async_trait;
use objcache_core::{CacheEvent, CacheListener, EventKind};
use parking_lot::Mutex;

/// Records every event delivered to it, optionally failing each delivery.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CacheEvent>>,
    failure: Option<String>,
}

impl RecordingListener {
    /// A listener that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener that records every event and then reports `message` as
    /// its failure.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    /// Kinds of the recorded events, oldest first.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(CacheEvent::kind).collect()
    }

    /// Number of recorded events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl CacheListener for RecordingListener {
    async fn on_event(&self, event: &CacheEvent) -> Result<(), String> {
        self.events.lock().push(event.clone());
        match &self.failure {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }
}
