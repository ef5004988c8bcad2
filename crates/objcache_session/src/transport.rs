//! Scripted transport for exercising a session without an authority.

use async_trait::async_trait;
use objcache_core::{CacheError, CacheResult, ErrorKind, IdOrRecord, QueryInput, Record};
use objcache_protocol::CacheTransport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A request the mock transport received.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `read_object`.
    ReadObject {
        /// Cache name.
        cache: String,
        /// Query input.
        input: QueryInput,
        /// Whether absence was allowed.
        allow_absent: bool,
    },
    /// `read_objects`.
    ReadObjects {
        /// Cache name.
        cache: String,
        /// Query input.
        input: QueryInput,
    },
    /// `create_object`.
    CreateObject {
        /// Cache name.
        cache: String,
        /// Sent values.
        values: Record,
    },
    /// `update_object`.
    UpdateObject {
        /// Cache name.
        cache: String,
        /// Sent values.
        values: Record,
    },
    /// `delete_object`.
    DeleteObject {
        /// Cache name.
        cache: String,
        /// Deletion target.
        target: IdOrRecord,
    },
}

/// A mock transport for testing.
///
/// Responses are scripted per operation. A queued rejection takes
/// precedence over any scripted response and is consumed by the next call.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    object_response: Mutex<Option<Record>>,
    objects_response: Mutex<Vec<Record>>,
    deleted_response: Mutex<u64>,
    rejections: Mutex<VecDeque<(ErrorKind, String)>>,
    calls: Mutex<Vec<MockCall>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock transport with no scripted responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            object_response: Mutex::new(None),
            objects_response: Mutex::new(Vec::new()),
            deleted_response: Mutex::new(1),
            rejections: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Sets the record returned by single-object calls.
    pub fn set_object_response(&self, record: Option<Record>) {
        *self.object_response.lock() = record;
    }

    /// Sets the records returned by `read_objects`.
    pub fn set_objects_response(&self, records: Vec<Record>) {
        *self.objects_response.lock() = records;
    }

    /// Sets the affected-row count returned by `delete_object`.
    pub fn set_deleted_response(&self, affected: u64) {
        *self.deleted_response.lock() = affected;
    }

    /// Queues a rejection for the next call.
    pub fn reject_next(&self, kind: ErrorKind, message: impl Into<String>) {
        self.rejections.lock().push_back((kind, message.into()));
    }

    /// Makes every call wait for a notification before answering.
    pub fn hold_responses(&self, gate: Arc<Notify>) {
        *self.gate.lock() = Some(gate);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    async fn begin(&self, cache: &str, call: MockCall) -> CacheResult<()> {
        self.calls.lock().push(call);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("not connected".into()));
        }
        match self.rejections.lock().pop_front() {
            Some((kind, message)) => Err(CacheError::from_kind(kind, cache, message)),
            None => Ok(()),
        }
    }

    fn scripted_object(&self, cache: &str) -> CacheResult<Record> {
        self.object_response
            .lock()
            .clone()
            .ok_or_else(|| {
                CacheError::Transport(format!("no mock object response set for {cache}"))
            })
    }
}

#[async_trait]
impl CacheTransport for MockTransport {
    async fn read_object(
        &self,
        cache: &str,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<Record>> {
        let call = MockCall::ReadObject {
            cache: cache.to_string(),
            input,
            allow_absent,
        };
        self.begin(cache, call).await?;
        match self.object_response.lock().clone() {
            Some(record) => Ok(Some(record)),
            None if allow_absent => Ok(None),
            None => Err(CacheError::not_found(cache)),
        }
    }

    async fn read_objects(&self, cache: &str, input: QueryInput) -> CacheResult<Vec<Record>> {
        let call = MockCall::ReadObjects {
            cache: cache.to_string(),
            input,
        };
        self.begin(cache, call).await?;
        Ok(self.objects_response.lock().clone())
    }

    async fn create_object(&self, cache: &str, values: Record) -> CacheResult<Record> {
        let call = MockCall::CreateObject {
            cache: cache.to_string(),
            values,
        };
        self.begin(cache, call).await?;
        self.scripted_object(cache)
    }

    async fn update_object(&self, cache: &str, values: Record) -> CacheResult<Record> {
        let call = MockCall::UpdateObject {
            cache: cache.to_string(),
            values,
        };
        self.begin(cache, call).await?;
        self.scripted_object(cache)
    }

    async fn delete_object(&self, cache: &str, target: IdOrRecord) -> CacheResult<u64> {
        let call = MockCall::DeleteObject {
            cache: cache.to_string(),
            target,
        };
        self.begin(cache, call).await?;
        Ok(*self.deleted_response.lock())
    }
}
