//! In-process transport that drives an [`Authority`] through the wire codec.

use crate::authority::Authority;
use async_trait::async_trait;
use objcache_core::{CacheError, CacheResult, IdOrRecord, QueryInput, Record};
use objcache_protocol::{
    CacheMessage, CacheTransport, CreateObjectRequest, DeleteObjectRequest, DeleteResponse,
    ObjectResponse, ObjectsResponse, ReadObjectRequest, ReadObjectsRequest, SessionId,
    UpdateObjectRequest,
};
use std::sync::Arc;
use tracing::trace;

/// A [`CacheTransport`] that encodes every request, hands the bytes to an
/// authority in the same process and decodes the answer.
///
/// Useful for tests and single-process deployments; the wire format is
/// exercised exactly as a network transport would.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    authority: Arc<Authority>,
    session: SessionId,
}

impl LoopbackTransport {
    /// Binds a transport to a registered session.
    pub fn new(authority: Arc<Authority>, session: SessionId) -> Self {
        Self { authority, session }
    }

    /// Session this transport speaks for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    async fn round_trip(&self, request: CacheMessage) -> CacheResult<CacheMessage> {
        let bytes = request.encode();
        trace!(
            session = %self.session,
            kind = request.type_code(),
            len = bytes.len(),
            "sending request"
        );
        let response = self.authority.handle_bytes(self.session, &bytes).await;
        match CacheMessage::decode(&response)? {
            CacheMessage::Error(err) => Err(err.into_error()),
            other => Ok(other),
        }
    }
}

fn unexpected(expected: &str, got: &CacheMessage) -> CacheError {
    CacheError::Transport(format!(
        "expected {expected} response, got message type {}",
        got.type_code()
    ))
}

#[async_trait]
impl CacheTransport for LoopbackTransport {
    async fn read_object(
        &self,
        cache: &str,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<Record>> {
        let request = CacheMessage::ReadObject(ReadObjectRequest {
            cache: cache.to_string(),
            input,
            allow_absent,
        });
        match self.round_trip(request).await? {
            CacheMessage::Object(ObjectResponse { record, .. }) => Ok(record),
            other => Err(unexpected("object", &other)),
        }
    }

    async fn read_objects(&self, cache: &str, input: QueryInput) -> CacheResult<Vec<Record>> {
        let request = CacheMessage::ReadObjects(ReadObjectsRequest {
            cache: cache.to_string(),
            input,
        });
        match self.round_trip(request).await? {
            CacheMessage::Objects(ObjectsResponse { records, .. }) => Ok(records),
            other => Err(unexpected("objects", &other)),
        }
    }

    async fn create_object(&self, cache: &str, values: Record) -> CacheResult<Record> {
        let request = CacheMessage::CreateObject(CreateObjectRequest {
            cache: cache.to_string(),
            values,
        });
        match self.round_trip(request).await? {
            CacheMessage::Object(ObjectResponse { record: Some(record), .. }) => Ok(record),
            other => Err(unexpected("object", &other)),
        }
    }

    async fn update_object(&self, cache: &str, values: Record) -> CacheResult<Record> {
        let request = CacheMessage::UpdateObject(UpdateObjectRequest {
            cache: cache.to_string(),
            values,
        });
        match self.round_trip(request).await? {
            CacheMessage::Object(ObjectResponse { record: Some(record), .. }) => Ok(record),
            other => Err(unexpected("object", &other)),
        }
    }

    async fn delete_object(&self, cache: &str, target: IdOrRecord) -> CacheResult<u64> {
        let request = CacheMessage::DeleteObject(DeleteObjectRequest {
            cache: cache.to_string(),
            target,
        });
        match self.round_trip(request).await? {
            CacheMessage::Deleted(DeleteResponse { affected, .. }) => Ok(affected),
            other => Err(unexpected("deleted", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorityConfig;
    use crate::memory_store::MemoryStore;
    use crate::policy::{AllowAll, Operation, Principal, RoleTable};
    use objcache_codec::Value;
    use objcache_core::CacheDescriptor;

    fn setup(
        access: Arc<dyn crate::policy::AccessPolicy>,
        principal: Principal,
    ) -> LoopbackTransport {
        let descriptor = CacheDescriptor::new("users").with_host_memory_set(true);
        let store = Arc::new(MemoryStore::new());
        store.define_table(&descriptor);
        let authority = Arc::new(Authority::new(AuthorityConfig::default(), store, access));
        authority.install(descriptor).unwrap();
        let session = authority.register_session(principal, None);
        LoopbackTransport::new(authority, session)
    }

    #[tokio::test]
    async fn full_round_trip() {
        let transport = setup(Arc::new(AllowAll), Principal::new("ann"));
        let created = transport
            .create_object("users", Record::new().with("name", "A"))
            .await
            .unwrap();
        let id = created.get("id").cloned().unwrap();
        assert!(created.get("updatedAt").and_then(Value::as_timestamp).is_some());

        let read = transport
            .read_object("users", QueryInput::Id(id.clone()), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.get("name"), Some(&Value::from("A")));

        let updated = transport
            .update_object("users", Record::new().with("id", id.clone()).with("name", "B"))
            .await
            .unwrap();
        assert_eq!(updated.get("name"), Some(&Value::from("B")));

        let all = transport
            .read_objects("users", QueryInput::filter([("name", "B")]))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        assert_eq!(transport.delete_object("users", IdOrRecord::Id(id.clone())).await.unwrap(), 1);
        assert!(transport
            .read_object("users", QueryInput::Id(id), true)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rejections_keep_their_kind() {
        let roles = RoleTable::new().grant("reader", "users", [Operation::Read]);
        let transport = setup(Arc::new(roles), Principal::new("ann").with_role("reader"));

        let err = transport
            .create_object("users", Record::new().with("name", "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AccessDenied { ref cache, .. } if cache == "users"));

        let err = transport
            .read_object("users", QueryInput::Id(Value::Integer(5)), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));

        let err = transport
            .read_objects("orders", QueryInput::Id(Value::Integer(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Transport(ref m) if m.contains("orders")));
    }
}
