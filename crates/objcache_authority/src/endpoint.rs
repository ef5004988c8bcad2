//! Authority-side cache endpoint.
//!
//! Each operation runs in three phases: compile the input through the
//! cache's policy (no I/O), talk to the backing store, then fold the result
//! into the shared MemorySet and push it to the requesting session.

use crate::config::AuthorityConfig;
use crate::policy::{AccessPolicy, CachePolicy, CompiledUpdate, PolicyContext, Principal};
use crate::sessions::SessionTable;
use crate::store::BackingStore;
use async_trait::async_trait;
use objcache_core::{
    Cache, CacheEndpoint, CacheError, CacheResult, CachedObject, IdOrRecord, QueryDescriptor,
    QueryInput, Record,
};
use objcache_protocol::SessionId;
use std::sync::Arc;
use tracing::debug;

/// Who is asking, and from which session.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller identity.
    pub principal: Principal,
    /// Originating session; pushes go nowhere without one.
    pub session: Option<SessionId>,
}

impl RequestContext {
    /// A request made in-process, outside any session.
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            session: None,
        }
    }

    /// Attributes the request to a session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// One installed cache on the authority.
pub struct AuthorityCache {
    pub(crate) cache: Cache,
    pub(crate) policy: Arc<dyn CachePolicy>,
}

impl AuthorityCache {
    /// Shared cache state.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

impl std::fmt::Debug for AuthorityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityCache")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// A cache endpoint bound to one request context.
pub struct AuthorityEndpoint {
    pub(crate) entry: Arc<AuthorityCache>,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) access: Arc<dyn AccessPolicy>,
    pub(crate) sessions: Arc<SessionTable>,
    pub(crate) config: AuthorityConfig,
    pub(crate) context: RequestContext,
}

impl AuthorityEndpoint {
    fn policy_context(&self) -> PolicyContext<'_> {
        PolicyContext {
            principal: &self.context.principal,
            descriptor: self.entry.cache.descriptor(),
            access: self.access.as_ref(),
        }
    }

    fn store_error(&self, err: impl std::fmt::Display) -> CacheError {
        CacheError::store(self.name(), err)
    }

    fn visible(&self, records: Vec<Record>) -> Vec<Record> {
        let ctx = self.policy_context();
        records
            .into_iter()
            .filter(|r| self.entry.policy.filter_read_result(&ctx, r))
            .collect()
    }

    fn check_row_limit(&self, rows: usize) -> CacheResult<()> {
        if rows > self.config.max_rows_per_read {
            return Err(CacheError::invalid_request(
                self.name(),
                format!(
                    "query matched {rows} rows, limit is {}",
                    self.config.max_rows_per_read
                ),
            ));
        }
        Ok(())
    }

    async fn push_apply(&self, records: Vec<Record>, enabled: bool) {
        match self.context.session {
            Some(session) if enabled => {
                self.sessions.push_apply(session, self.name(), records).await;
            }
            _ => {}
        }
    }

    async fn first_object(&self, record: Record) -> CachedObject {
        let mut objects = self.cache().apply_changes(vec![record.clone()], None).await;
        match objects.pop() {
            Some(object) => object,
            None => self.cache().wrap_object(record).await,
        }
    }
}

#[async_trait]
impl CacheEndpoint for AuthorityEndpoint {
    fn cache(&self) -> &Cache {
        &self.entry.cache
    }

    async fn read_object(
        &self,
        input: QueryInput,
        allow_absent: bool,
    ) -> CacheResult<Option<CachedObject>> {
        let query = self
            .entry
            .policy
            .compile_read_object_query(&self.policy_context(), &input)?;
        let row = self
            .store
            .find_one(self.name(), &query)
            .await
            .map_err(|e| self.store_error(e))?;
        let row = row.and_then(|r| self.visible(vec![r]).pop());

        let Some(record) = row else {
            return if allow_absent {
                Ok(None)
            } else {
                Err(CacheError::not_found(self.name()))
            };
        };
        let object = self.first_object(record.clone()).await;
        self.push_apply(vec![record], self.config.push_reads).await;
        Ok(Some(object))
    }

    async fn read_objects(&self, input: QueryInput) -> CacheResult<Vec<CachedObject>> {
        let query = self
            .entry
            .policy
            .compile_read_objects_query(&self.policy_context(), &input)?;

        if self.cache().memory_set().is_none() {
            let rows = self
                .store
                .find_all(self.name(), &query)
                .await
                .map_err(|e| self.store_error(e))?;
            self.check_row_limit(rows.len())?;
            let rows = self.visible(rows);
            let objects = self.cache().apply_changes(rows.clone(), None).await;
            self.push_apply(rows, self.config.push_reads).await;
            return Ok(objects);
        }

        let shape = query.shape_key();
        let since = self.cache().last_updated_at(&shape);
        let narrowed = QueryDescriptor::new(query.selector.clone()).updated_after(since);
        let rows = self
            .store
            .find_all(self.name(), &narrowed)
            .await
            .map_err(|e| self.store_error(e))?;
        self.check_row_limit(rows.len())?;
        let shape_hex = shape.to_hex();
        debug!(
            cache = self.name(),
            shape = &shape_hex[..12],
            incremental = since.is_some(),
            fetched = rows.len(),
            "read objects"
        );
        // Memo entries are per shape, not per caller: the whole delta goes
        // into the shared set and visibility filters only the answer.
        self.cache().apply_changes(rows.clone(), Some(&shape)).await;

        let ctx = self.policy_context();
        let answer: Vec<CachedObject> = self
            .cache()
            .get_objects_now(&QueryInput::Filter(query.selector.fields().clone()))
            .into_iter()
            .filter(|object| self.entry.policy.filter_read_result(&ctx, &object.read()))
            .collect();
        self.check_row_limit(answer.len())?;
        self.push_apply(self.visible(rows), self.config.push_reads).await;
        Ok(answer)
    }

    async fn create_object(&self, values: Record) -> CacheResult<CachedObject> {
        let values = self
            .entry
            .policy
            .compile_create_object(&self.policy_context(), values)?;
        let record = self
            .store
            .create(self.name(), values)
            .await
            .map_err(|e| self.store_error(e))?;
        debug!(cache = self.name(), "created object");
        let object = self.first_object(record.clone()).await;
        self.push_apply(vec![record], self.config.push_mutations).await;
        Ok(object)
    }

    async fn update_object(&self, values: Record) -> CacheResult<CachedObject> {
        let CompiledUpdate { values, selector } = self
            .entry
            .policy
            .compile_update_object(&self.policy_context(), values)?;
        let affected = self
            .store
            .update(self.name(), values, &selector)
            .await
            .map_err(|e| self.store_error(e))?;
        if affected == 0 {
            return Err(CacheError::not_found(self.name()));
        }
        let record = self
            .store
            .find_one(self.name(), &QueryDescriptor::new(selector))
            .await
            .map_err(|e| self.store_error(e))?
            .ok_or_else(|| CacheError::not_found(self.name()))?;
        debug!(cache = self.name(), affected, "updated object");
        let object = self.first_object(record.clone()).await;
        self.push_apply(vec![record], self.config.push_mutations).await;
        Ok(object)
    }

    async fn delete_object(&self, target: IdOrRecord) -> CacheResult<u64> {
        let selector = self
            .entry
            .policy
            .compile_delete_object(&self.policy_context(), &target)?;
        let affected = self
            .store
            .destroy(self.name(), &selector)
            .await
            .map_err(|e| self.store_error(e))?;
        debug!(cache = self.name(), affected, "deleted object");

        if let Some(id) = self.cache().descriptor().target_id(&target) {
            self.cache().remove_from_cache(&IdOrRecord::Id(id.clone())).await;
            match self.context.session {
                Some(session) if self.config.push_mutations && affected > 0 => {
                    self.sessions.push_remove(session, self.name(), id).await;
                }
                _ => {}
            }
        }
        Ok(affected)
    }
}
