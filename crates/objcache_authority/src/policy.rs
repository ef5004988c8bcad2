//! Access control and per-cache query compilation.
//!
//! Two layers decide what a request may do:
//!
//! - [`AccessPolicy`] is the opaque predicate: may this principal perform
//!   this operation on this cache at all?
//! - [`CachePolicy`] turns caller input into store queries. Every hook has
//!   a default (see [`defaults`]) that consults the access policy and
//!   validates the input; a cache overrides only the hooks it needs.

use objcache_core::{
    CacheDescriptor, CacheError, CacheResult, IdOrRecord, QueryDescriptor, QueryInput, Record,
    Selector,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Identity and roles of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Caller identity.
    pub identity: String,
    /// Granted roles.
    pub roles: BTreeSet<String>,
}

impl Principal {
    /// Creates a principal with no roles.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Returns true if the principal holds the role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// Kind of operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// `readObject` / `readObjects`.
    Read,
    /// `createObject`.
    Create,
    /// `updateObject`.
    Update,
    /// `deleteObject`.
    Delete,
}

impl Operation {
    /// All operations.
    pub const ALL: [Operation; 4] = [
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Decides whether a principal may perform an operation on a cache.
pub trait AccessPolicy: Send + Sync {
    /// Returns true if the operation is allowed.
    fn permits(&self, principal: &Principal, cache: &str, operation: Operation) -> bool;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn permits(&self, _principal: &Principal, _cache: &str, _operation: Operation) -> bool {
        true
    }
}

/// Grants operations to roles, per cache or for every cache (`"*"`).
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    grants: HashMap<String, HashMap<String, BTreeSet<Operation>>>,
}

impl RoleTable {
    /// Wildcard cache name.
    pub const ANY_CACHE: &'static str = "*";

    /// Creates a table with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants operations on a cache to a role.
    #[must_use]
    pub fn grant<I>(
        mut self,
        role: impl Into<String>,
        cache: impl Into<String>,
        operations: I,
    ) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        self.grants
            .entry(role.into())
            .or_default()
            .entry(cache.into())
            .or_default()
            .extend(operations);
        self
    }
}

impl AccessPolicy for RoleTable {
    fn permits(&self, principal: &Principal, cache: &str, operation: Operation) -> bool {
        principal.roles.iter().any(|role| {
            self.grants.get(role).is_some_and(|caches| {
                [cache, Self::ANY_CACHE]
                    .iter()
                    .filter_map(|name| caches.get(*name))
                    .any(|ops| ops.contains(&operation))
            })
        })
    }
}

/// Everything a policy hook may consult about the request.
pub struct PolicyContext<'a> {
    /// Caller.
    pub principal: &'a Principal,
    /// Cache declaration.
    pub descriptor: &'a CacheDescriptor,
    /// Access predicate.
    pub access: &'a dyn AccessPolicy,
}

impl PolicyContext<'_> {
    /// Cache name.
    pub fn cache(&self) -> &str {
        self.descriptor.name()
    }

    /// Fails with `AccessDenied` unless the access policy permits `operation`.
    pub fn require(&self, operation: Operation) -> CacheResult<()> {
        if self.access.permits(self.principal, self.cache(), operation) {
            Ok(())
        } else {
            Err(CacheError::access_denied(
                self.cache(),
                format!("{} may not {}", self.principal, operation.as_str()),
            ))
        }
    }

    /// Builds an `InvalidRequest` error for this cache.
    pub fn invalid(&self, reason: impl Into<String>) -> CacheError {
        CacheError::invalid_request(self.cache(), reason)
    }
}

/// A compiled update: fields to write and the rows to write them to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUpdate {
    /// Fields to merge into matching rows.
    pub values: Record,
    /// Rows to update.
    pub selector: Selector,
}

/// Per-cache query compilation hooks.
///
/// Hooks run before any store I/O; returning an error rejects the request.
pub trait CachePolicy: Send + Sync {
    /// Compiles a single-object read.
    fn compile_read_object_query(
        &self,
        ctx: &PolicyContext<'_>,
        input: &QueryInput,
    ) -> CacheResult<QueryDescriptor> {
        defaults::read_object_query(ctx, input)
    }

    /// Compiles a multi-object read.
    fn compile_read_objects_query(
        &self,
        ctx: &PolicyContext<'_>,
        input: &QueryInput,
    ) -> CacheResult<QueryDescriptor> {
        defaults::read_objects_query(ctx, input)
    }

    /// Compiles a create.
    fn compile_create_object(
        &self,
        ctx: &PolicyContext<'_>,
        values: Record,
    ) -> CacheResult<Record> {
        defaults::create_object(ctx, values)
    }

    /// Compiles an update.
    fn compile_update_object(
        &self,
        ctx: &PolicyContext<'_>,
        values: Record,
    ) -> CacheResult<CompiledUpdate> {
        defaults::update_object(ctx, values)
    }

    /// Compiles a delete.
    fn compile_delete_object(
        &self,
        ctx: &PolicyContext<'_>,
        target: &IdOrRecord,
    ) -> CacheResult<Selector> {
        defaults::delete_object(ctx, target)
    }

    /// Decides whether a fetched record is visible to the caller.
    fn filter_read_result(&self, _ctx: &PolicyContext<'_>, _record: &Record) -> bool {
        true
    }
}

/// The policy every cache gets unless it installs its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl CachePolicy for DefaultPolicy {}

/// Default hook implementations, callable from overriding policies.
pub mod defaults {
    use super::{CompiledUpdate, Operation, PolicyContext};
    use objcache_core::{CacheResult, IdOrRecord, QueryDescriptor, QueryInput, Record, Selector};

    /// Identity value or a filter that binds the identity field.
    pub fn read_object_query(
        ctx: &PolicyContext<'_>,
        input: &QueryInput,
    ) -> CacheResult<QueryDescriptor> {
        ctx.require(Operation::Read)?;
        let id_property = ctx.descriptor.id_property();
        let selector = match input {
            QueryInput::Id(id) if !id.is_null() => Selector::eq(id_property, id.clone()),
            QueryInput::Filter(fields) if ctx.descriptor.id_of(fields).is_some() => {
                Selector::from_record(fields.clone())
            }
            QueryInput::Filter(_) => {
                return Err(ctx.invalid(format!("single-object read must bind {id_property}")))
            }
            _ => return Err(ctx.invalid("single-object read needs an identity")),
        };
        Ok(QueryDescriptor::new(selector))
    }

    /// Identity value or a non-empty filter.
    pub fn read_objects_query(
        ctx: &PolicyContext<'_>,
        input: &QueryInput,
    ) -> CacheResult<QueryDescriptor> {
        ctx.require(Operation::Read)?;
        let selector = match input {
            QueryInput::Id(id) if !id.is_null() => {
                Selector::eq(ctx.descriptor.id_property(), id.clone())
            }
            QueryInput::Filter(fields) if !fields.is_empty() => {
                Selector::from_record(fields.clone())
            }
            _ => return Err(ctx.invalid("wildcard reads are not allowed")),
        };
        Ok(QueryDescriptor::new(selector))
    }

    /// Any non-empty set of values.
    pub fn create_object(ctx: &PolicyContext<'_>, values: Record) -> CacheResult<Record> {
        ctx.require(Operation::Create)?;
        if values.is_empty() {
            return Err(ctx.invalid("create needs at least one field"));
        }
        Ok(values)
    }

    /// Values carrying the identity field; updates that one row.
    pub fn update_object(ctx: &PolicyContext<'_>, values: Record) -> CacheResult<CompiledUpdate> {
        ctx.require(Operation::Update)?;
        let id_property = ctx.descriptor.id_property();
        let id = ctx
            .descriptor
            .id_of(&values)
            .ok_or_else(|| ctx.invalid(format!("update must carry {id_property}")))?;
        Ok(CompiledUpdate {
            selector: Selector::eq(id_property, id),
            values,
        })
    }

    /// An identity value or a record carrying one.
    pub fn delete_object(ctx: &PolicyContext<'_>, target: &IdOrRecord) -> CacheResult<Selector> {
        ctx.require(Operation::Delete)?;
        let id_property = ctx.descriptor.id_property();
        let id = ctx
            .descriptor
            .target_id(target)
            .ok_or_else(|| ctx.invalid(format!("delete must carry {id_property}")))?;
        Ok(Selector::eq(id_property, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objcache_codec::Value;

    fn with_ctx<T>(
        access: &dyn AccessPolicy,
        principal: &Principal,
        f: impl FnOnce(&PolicyContext<'_>) -> T,
    ) -> T {
        let descriptor = CacheDescriptor::new("users");
        let ctx = PolicyContext {
            principal,
            descriptor: &descriptor,
            access,
        };
        f(&ctx)
    }

    #[test]
    fn role_table_grants() {
        let table = RoleTable::new()
            .grant("reader", "users", [Operation::Read])
            .grant("admin", RoleTable::ANY_CACHE, Operation::ALL);
        let reader = Principal::new("ann").with_role("reader");
        let admin = Principal::new("root").with_role("admin");
        let nobody = Principal::new("eve");

        assert!(table.permits(&reader, "users", Operation::Read));
        assert!(!table.permits(&reader, "users", Operation::Update));
        assert!(!table.permits(&reader, "orders", Operation::Read));
        assert!(table.permits(&admin, "orders", Operation::Delete));
        assert!(!table.permits(&nobody, "users", Operation::Read));
    }

    #[test]
    fn default_reads_reject_wildcards() {
        let p = Principal::new("ann");
        with_ctx(&AllowAll, &p, |ctx| {
            let policy = DefaultPolicy;
            assert!(policy.compile_read_objects_query(ctx, &QueryInput::All).is_err());
            assert!(policy
                .compile_read_objects_query(ctx, &QueryInput::Filter(Record::new()))
                .is_err());
            let q = policy
                .compile_read_objects_query(ctx, &QueryInput::filter([("team", "red")]))
                .unwrap();
            assert_eq!(q.selector, Selector::eq("team", "red"));
        });
    }

    #[test]
    fn single_read_must_bind_identity() {
        let p = Principal::new("ann");
        with_ctx(&AllowAll, &p, |ctx| {
            let policy = DefaultPolicy;
            assert!(matches!(
                policy.compile_read_object_query(ctx, &QueryInput::filter([("name", "A")])),
                Err(CacheError::InvalidRequest { .. })
            ));
            let q = policy
                .compile_read_object_query(
                    ctx,
                    &QueryInput::filter([("id", Value::Integer(3)), ("name", Value::from("A"))]),
                )
                .unwrap();
            assert_eq!(q.selector.get("id"), Some(&Value::Integer(3)));
            assert!(policy.compile_read_object_query(ctx, &QueryInput::Id(Value::Null)).is_err());
        });
    }

    #[test]
    fn mutations_need_identity() {
        let p = Principal::new("ann");
        with_ctx(&AllowAll, &p, |ctx| {
            let policy = DefaultPolicy;
            assert!(policy.compile_update_object(ctx, Record::new().with("score", 1)).is_err());
            let update = policy
                .compile_update_object(ctx, Record::new().with("id", 2).with("score", 1))
                .unwrap();
            assert_eq!(update.selector, Selector::eq("id", 2));
            assert!(policy.compile_delete_object(ctx, &IdOrRecord::from(Record::new())).is_err());
            assert!(policy.compile_create_object(ctx, Record::new()).is_err());
        });
    }

    #[test]
    fn denial_happens_first() {
        let p = Principal::new("eve");
        with_ctx(&RoleTable::new(), &p, |ctx| {
            let policy = DefaultPolicy;
            // Even malformed input is reported as a denial.
            assert!(matches!(
                policy.compile_read_objects_query(ctx, &QueryInput::All),
                Err(CacheError::AccessDenied { .. })
            ));
            assert!(matches!(
                policy.compile_update_object(ctx, Record::new().with("id", 1)),
                Err(CacheError::AccessDenied { .. })
            ));
        });
    }
}
