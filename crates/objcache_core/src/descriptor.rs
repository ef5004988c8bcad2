//! Static cache declarations.
//!
//! A [`CacheDescriptor`] is the configuration surface of one named cache:
//! which field carries identity, which secondary indices to maintain,
//! whether the authority keeps a shared in-memory replica, and how raw
//! records are turned into cached instances.

use crate::error::{CacheError, CacheResult};
use crate::index::IndexKey;
use crate::record::{IdOrRecord, Record};
use objcache_codec::Value;
use std::fmt;
use std::sync::Arc;

/// What happens when a second object maps to an occupied unique-index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Overwrite the index leaf and report the collision as a diagnostic.
    /// The displaced object stays cached but is no longer reachable through
    /// that index.
    Overwrite,
    /// Refuse the insert/update before anything is mutated.
    Reject,
}

/// A secondary index over an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name, unique within the cache.
    pub name: String,
    /// Composite key columns, in order.
    pub fields: Vec<String>,
    /// At most one object per key.
    pub unique: bool,
}

impl IndexDefinition {
    /// Creates a non-unique index definition.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Extracts this index's key from a record; missing fields become null.
    pub fn key_of(&self, record: &Record) -> IndexKey {
        IndexKey::new(
            self.fields
                .iter()
                .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// Turns a raw record into the instance the cache stores.
///
/// The default is identity. Implementations may add derived fields, apply
/// defaults or drop fields the replica should never hold.
pub trait InstanceWrapper: Send + Sync {
    /// Builds the cached instance from raw fields.
    fn wrap(&self, raw: Record) -> Record;
}

impl<F> InstanceWrapper for F
where
    F: Fn(Record) -> Record + Send + Sync,
{
    fn wrap(&self, raw: Record) -> Record {
        self(raw)
    }
}

/// Declaration of one named cache.
#[derive(Clone)]
pub struct CacheDescriptor {
    name: String,
    id_property: String,
    created_at_property: String,
    updated_at_property: String,
    indices: Vec<IndexDefinition>,
    host_memory_set: bool,
    manual_init: bool,
    collision_policy: Option<CollisionPolicy>,
    wrapper: Option<Arc<dyn InstanceWrapper>>,
}

impl CacheDescriptor {
    /// Creates a descriptor with `id` identity and `createdAt`/`updatedAt`
    /// temporal fields, no indices, no host MemorySet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_property: "id".to_string(),
            created_at_property: "createdAt".to_string(),
            updated_at_property: "updatedAt".to_string(),
            indices: Vec::new(),
            host_memory_set: false,
            manual_init: false,
            collision_policy: None,
            wrapper: None,
        }
    }

    /// Sets the identity field.
    #[must_use]
    pub fn with_id_property(mut self, field: impl Into<String>) -> Self {
        self.id_property = field.into();
        self
    }

    /// Sets the temporal field names.
    #[must_use]
    pub fn with_temporal_properties(
        mut self,
        created_at: impl Into<String>,
        updated_at: impl Into<String>,
    ) -> Self {
        self.created_at_property = created_at.into();
        self.updated_at_property = updated_at.into();
        self
    }

    /// Declares a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indices.push(index);
        self
    }

    /// Whether the authority keeps a shared MemorySet for this cache.
    #[must_use]
    pub fn with_host_memory_set(mut self, enabled: bool) -> Self {
        self.host_memory_set = enabled;
        self
    }

    /// Opts out of automatic installation.
    #[must_use]
    pub fn with_manual_init(mut self, manual: bool) -> Self {
        self.manual_init = manual;
        self
    }

    /// Overrides the registry's unique-collision policy for this cache.
    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = Some(policy);
        self
    }

    /// Installs custom instance wrapping.
    #[must_use]
    pub fn with_wrapper(mut self, wrapper: impl InstanceWrapper + 'static) -> Self {
        self.wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity field name.
    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    /// `createdAt` field name.
    pub fn created_at_property(&self) -> &str {
        &self.created_at_property
    }

    /// `updatedAt` field name.
    pub fn updated_at_property(&self) -> &str {
        &self.updated_at_property
    }

    /// Declared indices.
    pub fn indices(&self) -> &[IndexDefinition] {
        &self.indices
    }

    /// Whether the authority keeps a shared MemorySet.
    pub fn has_host_memory_set(&self) -> bool {
        self.host_memory_set
    }

    /// Whether automatic installation is skipped.
    pub fn is_manual_init(&self) -> bool {
        self.manual_init
    }

    /// Descriptor-level collision policy, if any.
    pub fn collision_policy(&self) -> Option<CollisionPolicy> {
        self.collision_policy
    }

    /// Returns the record's identity; null counts as absent.
    pub fn id_of(&self, record: &Record) -> Option<Value> {
        record
            .get(&self.id_property)
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// Identity named by a removal target.
    pub fn target_id(&self, target: &IdOrRecord) -> Option<Value> {
        match target {
            IdOrRecord::Id(id) if !id.is_null() => Some(id.clone()),
            IdOrRecord::Id(_) => None,
            IdOrRecord::Record(record) => self.id_of(record),
        }
    }

    /// Writes the identity field.
    pub fn set_id(&self, record: &mut Record, id: Value) {
        record.set(self.id_property.clone(), id);
    }

    /// Applies the instance wrapper (identity when none is installed).
    pub fn wrap(&self, raw: Record) -> Record {
        match &self.wrapper {
            Some(wrapper) => wrapper.wrap(raw),
            None => raw,
        }
    }

    /// Checks the declaration for unusable index definitions.
    pub fn validate(&self) -> CacheResult<()> {
        let invalid = |reason: String| CacheError::InvalidDescriptor {
            cache: self.name.clone(),
            reason,
        };
        if self.id_property.is_empty() {
            return Err(invalid("identity property is empty".into()));
        }
        for (i, index) in self.indices.iter().enumerate() {
            if index.fields.is_empty() {
                return Err(invalid(format!("index {} has no fields", index.name)));
            }
            if self.indices[..i].iter().any(|other| other.name == index.name) {
                return Err(invalid(format!("index {} declared twice", index.name)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CacheDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheDescriptor")
            .field("name", &self.name)
            .field("id_property", &self.id_property)
            .field("indices", &self.indices)
            .field("host_memory_set", &self.host_memory_set)
            .field("manual_init", &self.manual_init)
            .field("collision_policy", &self.collision_policy)
            .field("wrapper", &self.wrapper.is_some())
            .finish_non_exhaustive()
    }
}
