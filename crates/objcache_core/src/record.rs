//! Records and shared cached-object handles.

use objcache_codec::{CodecError, CodecResult, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A plain keyed structure of named fields.
///
/// Records carry no behavior. Which field holds the identity is decided by
/// the cache's descriptor, not by the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Returns true if the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Shallow-copies every field of `other` onto this record.
    ///
    /// Fields absent from `other` are left untouched.
    pub fn merge_from(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Converts to a canonical map value.
    pub fn to_value(&self) -> Value {
        Value::map(
            self.fields
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Converts from a map value with text keys.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let pairs = value
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure("record must be a map"))?;
        let mut fields = BTreeMap::new();
        for (key, val) in pairs {
            let name = key
                .as_text()
                .ok_or_else(|| CodecError::invalid_structure("record keys must be text"))?;
            fields.insert(name.to_string(), val.clone());
        }
        Ok(Self { fields })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// A shared handle to a cached record.
///
/// Two handles are the same object iff they share the allocation
/// ([`CachedObject::same_object`]). Merges mutate the record behind the handle
/// in place, so every holder of a handle observes updates.
#[derive(Clone)]
pub struct CachedObject(Arc<RwLock<Record>>);

impl CachedObject {
    /// Wraps a record into a fresh object identity.
    pub fn new(record: Record) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    /// Read access to the current fields.
    pub fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read()
    }

    /// Clones the current fields.
    pub fn snapshot(&self) -> Record {
        self.0.read().clone()
    }

    /// Clones one field's current value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    /// Returns true if both handles point to the same object.
    pub fn same_object(&self, other: &CachedObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Write access; only the MemorySet mutates cached objects so that
    /// indices stay consistent with field values.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write()
    }
}

impl fmt::Debug for CachedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachedObject").field(&*self.0.read()).finish()
    }
}

/// Target of a removal: a bare identity value or a record carrying one.
#[derive(Debug, Clone, PartialEq)]
pub enum IdOrRecord {
    /// Bare identity value.
    Id(Value),
    /// Record whose identity field names the target.
    Record(Record),
}

impl From<Value> for IdOrRecord {
    fn from(id: Value) -> Self {
        IdOrRecord::Id(id)
    }
}

impl From<i64> for IdOrRecord {
    fn from(id: i64) -> Self {
        IdOrRecord::Id(Value::Integer(id))
    }
}

impl From<&str> for IdOrRecord {
    fn from(id: &str) -> Self {
        IdOrRecord::Id(Value::from(id))
    }
}

impl From<Record> for IdOrRecord {
    fn from(record: Record) -> Self {
        IdOrRecord::Record(record)
    }
}

impl From<&CachedObject> for IdOrRecord {
    fn from(object: &CachedObject) -> Self {
        IdOrRecord::Record(object.snapshot())
    }
}
