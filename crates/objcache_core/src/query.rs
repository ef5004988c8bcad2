//! Query inputs, compiled descriptors and query-shape keys.

use crate::record::Record;
use objcache_codec::{to_canonical_cbor, Timestamp, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Caller-supplied query input, before any policy compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// A bare identity value.
    Id(Value),
    /// Field-equality filter.
    Filter(Record),
    /// Wildcard; rejected by the default policy.
    All,
}

impl QueryInput {
    /// Filter input from `(field, value)` pairs.
    pub fn filter<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        QueryInput::Filter(Record::from_pairs(pairs))
    }
}

impl From<Value> for QueryInput {
    fn from(id: Value) -> Self {
        QueryInput::Id(id)
    }
}

impl From<i64> for QueryInput {
    fn from(id: i64) -> Self {
        QueryInput::Id(Value::Integer(id))
    }
}

/// Conjunction of field-equality predicates.
///
/// A selector field bound to null also matches records that lack the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    fields: Record,
}

impl Selector {
    /// Selector with no predicates (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector from a record of required field values.
    pub fn from_record(fields: Record) -> Self {
        Self { fields }
    }

    /// Single-field selector.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fields: Record::new().with(field, value),
        }
    }

    /// Adds a predicate.
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.set(field, value);
        self
    }

    /// Required field values.
    pub fn fields(&self) -> &Record {
        &self.fields
    }

    /// Bound value for a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns true if no predicate is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Evaluates the selector against a record.
    pub fn matches(&self, record: &Record) -> bool {
        self.fields
            .iter()
            .all(|(name, expected)| match record.get(name) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            })
    }
}

/// A compiled, policy-approved query against the backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Row predicate.
    pub selector: Selector,
    /// Only rows whose `updatedAt` is strictly later than this.
    pub updated_after: Option<Timestamp>,
}

impl QueryDescriptor {
    /// Descriptor over a selector with no temporal bound.
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            updated_after: None,
        }
    }

    /// Narrows to rows updated after `ts`.
    #[must_use]
    pub fn updated_after(mut self, ts: Option<Timestamp>) -> Self {
        self.updated_after = ts;
        self
    }

    /// Serialized shape used as the memo key.
    ///
    /// The temporal bound is excluded: the shape names *which* rows a query
    /// asks for, not how far it has already been answered.
    pub fn shape_key(&self) -> ShapeKey {
        ShapeKey::of_bytes(&self.shape_bytes())
    }

    /// Canonical CBOR of the query shape; `updated_after` is left out.
    pub fn shape_bytes(&self) -> Vec<u8> {
        let shape = Value::map(vec![(
            Value::from("selector"),
            self.selector.fields().to_value(),
        )]);
        to_canonical_cbor(&shape)
    }
}

/// SHA-256 digest of a serialized query shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey([u8; 32]);

impl ShapeKey {
    /// Digest of arbitrary serialized shape bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeKey({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let record = Record::new().with("team", "red").with("active", true);
        assert!(Selector::eq("team", "red").matches(&record));
        assert!(!Selector::eq("team", "blue").matches(&record));
        assert!(Selector::eq("deleted", Value::Null).matches(&record));
        assert!(Selector::new().matches(&record));
    }

    #[test]
    fn equal_shapes_share_a_key() {
        // Built independently, in different field order.
        let a = QueryDescriptor::new(Selector::eq("team", "red").and("active", true));
        let b = QueryDescriptor::new(Selector::eq("active", true).and("team", "red"));
        assert_eq!(a.shape_key(), b.shape_key());
    }

    #[test]
    fn temporal_bound_does_not_change_shape() {
        let plain = QueryDescriptor::new(Selector::eq("team", "red"));
        let narrowed = plain.clone().updated_after(Timestamp::from_millis(5));
        assert_eq!(plain.shape_key(), narrowed.shape_key());
    }

    #[test]
    fn different_selectors_differ() {
        let a = QueryDescriptor::new(Selector::eq("team", "red"));
        let b = QueryDescriptor::new(Selector::eq("team", "blue"));
        assert_ne!(a.shape_key(), b.shape_key());
        assert_eq!(a.shape_key().to_hex().len(), 64);
    }
}
