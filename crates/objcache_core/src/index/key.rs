//! Composite index keys.

use objcache_codec::Value;
use std::fmt;

/// Ordered tuple of field values identifying an index leaf.
///
/// Ordering is lexicographic, so every key that extends a given prefix sorts
/// directly after that prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Creates a key from its column values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Column values in order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the zero-column key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if this key begins with `prefix`.
    pub fn starts_with(&self, prefix: &[Value]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<Vec<Value>> for IndexKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_sort_after_prefix() {
        let prefix = IndexKey::new(vec![Value::from("red")]);
        let full = IndexKey::new(vec![Value::from("red"), Value::Integer(1)]);
        let other = IndexKey::new(vec![Value::from("blue"), Value::Integer(9)]);
        assert!(prefix < full);
        assert!(other < prefix);
        assert!(full.starts_with(prefix.values()));
    }

    #[test]
    fn display_lists_columns() {
        let key = IndexKey::new(vec![Value::from("red"), Value::Null]);
        assert_eq!(key.to_string(), format!("({}, {})", Value::from("red"), Value::Null));
    }
}
