//! Bounded query-shape memo for incremental fetches.

use crate::query::ShapeKey;
use objcache_codec::Timestamp;
use std::collections::{HashMap, VecDeque};

/// Greatest `updatedAt` seen per query shape.
///
/// Bounded to `capacity` shapes; inserting a new shape at capacity evicts
/// the shape that was inserted first, regardless of how recently it was
/// used.
#[derive(Debug)]
pub struct QueryMemo {
    capacity: usize,
    entries: HashMap<ShapeKey, Timestamp>,
    order: VecDeque<ShapeKey>,
}

impl QueryMemo {
    /// Creates an empty memo.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Maximum number of shapes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked shapes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no shape is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `ts` for `shape`; an existing entry only moves forward.
    ///
    /// Returns the shape evicted to make room, if any.
    pub fn check(&mut self, shape: ShapeKey, ts: Timestamp) -> Option<ShapeKey> {
        if let Some(current) = self.entries.get_mut(&shape) {
            if ts > *current {
                *current = ts;
            }
            return None;
        }
        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        self.entries.insert(shape, ts);
        self.order.push_back(shape);
        evicted
    }

    /// Greatest timestamp recorded for `shape`.
    pub fn last(&self, shape: &ShapeKey) -> Option<Timestamp> {
        self.entries.get(shape).copied()
    }

    /// Forgets every shape.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
