//! Secondary indices over cached objects.
//!
//! An [`Index`] maps composite key tuples to the objects that carry them.
//! Keys live in an ordered map, so a tuple shorter than the index's column
//! count selects a contiguous range (prefix scan). Each index also keeps a
//! side table from identity to the key the object was filed under, which
//! lets removal work from the pre-mutation key even after the object's
//! fields have changed.

mod composite;
mod key;
mod set;

pub use composite::{Index, IndexCollision};
pub use key::IndexKey;
pub use set::IndexSet;
