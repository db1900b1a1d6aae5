//! A lock-free, ordered, multi-level skip-list index.

mod iter;
mod node;
mod skiplist;

pub use iter::Iter;
pub use skiplist::{Index, Snapshot};
