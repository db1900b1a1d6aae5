//! Concurrent ordered index, MVCC row chains, and transactional
//! operations for mvcckv.
//!
//! - [`index`] -- a lock-free skip-list index keyed on raw byte strings.
//! - [`row`] -- per-key multi-version chains with a timed writer lock.
//! - [`version`] -- the version coordinator and its reference-counted
//!   handle, which drives commit/undo and chain pruning.
//! - [`ops`] -- read, write, delete, bulk-write, and transaction
//!   operations built from the above.
//! - [`table`] -- the `Table` facade, tying the index, rows, and
//!   coordinator together with buffered online compaction.
//!
//! # Example
//!
//! ```
//! use mvcckv_store::config::Config;
//! use mvcckv_store::table::Table;
//!
//! let table = Table::new(Config::default());
//! table.update(&b"user:1".to_vec(), b"alice".to_vec());
//! assert_eq!(table.read(b"user:1"), b"alice");
//! assert!(table.erase(b"user:1"));
//! assert!(!table.exist(b"user:1"));
//! ```

pub mod config;
mod compactor;
pub mod index;
pub mod ops;
pub mod row;
pub mod table;
pub mod version;
