//! Operation types binding a version to one or more row mutations.

mod bulk;
mod read;
mod transaction;
mod write;

pub use bulk::BulkWriteOp;
pub use read::{ReadOp, StreamReadOp};
pub use transaction::TransactionOp;
pub use write::{DeleteOp, WriteOp};
