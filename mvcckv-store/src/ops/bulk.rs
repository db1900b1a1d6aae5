use crate::row::Row;
use crate::version::{Coordinator, VersionHandle};
use mvcckv_core::Value;
use std::sync::Arc;

/// A sequence of `(row, value)` writes sharing one version, executed in
/// append order with an early-stop, no-rollback contract: the first write
/// that fails to acquire its row's lock halts the whole batch, and every
/// write that already succeeded stays committed -- distinct from
/// [`super::TransactionOp`], which is all-or-nothing.
pub struct BulkWriteOp<'a> {
    version: VersionHandle,
    wait_ms: u64,
    ops: Vec<(&'a Row, Value)>,
}

impl<'a> BulkWriteOp<'a> {
    pub(crate) fn new(coordinator: Arc<Coordinator>, wait_ms: u64) -> Self {
        let version = coordinator.allocate_version();
        Self {
            version: VersionHandle::new(version, coordinator),
            wait_ms,
            ops: Vec::new(),
        }
    }

    pub fn append(&mut self, row: &'a Row, value: Value) {
        self.ops.push((row, value));
    }

    /// Executes each appended write in order, committing the shared
    /// version after each one. Stops at the first write whose row lock
    /// times out; everything executed before that point is left
    /// committed.
    pub fn run(self) -> bool {
        for (row, value) in self.ops {
            let Some(handle) = row.write(value, self.version.version(), self.wait_ms) else {
                return false;
            };
            self.version.record_operation(handle);
            self.version.commit();
        }
        true
    }
}
