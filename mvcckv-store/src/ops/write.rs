use crate::row::Row;
use crate::version::{Coordinator, VersionHandle};
use mvcckv_core::Value;
use std::sync::Arc;

/// Binds a freshly allocated version to a single row mutation.
pub struct WriteOp<'a> {
    row: &'a Row,
    value: Value,
    version: VersionHandle,
    wait_ms: u64,
}

impl<'a> WriteOp<'a> {
    pub(crate) fn new(row: &'a Row, value: Value, coordinator: Arc<Coordinator>, wait_ms: u64) -> Self {
        let version = coordinator.allocate_version();
        Self {
            row,
            value,
            version: VersionHandle::new(version, coordinator),
            wait_ms,
        }
    }

    /// Appends the value as a new `Uncommitted` record, records it on the
    /// version handle, then commits. Returns `false` if the row's writer
    /// lock could not be acquired within the configured budget.
    pub fn write(self) -> bool {
        let Some(handle) = self.row.write(self.value, self.version.version(), self.wait_ms) else {
            return false;
        };
        self.version.record_operation(handle);
        self.version.commit();
        true
    }
}

/// A [`WriteOp`] with an empty value. Semantically identical; the only
/// difference is the terminal status the appended record reaches
/// (`Deleted` rather than `Committed`, decided by `VersionRecord::commit`
/// purely from the value being empty).
pub struct DeleteOp<'a>(WriteOp<'a>);

impl<'a> DeleteOp<'a> {
    pub(crate) fn new(row: &'a Row, coordinator: Arc<Coordinator>, wait_ms: u64) -> Self {
        Self(WriteOp::new(row, Value::new(), coordinator, wait_ms))
    }

    pub fn delete(self) -> bool {
        self.0.write()
    }
}
