use super::coordinator::Coordinator;
use crate::row::RecordHandle;
use mvcckv_core::Version;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    version: Version,
    coordinator: Arc<Coordinator>,
    operations: Mutex<Vec<RecordHandle>>,
    running_default: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.running_default.load(Ordering::Acquire) {
            let ops = self.operations.lock().unwrap();
            log::debug!(
                "version {} dropped without commit or undo; auto-undoing {} record(s)",
                self.version,
                ops.len()
            );
            for op in ops.iter() {
                op.undo();
            }
        }
        self.coordinator.version_release_notify(self.version);
    }
}

/// A reference-counted handle binding one version to every
/// [`RecordHandle`] it has touched.
///
/// Cloning shares the same underlying version and operation list; the
/// final clone's drop notifies the coordinator to retire the version. If
/// dropped while `running_default` is still armed -- meaning neither
/// [`VersionHandle::commit`] nor [`VersionHandle::undo`] was ever called,
/// the safety net for an operation abandoned mid-flight (a panic, an early
/// return) -- every recorded record is undone automatically.
#[derive(Clone)]
pub(crate) struct VersionHandle(Arc<Inner>);

impl VersionHandle {
    pub(crate) fn new(version: Version, coordinator: Arc<Coordinator>) -> Self {
        Self(Arc::new(Inner {
            version,
            coordinator,
            operations: Mutex::new(Vec::new()),
            running_default: AtomicBool::new(true),
        }))
    }

    pub(crate) fn version(&self) -> Version {
        self.0.version
    }

    pub(crate) fn record_operation(&self, handle: RecordHandle) {
        self.0.operations.lock().unwrap().push(handle);
    }

    /// Commits every recorded record and disarms the drop-guard. Idempotent:
    /// each underlying record only transitions once, so calling this more
    /// than once (as [`crate::ops::BulkWriteOp`] does, once per appended
    /// write) is harmless.
    pub(crate) fn commit(&self) {
        self.0.running_default.store(false, Ordering::Release);
        let lowest = self.0.coordinator.lowest_version();
        for op in self.0.operations.lock().unwrap().iter() {
            op.commit(lowest);
        }
    }

    /// Undoes every recorded record and disarms the drop-guard.
    pub(crate) fn undo(&self) {
        self.0.running_default.store(false, Ordering::Release);
        for op in self.0.operations.lock().unwrap().iter() {
            op.undo();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;

    #[test]
    fn dropping_without_commit_or_undo_auto_undoes() {
        let coordinator = Arc::new(Coordinator::new());
        let version = coordinator.allocate_version();
        let row = Row::new();

        {
            let handle = VersionHandle::new(version, Arc::clone(&coordinator));
            let record = row.write(b"v1".to_vec(), version, 50).unwrap();
            handle.record_operation(record);
            // handle drops here without commit/undo.
        }

        assert_eq!(row.read(version, true), mvcckv_core::Value::new());
        assert_eq!(coordinator.alive_operation_count(), 0);
    }

    #[test]
    fn commit_disarms_the_auto_undo_guard() {
        let coordinator = Arc::new(Coordinator::new());
        let version = coordinator.allocate_version();
        let row = Row::new();

        let handle = VersionHandle::new(version, Arc::clone(&coordinator));
        let record = row.write(b"v1".to_vec(), version, 50).unwrap();
        handle.record_operation(record);
        handle.commit();
        drop(handle);

        assert_eq!(row.read(version, true), b"v1");
    }
}
