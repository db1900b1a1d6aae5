use crate::row::Row;
use crate::version::{Coordinator, VersionHandle};
use mvcckv_core::{Error, Result, Value};
use std::sync::Arc;

/// Two-phase-locked, all-or-nothing write over a set of rows.
///
/// - **Lock phase**: acquires every row's coarse transactional lock in
///   append order. On the first timeout, every lock acquired so far is
///   released and the transaction aborts without touching any row.
/// - **Execute phase**: appends an `Uncommitted` record to every row,
///   which already holds the lock, so this cannot itself time out.
/// - **Commit phase**: transitions every appended record to its terminal
///   status. Each row's transition is atomic, but the transaction is not
///   atomic *across* rows: a concurrent snapshot read started mid-commit
///   can observe some of the transaction's rows at the new version and
///   others still at the old one (see DESIGN.md).
/// - **Release phase**: unlocks every row that was locked.
///
/// Dropping a `TransactionOp` without calling [`TransactionOp::try_commit`]
/// abandons it: the version handle's drop-guard undoes every appended
/// record, but the rows locked during the (never-reached) lock phase are
/// never locked in the first place, since locking only happens inside
/// `try_commit`.
pub struct TransactionOp<'a> {
    version: VersionHandle,
    wait_ms: u64,
    ops: Vec<(&'a Row, Value)>,
}

impl<'a> TransactionOp<'a> {
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

    pub fn try_commit(self) -> Result<()> {
        let mut locked: Vec<&'a Row> = Vec::with_capacity(self.ops.len());
        for (row, _) in &self.ops {
            if row.get_lock(self.wait_ms) {
                locked.push(*row);
            } else {
                log::debug!(
                    "transaction lock phase failed after {} of {} row(s)",
                    locked.len(),
                    self.ops.len()
                );
                for row in &locked {
                    row.unlock();
                }
                return Err(Error::TransactionAborted("lock phase failed".into()));
            }
        }

        for (row, value) in self.ops {
            let handle = row.update_value(value, self.version.version());
            self.version.record_operation(handle);
        }

        self.version.commit();

        for row in &locked {
            row.unlock();
        }

        Ok(())
    }
}
