use crossbeam::epoch::{Atomic, Guard, Shared};
use mvcckv_core::{Value, Version};
use std::sync::atomic::{AtomicU8, Ordering};

/// The lifecycle of a single [`VersionRecord`]. Once a record reaches a
/// terminal state (anything but `Uncommitted`) it never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Status {
    Uncommitted = 0,
    Committed = 1,
    Deleted = 2,
    Undone = 3,
}

impl Status {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Status::Uncommitted,
            1 => Status::Committed,
            2 => Status::Deleted,
            3 => Status::Undone,
            other => unreachable!("invalid VersionRecord status byte {other}"),
        }
    }
}

/// One entry in a row's multi-version chain: a value stamped with the
/// version that wrote it, plus a link to the record it shadows.
pub(crate) struct VersionRecord {
    pub version: Version,
    pub value: Value,
    status: AtomicU8,
    prev: Atomic<VersionRecord>,
}

impl VersionRecord {
    pub fn new(version: Version, value: Value, prev: Shared<'_, VersionRecord>) -> Self {
        Self {
            version,
            value,
            status: AtomicU8::new(Status::Uncommitted as u8),
            prev: Atomic::from(prev),
        }
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Transitions `Uncommitted -> Committed` (or `Deleted`, if the value
    /// is empty) and prunes obsolete ancestors. A no-op if the record has
    /// already reached a terminal status (idempotent, so a Version handle
    /// can safely call this more than once).
    ///
    /// Pruning walks `prev` starting from this record's immediate ancestor,
    /// detaching and freeing every ancestor whose `version < lowest` and
    /// whose status is not `Uncommitted`, and stops at the first ancestor
    /// that fails either test. Each detached ancestor is replaced in this
    /// record's `prev` slot by its own ancestor, so the chain always ends
    /// up pointing at the record it actually stopped at -- never at a
    /// dangling or prematurely nulled link.
    pub fn commit(&self, lowest: Version) {
        if self.status() != Status::Uncommitted {
            return;
        }
        self.set_status(if self.value.is_empty() {
            Status::Deleted
        } else {
            Status::Committed
        });
        self.prune(lowest);
    }

    /// Transitions `Uncommitted -> Undone`. A no-op if already terminal.
    /// Does not prune: an undone record is never read, so there is nothing
    /// to reclaim relative to it.
    pub fn undo(&self) {
        if self.status() != Status::Uncommitted {
            return;
        }
        self.set_status(Status::Undone);
    }

    fn prune(&self, lowest: Version) {
        let guard = crossbeam::epoch::pin();
        let mut ancestor = self.prev.load(Ordering::Acquire, &guard);
        loop {
            if ancestor.is_null() {
                break;
            }
            let record = unsafe { ancestor.deref() };
            if record.version >= lowest || record.status() == Status::Uncommitted {
                break;
            }
            let older = record.prev.load(Ordering::Acquire, &guard);
            self.prev.store(older, Ordering::Release);
            // SAFETY: `lowest` is the oldest version any live snapshot can
            // still read; nothing holds a reference into an ancestor older
            // than it and already terminal.
            unsafe { guard.defer_destroy(ancestor) };
            ancestor = older;
        }
    }

    pub fn prev<'g>(&self, guard: &'g Guard) -> Shared<'g, VersionRecord> {
        self.prev.load(Ordering::Acquire, guard)
    }
}
