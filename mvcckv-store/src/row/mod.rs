//! Per-key multi-version row chains.

mod version_record;

use crate::index::Snapshot;
use crossbeam::epoch::{self, Atomic, Owned};
use lock_api::{RawMutex as _, RawMutexTimed as _};
use mvcckv_core::{Error, Result, Value, Version};
use parking_lot::RawMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
pub(crate) use version_record::{Status, VersionRecord};

/// A handle to a freshly appended, still-`Uncommitted` [`VersionRecord`].
///
/// Returned by [`Row::write`] and [`Row::update_value`] and recorded by
/// the caller's version so it can later be committed or undone. The
/// pointee is guaranteed to stay alive: chain pruning only ever detaches
/// *ancestors* strictly older than the current lowest live version, never
/// the record a live handle still points at (a transaction's own version
/// is itself registered as live for as long as the handle exists).
pub(crate) struct RecordHandle(*const VersionRecord);

// SAFETY: every operation a RecordHandle performs goes through
// VersionRecord's own atomics.
unsafe impl Send for RecordHandle {}

impl RecordHandle {
    pub fn version(&self) -> Version {
        unsafe { (*self.0).version }
    }

    pub fn commit(&self, lowest: Version) {
        unsafe { (*self.0).commit(lowest) };
    }

    pub fn undo(&self) {
        unsafe { (*self.0).undo() };
    }
}

/// Per-key multi-version chain.
///
/// `latest` is the head of a singly linked, newest-first list of
/// [`VersionRecord`]s. Readers load `latest` and walk `prev` links without
/// ever blocking; at most one writer may be in the append critical section
/// at a time, enforced by a timed raw mutex rather than a scoped guard,
/// since [`Row::get_lock`] and [`Row::unlock`] must be callable as two
/// separate method calls spanning a transaction's lock/execute/commit/
/// release phases.
pub struct Row {
    latest: Atomic<VersionRecord>,
    raw_lock: RawMutex,
    in_transaction: AtomicBool,
    mem_use: AtomicUsize,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            latest: Atomic::null(),
            raw_lock: RawMutex::INIT,
            in_transaction: AtomicBool::new(false),
            mem_use: AtomicUsize::new(0),
        }
    }
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, value: Value, version: Version) -> RecordHandle {
        let guard = &epoch::pin();
        let prev = self.latest.load(Ordering::Acquire, guard);
        let record = Owned::new(VersionRecord::new(version, value, prev));
        let shared = record.into_shared(guard);
        self.latest.store(shared, Ordering::Release);
        self.mem_use.fetch_add(1, Ordering::Relaxed);
        RecordHandle(shared.as_raw())
    }

    /// Appends a new `Uncommitted` record, acquiring the row's writer lock
    /// for up to `wait_ms`. Returns `None` on timeout.
    pub(crate) fn write(&self, value: Value, version: Version, wait_ms: u64) -> Option<RecordHandle> {
        if !self.raw_lock.try_lock_for(Duration::from_millis(wait_ms)) {
            log::debug!("row write lock timed out after {wait_ms}ms");
            return None;
        }
        let handle = self.append(value, version);
        // SAFETY: this thread acquired the lock above and has not released
        // it since.
        unsafe { self.raw_lock.unlock() };
        Some(handle)
    }

    /// Appends an empty-value (tombstone) record, same contract as
    /// [`Row::write`].
    pub(crate) fn remove(&self, version: Version, wait_ms: u64) -> Option<RecordHandle> {
        self.write(Value::new(), version, wait_ms)
    }

    /// Appends a new `Uncommitted` record without attempting to acquire
    /// the writer lock. Used by transactions, which already hold the lock
    /// across their whole lock/execute/commit span via [`Row::get_lock`].
    pub(crate) fn update_value(&self, value: Value, version: Version) -> RecordHandle {
        self.append(value, version)
    }

    /// A snapshot read: the newest record with `status != Uncommitted` and
    /// `version <= version` (or, if `read_latest`, the newest terminal
    /// record regardless of version). Returns the empty value if that
    /// record is `Deleted` or the chain is exhausted.
    pub fn read(&self, version: Version, read_latest: bool) -> Value {
        let guard = &epoch::pin();
        let mut node = self.latest.load(Ordering::Acquire, guard);
        loop {
            if node.is_null() {
                return Value::new();
            }
            let record = unsafe { node.deref() };
            let in_range = read_latest || record.version <= version;
            match record.status() {
                Status::Committed if in_range => return record.value.clone(),
                Status::Deleted if in_range => return Value::new(),
                _ => node = record.prev(guard),
            }
        }
    }

    /// Acquires the coarse transactional lock, held across a transaction's
    /// lock/execute/commit phases and released explicitly via
    /// [`Row::unlock`]. Returns `false` on timeout.
    pub(crate) fn get_lock(&self, wait_ms: u64) -> bool {
        if self.raw_lock.try_lock_for(Duration::from_millis(wait_ms)) {
            self.in_transaction.store(true, Ordering::Release);
            true
        } else {
            log::debug!("row transaction lock timed out after {wait_ms}ms");
            false
        }
    }

    pub(crate) fn unlock(&self) {
        if self.in_transaction.swap(false, Ordering::AcqRel) {
            // SAFETY: only reached after a successful get_lock on this row
            // by the same logical transaction, and called at most once per
            // acquisition.
            unsafe { self.raw_lock.unlock() };
        }
    }

    /// Number of version records ever appended to this row.
    pub fn memory_use(&self) -> usize {
        self.mem_use.load(Ordering::Relaxed)
    }
}

impl Snapshot for Row {
    /// Produces a fresh, single-record `Row` holding the latest value of
    /// `self`, provided the head record is `Committed`.
    ///
    /// Used by compaction's `main.merge(buffer)` step. Matches the source's
    /// `Value` copy constructor exactly: it throws unless the head's status
    /// is precisely `Committed`, not merely terminal -- an `Uncommitted`
    /// head means the row is still being written, and a `Deleted` or
    /// `Undone` head is rejected too rather than resurrected as a live
    /// value in the copy.
    fn snapshot(&self) -> Result<Self> {
        let guard = &epoch::pin();
        let head = self.latest.load(Ordering::Acquire, guard);
        if head.is_null() {
            return Ok(Row::new());
        }
        let record = unsafe { head.deref() };
        if record.status() != Status::Committed {
            return Err(Error::UnsupportedCopy);
        }
        let fresh = Row::new();
        fresh.append(record.value.clone(), record.version);
        // The freshly appended record starts Uncommitted; commit it so the
        // copy is immediately readable, mirroring the Committed status it
        // copied from.
        let committed = fresh.latest.load(Ordering::Acquire, guard);
        unsafe { committed.deref() }.commit(record.version);
        Ok(fresh)
    }
}

impl Drop for Row {
    fn drop(&mut self) {
        let guard = &epoch::pin();
        let mut node = self.latest.load(Ordering::Relaxed, guard);
        while !node.is_null() {
            let next = unsafe { node.deref() }.prev(guard);
            // SAFETY: `&mut self` guarantees no concurrent access.
            unsafe { drop(node.into_owned()) };
            node = next;
        }
    }
}

// SAFETY: all interior mutability is through atomics or the raw mutex.
unsafe impl Send for Row {}
unsafe impl Sync for Row {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_commit_is_readable() {
        let row = Row::new();
        let handle = row.write(b"v1".to_vec(), 1, 50).unwrap();
        assert_eq!(row.read(1, false), Value::new());
        handle.commit(1);
        assert_eq!(row.read(1, false), b"v1");
    }

    #[test]
    fn uncommitted_write_is_invisible_to_snapshots() {
        let row = Row::new();
        let _handle = row.write(b"v1".to_vec(), 5, 50).unwrap();
        assert_eq!(row.read(5, false), Value::new());
        assert_eq!(row.read(100, false), Value::new());
    }

    #[test]
    fn undo_hides_the_write_permanently() {
        let row = Row::new();
        let handle = row.write(b"v1".to_vec(), 1, 50).unwrap();
        handle.undo();
        assert_eq!(row.read(1, true), Value::new());
        // A second commit attempt must not resurrect an undone record.
        handle.commit(1);
        assert_eq!(row.read(1, true), Value::new());
    }

    #[test]
    fn snapshot_read_sees_the_version_at_the_time() {
        let row = Row::new();
        row.write(b"v1".to_vec(), 1, 50).unwrap().commit(1);
        row.write(b"v2".to_vec(), 2, 50).unwrap().commit(1);

        assert_eq!(row.read(1, false), b"v1");
        assert_eq!(row.read(2, false), b"v2");
        assert_eq!(row.read(100, false), b"v2");
    }

    #[test]
    fn deleted_record_reads_as_empty() {
        let row = Row::new();
        row.write(b"v1".to_vec(), 1, 50).unwrap().commit(1);
        row.remove(2, 50).unwrap().commit(1);

        assert_eq!(row.read(1, false), b"v1");
        assert_eq!(row.read(2, false), Value::new());
    }

    #[test]
    fn commit_is_idempotent() {
        let row = Row::new();
        let handle = row.write(b"v1".to_vec(), 1, 50).unwrap();
        handle.commit(1);
        handle.commit(1);
        assert_eq!(row.read(1, false), b"v1");
    }

    #[test]
    fn snapshot_fails_while_head_is_uncommitted() {
        let row = Row::new();
        let _handle = row.write(b"v1".to_vec(), 1, 50).unwrap();
        assert!(matches!(row.snapshot(), Err(Error::UnsupportedCopy)));
    }

    #[test]
    fn snapshot_succeeds_once_committed() {
        let row = Row::new();
        row.write(b"v1".to_vec(), 1, 50).unwrap().commit(1);
        let copy = row.snapshot().unwrap();
        assert_eq!(copy.read(1, true), b"v1");
    }

    #[test]
    fn snapshot_rejects_an_undone_head_rather_than_resurrecting_it() {
        let row = Row::new();
        row.write(b"v1".to_vec(), 1, 50).unwrap().undo();
        assert!(matches!(row.snapshot(), Err(Error::UnsupportedCopy)));
    }

    #[test]
    fn snapshot_rejects_a_deleted_head() {
        let row = Row::new();
        row.write(b"v1".to_vec(), 1, 50).unwrap().commit(1);
        row.remove(2, 50).unwrap().commit(1);
        assert!(matches!(row.snapshot(), Err(Error::UnsupportedCopy)));
    }

    #[test]
    fn get_lock_times_out_when_already_held() {
        let row = Row::new();
        assert!(row.get_lock(50));
        assert!(!row.get_lock(10));
        row.unlock();
        assert!(row.get_lock(10));
        row.unlock();
    }

    // S1 from spec.md §8: a reader started before a second write commits
    // must keep seeing the first write's value until the second commits.
    #[test]
    fn snapshot_taken_before_a_pending_write_commits_does_not_see_it() {
        let row = Row::new();
        row.write(b"a".to_vec(), 1, 50).unwrap().commit(1);
        let pending = row.write(b"b".to_vec(), 2, 50).unwrap();

        assert_eq!(row.read(3, false), b"a");
        pending.commit(1);
        assert_eq!(row.read(3, false), b"b");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Invariant 2 (§8): committing or undoing an arbitrary sequence of
        /// writes to one row always leaves `prev` links in strictly
        /// decreasing version order from `latest` to the tail.
        #[test]
        fn chain_versions_strictly_decrease(
            outcomes in prop::collection::vec(prop::bool::ANY, 1..40),
        ) {
            let row = Row::new();
            let mut version = 0u64;
            for commit in outcomes {
                version += 1;
                let handle = row.write(vec![version as u8], version, 50).unwrap();
                if commit {
                    handle.commit(1);
                } else {
                    handle.undo();
                }
            }

            let guard = epoch::pin();
            let mut node = row.latest.load(Ordering::Acquire, &guard);
            let mut last = u64::MAX;
            while !node.is_null() {
                let record = unsafe { node.deref() };
                prop_assert!(record.version < last);
                last = record.version;
                node = record.prev(&guard);
            }
        }

        /// Invariant 3 (§8): a snapshot read always returns the committed
        /// record with the largest version not exceeding the snapshot, or
        /// empty if the nearest such record is a tombstone or absent.
        #[test]
        fn snapshot_read_matches_committed_history(
            values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..4), 1..20),
        ) {
            let row = Row::new();
            let mut committed = Vec::new();
            for (i, value) in values.into_iter().enumerate() {
                let version = (i + 1) as u64;
                row.write(value.clone(), version, 50).unwrap().commit(1);
                committed.push((version, value));
            }

            for &(version, ref expected) in &committed {
                prop_assert_eq!(row.read(version, false), expected.clone());
            }
            let newest = committed.last().unwrap();
            prop_assert_eq!(row.read(u64::MAX, false), newest.1.clone());
        }
    }
}
