use crate::compactor::{self, CompactionStatus};
use crate::config::Config;
use crate::index::{self, Index};
use crate::ops::{BulkWriteOp, ReadOp, StreamReadOp, TransactionOp, WriteOp};
use crate::row::Row;
use crate::version::Coordinator;
use mvcckv_core::{Error, Key, Result, Value};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) struct Inner {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) main: Index<Row>,
    pub(crate) buffer: Index<Row>,
    pub(crate) status: AtomicU8,
    pub(crate) deleted_nums: AtomicUsize,
    config: Config,
}

/// The ordered key-value store facade.
///
/// Cheaply cloneable (an `Arc` handle internally), so the background
/// compaction thread [`Table::compact`] spawns can hold its own clone
/// without requiring callers to wrap a `Table` in an `Arc` themselves.
///
/// Routes writes and reads to the `main` index while `Idle`, and to a
/// secondary `buffer` index once a compaction enters its `Draining` phase,
/// merging `buffer` back into `main` once every in-flight operation at the
/// time draining began has completed. See [`crate::compactor`].
#[derive(Clone)]
pub struct Table(Arc<Inner>);

impl Table {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(Inner {
            coordinator: Arc::new(Coordinator::new()),
            main: Index::new(config.max_level),
            buffer: Index::new(config.max_level),
            status: AtomicU8::new(CompactionStatus::Idle as u8),
            deleted_nums: AtomicUsize::new(0),
            config,
        }))
    }

    fn status(&self) -> CompactionStatus {
        CompactionStatus::from_u8(self.0.status.load(Ordering::Acquire))
    }

    /// The index new writes target: `buffer` while draining, `main`
    /// otherwise.
    fn write_index(&self) -> &Index<Row> {
        match self.status() {
            CompactionStatus::Draining => &self.0.buffer,
            _ => &self.0.main,
        }
    }

    /// Looks a key up across both indexes, `main` first, matching the
    /// index an in-progress compaction may have already migrated it away
    /// from.
    fn locate(&self, key: &[u8]) -> Option<&Row> {
        let it = self.0.main.find(key);
        if it.is_valid() {
            return Some(it.value());
        }
        if self.status() != CompactionStatus::Idle {
            let it = self.0.buffer.find(key);
            if it.is_valid() {
                return Some(it.value());
            }
        }
        None
    }

    /// Inserts or overwrites `key`, committing immediately as a
    /// single-row write. Returns `false` if the row's writer lock timed
    /// out, or if `key` is empty.
    pub fn update(&self, key: &Key, value: Value) -> bool {
        if key.is_empty() {
            return false;
        }
        let iter = self.write_index().insert(key.clone());
        let row = iter.value();
        WriteOp::new(row, value, Arc::clone(&self.0.coordinator), self.0.config.wait_ms).write()
    }

    /// Alias for [`Table::update`].
    pub fn emplace(&self, key: &Key, value: Value) -> bool {
        self.update(key, value)
    }

    /// A snapshot read of `key`'s current value, or the empty value if
    /// absent.
    pub fn read(&self, key: &[u8]) -> Value {
        match self.locate(key) {
            Some(row) => {
                let snapshot = self.0.coordinator.current_snapshot();
                ReadOp::new(row, snapshot).read()
            }
            None => Value::new(),
        }
    }

    pub fn exist(&self, key: &[u8]) -> bool {
        self.locate(key).is_some()
    }

    /// Lazily erases `key` from the primary index and, if it shrank the
    /// live set, checks whether auto-compaction should trigger.
    pub fn erase(&self, key: &[u8]) -> bool {
        let erased = self.0.main.erase(key);
        if erased {
            self.0.deleted_nums.fetch_add(1, Ordering::Relaxed);
        }
        self.try_compact();
        erased
    }

    /// A positioned, snapshot-consistent iterator over `key`'s entry, or
    /// the end iterator if absent.
    pub fn find(&self, key: &[u8]) -> Iter<'_> {
        let it = {
            let main_it = self.0.main.find(key);
            if main_it.is_valid() {
                Some(main_it)
            } else if self.status() != CompactionStatus::Idle {
                let buffer_it = self.0.buffer.find(key);
                if buffer_it.is_valid() {
                    Some(buffer_it)
                } else {
                    None
                }
            } else {
                None
            }
        };
        match it {
            Some(it) => {
                let snapshot = self.0.coordinator.current_snapshot();
                let stream = StreamReadOp::new(it.value(), snapshot);
                Iter {
                    inner: Some((it, stream)),
                }
            }
            None => Iter::end(),
        }
    }

    /// A snapshot-consistent iterator over the primary index in key order.
    pub fn begin(&self) -> Iter<'_> {
        let it = self.0.main.begin();
        if !it.is_valid() {
            return Iter::end();
        }
        let snapshot = self.0.coordinator.current_snapshot();
        let stream = StreamReadOp::new(it.value(), snapshot);
        Iter {
            inner: Some((it, stream)),
        }
    }

    pub fn end(&self) -> Iter<'_> {
        Iter::end()
    }

    /// Executes a sequence of writes sharing one version, in order, with
    /// no rollback on partial failure. Each key must already exist.
    pub fn bulk_write(&self, kvs: Vec<(Key, Value)>) -> Result<bool> {
        let mut bulk = BulkWriteOp::new(Arc::clone(&self.0.coordinator), self.0.config.wait_ms);
        let mut rows = Vec::with_capacity(kvs.len());
        for (key, _) in &kvs {
            let it = self.0.main.find(key);
            if !it.is_valid() {
                return Err(Error::KeyNotFound);
            }
            rows.push(it);
        }
        for ((_, value), it) in kvs.into_iter().zip(rows.into_iter()) {
            bulk.append(it.value(), value);
        }
        Ok(bulk.run())
    }

    /// Executes a set of writes as a single two-phase-locked transaction.
    /// Each key must already exist.
    pub fn transaction(&self, kvs: Vec<(Key, Value)>) -> Result<()> {
        let mut txn = TransactionOp::new(Arc::clone(&self.0.coordinator), self.0.config.wait_ms);
        let mut rows = Vec::with_capacity(kvs.len());
        for (key, _) in &kvs {
            let it = self.0.main.find(key);
            if !it.is_valid() {
                return Err(Error::KeyNotFound);
            }
            rows.push(it);
        }
        for ((_, value), it) in kvs.into_iter().zip(rows.into_iter()) {
            txn.append(it.value(), value);
        }
        txn.try_commit()
    }

    /// Triggers compaction if idle and the deleted/live ratio exceeds the
    /// configured [`crate::config::CleanThreshold`].
    pub fn try_compact(&self) {
        let percent = self.0.config.clean_threshold.percent();
        if percent.is_infinite() {
            return;
        }
        let size = self.0.main.size().max(1);
        let deleted = self.0.deleted_nums.load(Ordering::Acquire);
        if (deleted as f64) / (size as f64) > percent {
            self.compact();
        }
    }

    /// Starts a buffered online compaction cycle on a background thread.
    /// A no-op if a compaction is already running, or if the buffer index
    /// isn't empty or operations are in flight when the attempt begins.
    pub fn compact(&self) {
        if self
            .0
            .status
            .compare_exchange(
                CompactionStatus::Idle as u8,
                CompactionStatus::Compacting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            log::debug!("compact() called while not idle; ignored");
            return;
        }

        if self.0.buffer.size() != 0 || self.0.coordinator.alive_operation_count() != 0 {
            log::debug!("compact() preconditions unmet; aborting this attempt");
            self.0.status.store(CompactionStatus::Idle as u8, Ordering::Release);
            return;
        }

        log::info!("compaction: Idle -> Compacting");
        let inner = Arc::clone(&self.0);
        thread::spawn(move || compactor::run(inner));
    }
}

/// A snapshot-consistent position over a [`Table`]'s primary index.
pub struct Iter<'a> {
    inner: Option<(index::Iter<'a, Row>, StreamReadOp<'a>)>,
}

impl<'a> Iter<'a> {
    fn end() -> Self {
        Self { inner: None }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.as_ref().is_some_and(|(it, _)| it.is_valid())
    }

    /// # Panics
    ///
    /// Panics if called on an end (invalid) iterator.
    pub fn key(&self) -> &Key {
        self.inner
            .as_ref()
            .expect("key() called on an end iterator")
            .0
            .key()
    }

    pub fn read(&self) -> Value {
        match &self.inner {
            Some((_, stream)) => stream.read(),
            None => Value::new(),
        }
    }

    pub fn advance(&mut self) {
        if let Some((it, stream)) = &mut self.inner {
            it.advance();
            if it.is_valid() {
                stream.retarget(it.value());
            } else {
                self.inner = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanThreshold;

    fn table() -> Table {
        Table::new(Config {
            max_level: 8,
            wait_ms: 50,
            clean_threshold: CleanThreshold::Never,
        })
    }

    #[test]
    fn update_then_read_roundtrips() {
        let t = table();
        assert!(t.update(&b"k1".to_vec(), b"v1".to_vec()));
        assert_eq!(t.read(b"k1"), b"v1");
        assert!(t.exist(b"k1"));
    }

    #[test]
    fn empty_key_is_rejected() {
        let t = table();
        assert!(!t.update(&Vec::new(), b"v".to_vec()));
    }

    #[test]
    fn erase_then_read_returns_empty() {
        let t = table();
        t.update(&b"k1".to_vec(), b"v1".to_vec());
        assert!(t.erase(b"k1"));
        assert!(!t.erase(b"k1"));
        assert!(!t.exist(b"k1"));
        assert_eq!(t.read(b"k1"), Value::new());
    }

    #[test]
    fn begin_iterates_in_key_order() {
        let t = table();
        for k in ["b", "a", "c"] {
            t.update(&k.as_bytes().to_vec(), k.as_bytes().to_vec());
        }
        let mut it = t.begin();
        let mut seen = Vec::new();
        while it.is_valid() {
            seen.push(it.key().clone());
            it.advance();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn transaction_applies_all_writes_atomically_per_row() {
        let t = table();
        t.update(&b"a".to_vec(), b"1".to_vec());
        t.update(&b"b".to_vec(), b"2".to_vec());

        let result = t.transaction(vec![
            (b"a".to_vec(), b"10".to_vec()),
            (b"b".to_vec(), b"20".to_vec()),
        ]);
        assert!(result.is_ok());
        assert_eq!(t.read(b"a"), b"10");
        assert_eq!(t.read(b"b"), b"20");
    }

    #[test]
    fn transaction_on_missing_key_fails_without_side_effects() {
        let t = table();
        t.update(&b"a".to_vec(), b"1".to_vec());

        let result = t.transaction(vec![
            (b"a".to_vec(), b"10".to_vec()),
            (b"missing".to_vec(), b"20".to_vec()),
        ]);
        assert!(result.is_err());
        assert_eq!(t.read(b"a"), b"1");
    }

    #[test]
    fn bulk_write_stops_on_first_missing_key_but_keeps_earlier_writes() {
        let t = table();
        t.update(&b"a".to_vec(), b"1".to_vec());

        let result = t.bulk_write(vec![
            (b"a".to_vec(), b"10".to_vec()),
            (b"missing".to_vec(), b"20".to_vec()),
        ]);
        assert!(result.is_err());
    }

    // S5 from spec.md §8: an externally held row lock blocks a transaction
    // that touches it until the lock is released.
    #[test]
    fn transaction_blocked_by_an_externally_held_row_lock_then_succeeds() {
        let t = table();
        t.update(&b"r1".to_vec(), b"1".to_vec());
        t.update(&b"r2".to_vec(), b"2".to_vec());

        let r1 = t.0.main.find(b"r1").value();
        assert!(r1.get_lock(50));

        let result = t.transaction(vec![
            (b"r1".to_vec(), b"10".to_vec()),
            (b"r2".to_vec(), b"20".to_vec()),
        ]);
        assert!(result.is_err());
        assert_eq!(t.read(b"r1"), b"1");
        assert_eq!(t.read(b"r2"), b"2");

        r1.unlock();

        let result = t.transaction(vec![
            (b"r1".to_vec(), b"10".to_vec()),
            (b"r2".to_vec(), b"20".to_vec()),
        ]);
        assert!(result.is_ok());

        let mut it1 = t.find(b"r1");
        let mut it2 = t.find(b"r2");
        assert_eq!(it1.read(), b"10");
        assert_eq!(it2.read(), b"20");
        it1.advance();
        it2.advance();
    }

    // S6 from spec.md §8: 1000 keys, 600 erased, compacted; 400 survivors
    // stay readable and `size()` reflects exactly them.
    #[test]
    fn compaction_at_scale_keeps_survivors_and_drops_erased() {
        let t = table();
        for i in 0..1000u32 {
            t.update(&format!("k{i:04}").into_bytes(), i.to_string().into_bytes());
        }
        for i in 0..600u32 {
            assert!(t.erase(&format!("k{i:04}").into_bytes()));
        }

        t.compact();
        for _ in 0..200 {
            if t.0.main.size() == 400 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(t.0.main.size(), 400);
        for i in 0..600u32 {
            assert!(!t.exist(&format!("k{i:04}").into_bytes()));
        }
        for i in 600..1000u32 {
            assert_eq!(t.read(&format!("k{i:04}").into_bytes()), i.to_string().into_bytes());
        }
    }

    #[test]
    fn compaction_reclaims_erased_entries_and_stays_readable() {
        let t = table();
        t.update(&b"a".to_vec(), b"1".to_vec());
        t.update(&b"b".to_vec(), b"2".to_vec());
        t.erase(&b"a".to_vec());

        t.compact();
        // The background thread runs to Idle on its own; give it a moment.
        for _ in 0..50 {
            if !t.exist(b"a") && t.exist(b"b") {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert!(!t.exist(b"a"));
        assert_eq!(t.read(b"b"), b"2");

        // New writes during/after the cycle remain visible either way.
        t.update(&b"c".to_vec(), b"3".to_vec());
        for _ in 0..50 {
            if t.read(b"c") == b"3" {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(t.read(b"c"), b"3");
    }
}
