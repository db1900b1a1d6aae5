use crate::table::Inner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The table's compaction state.
///
/// Transitions only ever go `Idle -> Compacting -> Draining -> Idle`, each
/// one driven by [`run`] running on its own background thread. A
/// `compact()` call that finds anything but `Idle` is a no-op: only one
/// compaction cycle runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum CompactionStatus {
    Idle = 0,
    Compacting = 1,
    Draining = 2,
}

impl CompactionStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CompactionStatus::Idle,
            1 => CompactionStatus::Compacting,
            2 => CompactionStatus::Draining,
            other => unreachable!("invalid CompactionStatus byte {other}"),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one full compaction cycle against `inner`, polling every 100ms
/// while waiting for in-flight operations to drain. Spawned as a detached
/// background thread by [`crate::table::Table::compact`]; by the time this
/// returns, `inner.status` is back to `Idle`.
pub(crate) fn run(inner: Arc<Inner>) {
    let deleted_before = inner.deleted_nums.load(Ordering::Acquire);

    inner.main.compact();
    log::info!("compaction: main index physically compacted");

    inner
        .status
        .store(CompactionStatus::Draining as u8, Ordering::Release);
    log::info!("compaction: Compacting -> Draining");

    wait_for_quiescence(&inner);

    inner.main.merge(&inner.buffer);
    inner.deleted_nums.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        Some(n.saturating_sub(deleted_before))
    }).ok();
    log::info!("compaction: buffer merged into main");

    inner
        .status
        .store(CompactionStatus::Idle as u8, Ordering::Release);
    log::info!("compaction: Draining -> Idle");

    wait_for_quiescence(&inner);

    inner.buffer.clear();
    log::info!("compaction: buffer cleared");
}

fn wait_for_quiescence(inner: &Inner) {
    while inner.coordinator.newest_version() != inner.coordinator.lowest_version() {
        thread::sleep(POLL_INTERVAL);
    }
}
