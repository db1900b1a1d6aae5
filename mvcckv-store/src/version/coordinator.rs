use mvcckv_core::Version;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Mints and tracks the store's version numbers.
///
/// The source keeps a single process-wide coordinator singleton; this
/// workspace instead makes `Coordinator` an ordinary constructible type,
/// one per [`crate::table::Table`], so independent tables (and tests) get
/// independent version sequences rather than contending on global state.
pub struct Coordinator {
    sequence: AtomicU64,
    live_versions: Mutex<BTreeSet<Version>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            live_versions: Mutex::new(BTreeSet::new()),
        }
    }

    /// Allocates a new version, registers it as live, and returns it.
    pub(crate) fn allocate_version(&self) -> Version {
        let version = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.live_versions.lock().unwrap().insert(version);
        log::trace!("allocated version {version}");
        version
    }

    /// The current sequence value, for read-only operations that must not
    /// allocate (and so never register or release a live version).
    pub(crate) fn current_snapshot(&self) -> Version {
        self.sequence.load(Ordering::Acquire)
    }

    /// The most recently allocated version.
    pub fn newest_version(&self) -> Version {
        self.sequence.load(Ordering::Acquire)
    }

    /// The oldest version any in-flight operation might still read at.
    /// Falls back to the current sequence value when nothing is live,
    /// since nothing older could possibly still be observed.
    pub fn lowest_version(&self) -> Version {
        let live = self.live_versions.lock().unwrap();
        live.iter()
            .next()
            .copied()
            .unwrap_or_else(|| self.sequence.load(Ordering::Acquire))
    }

    /// The number of versions currently registered as live.
    pub fn alive_operation_count(&self) -> usize {
        self.live_versions.lock().unwrap().len()
    }

    pub(crate) fn version_release_notify(&self, version: Version) {
        self.live_versions.lock().unwrap().remove(&version);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
