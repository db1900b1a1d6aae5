//! Configuration for the index, rows, and the table facade.

/// Auto-compaction trigger threshold, expressed as the fraction of deleted
/// rows that must accumulate before [`crate::table::Table::try_compact`]
/// spawns a background compaction.
///
/// # Example
///
/// ```
/// use mvcckv_store::config::CleanThreshold;
///
/// assert_eq!(CleanThreshold::Medium.percent(), 0.30);
/// assert_eq!(CleanThreshold::Never.percent(), f64::INFINITY);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanThreshold {
    /// Auto-compaction never triggers.
    #[default]
    Never,
    /// Trigger once 15% of rows are deleted.
    Low,
    /// Trigger once 30% of rows are deleted.
    Medium,
    /// Trigger once 50% of rows are deleted.
    High,
}

impl CleanThreshold {
    /// The deleted/size ratio that triggers auto-compaction.
    pub fn percent(self) -> f64 {
        match self {
            CleanThreshold::Never => f64::INFINITY,
            CleanThreshold::Low => 0.15,
            CleanThreshold::Medium => 0.30,
            CleanThreshold::High => 0.50,
        }
    }
}

/// Tunable parameters for the index, rows, and table facade.
///
/// # Example
///
/// ```
/// use mvcckv_store::config::{Config, CleanThreshold};
///
/// let config = Config {
///     max_level: 18,
///     wait_ms: 50,
///     clean_threshold: CleanThreshold::Medium,
/// };
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum tower height of a skip-list node.
    pub max_level: usize,

    /// Default millisecond budget for row writer-lock and transaction-lock
    /// acquisition.
    pub wait_ms: u64,

    /// Auto-compaction trigger threshold.
    pub clean_threshold: CleanThreshold,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_level: 18,
            wait_ms: 50,
            clean_threshold: CleanThreshold::Never,
        }
    }
}
