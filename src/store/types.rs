//! Bookkeeping types for the vehicle store.

use chrono::{DateTime, Utc};

/// Statistics for a single sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    /// Vehicles whose processing failed in either pass.
    pub failed: u64,
    pub archives_built: u64,
    /// Whether the run stopped early on a shutdown request.
    pub interrupted: bool,
}

/// Summary of the store, printed by the `status` command.
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub vehicles: u64,
    /// Vehicles carrying an artifact reference.
    pub with_archive: u64,
    pub accessories: u64,
    pub images: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    /// Counters of the most recent completed run.
    pub last_run: Option<SyncRunStats>,
}
