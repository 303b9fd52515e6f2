//! Aggregate migration counters.

use serde::Serialize;

/// Snapshot of record counts per status, computed from the record store at
/// read time.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct MigrationStats {
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub retry: u64,
    pub completion_rate: f64,
    pub failure_rate: f64,
}

impl MigrationStats {
    pub fn new(
        total: u64,
        pending: u64,
        in_progress: u64,
        completed: u64,
        failed: u64,
        retry: u64,
    ) -> Self {
        Self {
            total,
            pending,
            in_progress,
            completed,
            failed,
            retry,
            completion_rate: ratio(completed, total),
            failure_rate: ratio(failed, total),
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
