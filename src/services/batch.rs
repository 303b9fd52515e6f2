//! src/services/batch.rs
//!
//! Batch Orchestrator: selects new and due-for-retry records up front and
//! drives the state machine over each with bounded concurrency. One record's
//! failure (error or panic) never stops the rest of the batch.

use crate::{
    models::MigrationRecord,
    services::{migration_service::MigrationService, stats},
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{collections::HashSet, time::Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    service: MigrationService,
    concurrency: usize,
    stale_after: Option<Duration>,
}

impl BatchOrchestrator {
    pub fn new(service: MigrationService) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            service,
            concurrency: cpus,
            stale_after: None,
        }
    }

    /// Upper bound on parallel attempts; the batch size also caps it.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Also pick up records stuck in an intermediate state for this long.
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Process up to `batch_size` eligible and up to `batch_size` due
    /// records. Never fails: selection and per-record errors are logged and
    /// counted.
    pub async fn run_batch(&self, batch_size: u32) -> BatchSummary {
        let work = self.select(batch_size).await;
        if work.is_empty() {
            debug!("no records to migrate");
            return BatchSummary::default();
        }

        let concurrency = self.concurrency.min(batch_size.max(1) as usize);
        let results = stream::iter(work)
            .map(|record| {
                let service = self.service.clone();
                async move {
                    let record_id = record.id;
                    let handle = tokio::spawn(async move {
                        let mut record = record;
                        service.attempt(&mut record).await
                    });
                    (record_id, handle.await)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut summary = BatchSummary {
            attempted: results.len(),
            succeeded: 0,
        };
        for (record_id, result) in results {
            match result {
                Ok(Ok(report)) if report.succeeded() => summary.succeeded += 1,
                Ok(Ok(report)) => {
                    debug!(record_id, outcome = ?report.outcome, "record not migrated");
                }
                Ok(Err(err)) => {
                    error!(record_id, error = %err, "unexpected error during migration attempt");
                }
                Err(join_err) => {
                    error!(record_id, error = %join_err, "migration attempt aborted");
                }
            }
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            "migration batch finished: {}/{} records migrated",
            summary.succeeded,
            summary.attempted
        );
        self.log_stats().await;
        summary
    }

    /// Fetch every set before any attempt starts, so no record is seen twice.
    async fn select(&self, batch_size: u32) -> Vec<MigrationRecord> {
        let records = self.service.records();
        let now = self.service.clock().now();

        let eligible = records.find_eligible(batch_size).await.unwrap_or_else(|err| {
            error!(error = %err, "failed to query eligible records");
            Vec::new()
        });
        if !eligible.is_empty() {
            info!("found {} records ready for migration", eligible.len());
        }

        let due = records
            .find_due_for_retry(now, batch_size)
            .await
            .unwrap_or_else(|err| {
                error!(error = %err, "failed to query records due for retry");
                Vec::new()
            });
        if !due.is_empty() {
            info!("found {} records due for retry", due.len());
        }

        let stalled = match self.stale_after {
            Some(stale_after) => {
                let cutoff = TimeDelta::from_std(stale_after)
                    .ok()
                    .and_then(|age| now.checked_sub_signed(age))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let stalled = records
                    .find_stalled(cutoff, batch_size)
                    .await
                    .unwrap_or_else(|err| {
                        error!(error = %err, "failed to query stalled records");
                        Vec::new()
                    });
                if !stalled.is_empty() {
                    warn!("resuming {} stalled records", stalled.len());
                }
                stalled
            }
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        eligible
            .into_iter()
            .chain(due)
            .chain(stalled)
            .filter(|record| seen.insert(record.id))
            .collect()
    }

    async fn log_stats(&self) {
        match stats::collect(self.service.records().as_ref()).await {
            Ok(stats) => info!(
                total = stats.total,
                pending = stats.pending,
                in_progress = stats.in_progress,
                completed = stats.completed,
                failed = stats.failed,
                retry = stats.retry,
                "migration statistics"
            ),
            Err(err) => warn!(error = %err, "failed to collect migration statistics"),
        }
    }
}
