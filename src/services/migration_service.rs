//! src/services/migration_service.rs
//!
//! Migration State Machine: drives one record through a single attempt:
//! precondition, hash, backup, upload, remote verification, local delete.
//! Status is persisted after every step so a crash leaves the record
//! resumable; a record that already carries a remote key re-uses it, which
//! makes re-uploads overwrite instead of duplicating.

use crate::{
    models::{MigrationRecord, MigrationStatus},
    services::{
        hashing,
        local_files::{LocalFileError, LocalFiles},
        object_store::{ObjectStore, ObjectStoreError, ObjectStoreResult},
        record_store::{RecordStore, RecordStoreError},
        remote_key,
        retry::{Clock, RetryPolicy},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("source file not found: {0}")]
    SourceNotFound(String),
    #[error(transparent)]
    LocalFile(#[from] LocalFileError),
    #[error("object store {op} of `{key}` failed: {source}")]
    ObjectStore {
        op: &'static str,
        key: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("object store {op} of `{key}` timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        key: String,
        timeout: Duration,
    },
    #[error("object `{0}` missing from the object store after upload")]
    RemoteMissing(String),
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),
}

impl MigrationError {
    /// Retryable failures go through the retry scheduler. A missing source
    /// is terminal immediately; record store failures are not classified here
    /// and surface to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::LocalFile(_)
            | MigrationError::ObjectStore { .. }
            | MigrationError::Timeout { .. }
            | MigrationError::RemoteMissing(_) => true,
            MigrationError::SourceNotFound(_) | MigrationError::RecordStore(_) => false,
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;

/// Outcome of a best-effort step. Never fails the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    SizeMismatch { actual: u64, declared: Option<i64> },
    BackupCreated(PathBuf),
    BackupFailed(String),
    LocalDeleted,
    LocalAlreadyAbsent,
    LocalDeleteFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Completed,
    RetryScheduled {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    Failed {
        attempts: u32,
    },
    /// The record was already `Completed` or `Failed`; nothing was done.
    Skipped(MigrationStatus),
}

/// What one attempt did, including its best-effort side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptReport {
    pub record_id: i64,
    pub outcome: AttemptOutcome,
    pub side_effects: Vec<SideEffect>,
}

impl AttemptReport {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            AttemptOutcome::Completed | AttemptOutcome::Skipped(MigrationStatus::Completed)
        )
    }
}

#[derive(Clone)]
pub struct MigrationService {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    files: LocalFiles,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    network_timeout: Option<Duration>,
}

impl MigrationService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        files: LocalFiles,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            objects,
            files,
            policy,
            clock,
            network_timeout: None,
        }
    }

    /// Bound every object-store call. `None` waits indefinitely.
    pub fn with_network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn files(&self) -> &LocalFiles {
        &self.files
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one attempt; `Ok(true)` when the record ends up `Completed`.
    pub async fn attempt_migration(&self, record: &mut MigrationRecord) -> MigrationResult<bool> {
        self.attempt(record).await.map(|report| report.succeeded())
    }

    /// Run one attempt and report what happened.
    ///
    /// Only record store failures are returned as `Err`; every other failure
    /// is persisted on the record as `Retry` or `Failed`.
    pub async fn attempt(&self, record: &mut MigrationRecord) -> MigrationResult<AttemptReport> {
        let mut side_effects = Vec::new();

        if record.status.is_terminal() {
            debug!(
                record_id = record.id,
                status = record.status.as_str(),
                "record already terminal, skipping"
            );
            return Ok(self.report(record, AttemptOutcome::Skipped(record.status), side_effects));
        }

        info!(
            record_id = record.id,
            status = record.status.as_str(),
            attempts = record.attempts,
            "starting migration attempt"
        );

        let path = match self.files.resolve(&record.local_path) {
            Ok(path) => path,
            Err(_) => {
                let err = MigrationError::SourceNotFound(record.local_path.clone());
                return self.fail_permanently(record, err, side_effects).await;
            }
        };

        if !self.files.exists(&path).await {
            let past_verification = record.local_file_deleted
                || matches!(
                    record.status,
                    MigrationStatus::Verified | MigrationStatus::LocalDeleted
                );
            if past_verification && record.remote_key.is_some() {
                // Crashed after deleting the source: only verification is left.
                return self.finish_after_local_delete(record, side_effects).await;
            }
            let err = MigrationError::SourceNotFound(path.display().to_string());
            return self.fail_permanently(record, err, side_effects).await;
        }

        record.last_attempt_at = Some(self.clock.now());
        self.persist(record, MigrationStatus::InProgress, None).await?;

        match self.transfer(record, &path, &mut side_effects).await {
            Ok(()) => Ok(self.report(record, AttemptOutcome::Completed, side_effects)),
            Err(err) if err.is_retryable() => self.handle_failure(record, err, side_effects).await,
            Err(err) => Err(err),
        }
    }

    /// Steps 3-6: hash, backup, upload, verify, delete, complete.
    async fn transfer(
        &self,
        record: &mut MigrationRecord,
        path: &Path,
        side_effects: &mut Vec<SideEffect>,
    ) -> MigrationResult<()> {
        let (content_hash, actual_size) =
            hashing::digest_file(path)
                .await
                .map_err(|source| LocalFileError::Io {
                    op: "hash",
                    path: path.to_path_buf(),
                    source,
                })?;
        record.content_hash = Some(content_hash);
        record.size_verified = hashing::size_matches(actual_size, record.declared_size_bytes);
        if !record.size_verified {
            warn!(
                record_id = record.id,
                actual_size,
                declared_size = ?record.declared_size_bytes,
                "file size differs from declared size"
            );
            side_effects.push(SideEffect::SizeMismatch {
                actual: actual_size,
                declared: record.declared_size_bytes,
            });
        }

        match self.files.backup(path).await {
            Ok(backup) => {
                info!(record_id = record.id, backup = %backup.display(), "backup created");
                record.backup_created = true;
                side_effects.push(SideEffect::BackupCreated(backup));
                self.persist(record, MigrationStatus::BackupCreated, None)
                    .await?;
            }
            Err(err) => {
                warn!(record_id = record.id, error = %err, "backup failed, continuing");
                side_effects.push(SideEffect::BackupFailed(err.to_string()));
            }
        }

        let body = Bytes::from(self.files.read(path).await?);
        let key = record
            .remote_key
            .clone()
            .unwrap_or_else(|| remote_key::generate(self.clock.now(), &record.original_file_name));
        let content_type = remote_key::content_type_for(&record.original_file_name);
        self.call_remote("put", &key, self.objects.put(&key, body, content_type))
            .await?;
        record.remote_key = Some(key.clone());
        record.uploaded_at = Some(self.clock.now());
        info!(record_id = record.id, remote_key = %key, "uploaded to object store");

        self.verify_remote(&key).await?;
        self.persist(record, MigrationStatus::Verified, None).await?;

        let cleanup_error = match self.files.delete(path).await {
            Ok(removed) => {
                record.local_file_deleted = true;
                side_effects.push(if removed {
                    SideEffect::LocalDeleted
                } else {
                    SideEffect::LocalAlreadyAbsent
                });
                info!(record_id = record.id, path = %path.display(), "local file deleted");
                self.persist(record, MigrationStatus::LocalDeleted, None)
                    .await?;
                None
            }
            Err(err) => {
                warn!(record_id = record.id, error = %err, "local delete failed, remote copy is authoritative");
                side_effects.push(SideEffect::LocalDeleteFailed(err.to_string()));
                Some(format!("local cleanup failed: {err}"))
            }
        };

        self.persist(record, MigrationStatus::Completed, cleanup_error)
            .await?;
        info!(record_id = record.id, remote_key = %key, "migration completed");
        Ok(())
    }

    async fn finish_after_local_delete(
        &self,
        record: &mut MigrationRecord,
        mut side_effects: Vec<SideEffect>,
    ) -> MigrationResult<AttemptReport> {
        let Some(key) = record.remote_key.clone() else {
            let err = MigrationError::SourceNotFound(record.local_path.clone());
            return self.fail_permanently(record, err, side_effects).await;
        };
        if !record.local_file_deleted {
            // The delete landed but its status write did not.
            record.local_file_deleted = true;
            side_effects.push(SideEffect::LocalAlreadyAbsent);
        }

        record.last_attempt_at = Some(self.clock.now());
        match self.verify_remote(&key).await {
            Ok(()) => {
                self.persist(record, MigrationStatus::Completed, None)
                    .await?;
                info!(record_id = record.id, remote_key = %key, "migration completed after resume");
                Ok(self.report(record, AttemptOutcome::Completed, side_effects))
            }
            Err(err) => self.handle_failure(record, err, side_effects).await,
        }
    }

    async fn verify_remote(&self, key: &str) -> MigrationResult<()> {
        if self.call_remote("head", key, self.objects.head(key)).await? {
            Ok(())
        } else {
            error!(remote_key = %key, "object missing after upload");
            Err(MigrationError::RemoteMissing(key.to_string()))
        }
    }

    async fn call_remote<T>(
        &self,
        op: &'static str,
        key: &str,
        call: impl Future<Output = ObjectStoreResult<T>>,
    ) -> MigrationResult<T> {
        let result = match self.network_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
                MigrationError::Timeout {
                    op,
                    key: key.to_string(),
                    timeout,
                }
            })?,
            None => call.await,
        };
        result.map_err(|source| MigrationError::ObjectStore {
            op,
            key: key.to_string(),
            source,
        })
    }

    /// Step 7: hand the failure to the retry scheduler and persist the result.
    async fn handle_failure(
        &self,
        record: &mut MigrationRecord,
        err: MigrationError,
        side_effects: Vec<SideEffect>,
    ) -> MigrationResult<AttemptReport> {
        let now = self.clock.now();
        let decision = self.policy.decide(record.attempts, now);
        record.attempts = decision.attempts;
        record.last_attempt_at = Some(now);

        match decision.next_retry_at {
            Some(next_retry_at) if !decision.terminal => {
                record.next_retry_at = Some(next_retry_at);
                let minutes = decision.delay.as_secs() / 60;
                self.persist(
                    record,
                    MigrationStatus::Retry,
                    Some(format!("{err}; retry scheduled in {minutes} minutes")),
                )
                .await?;
                warn!(
                    record_id = record.id,
                    attempts = decision.attempts,
                    max_attempts = self.policy.max_attempts,
                    %next_retry_at,
                    error = %err,
                    "migration attempt failed, retry scheduled"
                );
                Ok(self.report(
                    record,
                    AttemptOutcome::RetryScheduled {
                        attempts: decision.attempts,
                        next_retry_at,
                    },
                    side_effects,
                ))
            }
            _ => {
                self.persist(
                    record,
                    MigrationStatus::Failed,
                    Some(format!("max retry attempts reached: {err}")),
                )
                .await?;
                error!(
                    record_id = record.id,
                    attempts = decision.attempts,
                    error = %err,
                    "migration failed, retry budget exhausted"
                );
                Ok(self.report(
                    record,
                    AttemptOutcome::Failed {
                        attempts: decision.attempts,
                    },
                    side_effects,
                ))
            }
        }
    }

    /// A vanished source will not come back: fail without scheduling a retry.
    async fn fail_permanently(
        &self,
        record: &mut MigrationRecord,
        err: MigrationError,
        side_effects: Vec<SideEffect>,
    ) -> MigrationResult<AttemptReport> {
        error!(record_id = record.id, error = %err, "source file missing, failing record");
        record.attempts = record.attempts.saturating_add(1);
        record.last_attempt_at = Some(self.clock.now());
        self.persist(record, MigrationStatus::Failed, Some(err.to_string()))
            .await?;
        Ok(self.report(
            record,
            AttemptOutcome::Failed {
                attempts: record.attempts,
            },
            side_effects,
        ))
    }

    async fn persist(
        &self,
        record: &mut MigrationRecord,
        status: MigrationStatus,
        last_error: Option<String>,
    ) -> MigrationResult<()> {
        record.transition(status, last_error);
        record.updated_at = self.clock.now();
        self.records.save(record).await?;
        debug!(
            record_id = record.id,
            status = status.description(),
            "status updated"
        );
        Ok(())
    }

    fn report(
        &self,
        record: &MigrationRecord,
        outcome: AttemptOutcome,
        side_effects: Vec<SideEffect>,
    ) -> AttemptReport {
        AttemptReport {
            record_id: record.id,
            outcome,
            side_effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn classification_of_failures() {
        let store_err = MigrationError::ObjectStore {
            op: "put",
            key: "k".into(),
            source: ObjectStoreError::Request("503".into()),
        };
        assert!(store_err.is_retryable());
        assert!(MigrationError::RemoteMissing("k".into()).is_retryable());
        assert!(
            MigrationError::Timeout {
                op: "head",
                key: "k".into(),
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(
            MigrationError::LocalFile(LocalFileError::Io {
                op: "read",
                path: PathBuf::from("/x"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
            .is_retryable()
        );
        assert!(!MigrationError::SourceNotFound("/x".into()).is_retryable());
        assert!(!MigrationError::RecordStore(RecordStoreError::NotFound(1)).is_retryable());
    }

    #[test]
    fn skipped_completed_counts_as_success() {
        let report = AttemptReport {
            record_id: 1,
            outcome: AttemptOutcome::Skipped(MigrationStatus::Completed),
            side_effects: vec![],
        };
        assert!(report.succeeded());
        let failed = AttemptReport {
            outcome: AttemptOutcome::Skipped(MigrationStatus::Failed),
            ..report
        };
        assert!(!failed.succeeded());
    }
}
