//! Represents a file reference awaiting (or done with) migration.

use super::status::MigrationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single migration-eligible record.
///
/// `local_path`, `original_file_name` and `declared_size_bytes` are owned by
/// whoever created the record; the engine only reads them. Everything else is
/// written by the migration state machine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MigrationRecord {
    /// Identifier assigned by the record store.
    pub id: i64,

    /// Path of the source file, relative to the configured root or absolute.
    pub local_path: String,

    /// File name as uploaded by the user; drives the remote key extension
    /// and content type.
    pub original_file_name: String,

    /// Size recorded when the file was created.
    pub declared_size_bytes: Option<i64>,

    /// Creation time, used for FIFO selection.
    pub created_at: DateTime<Utc>,

    /// Last time the record was persisted.
    pub updated_at: DateTime<Utc>,

    /// Current lifecycle state. A missing status column reads as `Pending`.
    pub status: MigrationStatus,

    /// Failed attempts so far. Never reset.
    pub attempts: u32,

    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Only meaningful while `status == Retry`.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Hex digest of the file content.
    pub content_hash: Option<String>,

    /// On-disk size equalled `declared_size_bytes` at hash time.
    pub size_verified: bool,

    /// `<local_path>.backup` was written.
    pub backup_created: bool,

    /// The source file is confirmed gone from local disk.
    pub local_file_deleted: bool,

    /// Object-store key. Assigned once and reused by later attempts.
    pub remote_key: Option<String>,

    /// When the upload last succeeded.
    pub uploaded_at: Option<DateTime<Utc>>,

    /// Diagnostic for the latest transition; cleared on success.
    pub last_error: Option<String>,
}

impl MigrationRecord {
    /// Set the status and diagnostic together, as every transition does.
    pub fn transition(&mut self, status: MigrationStatus, last_error: Option<String>) {
        self.status = status;
        self.last_error = last_error;
        if status != MigrationStatus::Retry {
            self.next_retry_at = None;
        }
    }
}

/// Fields supplied by the collaborator that creates a record.
#[derive(Deserialize, Clone, Debug)]
pub struct NewRecord {
    pub local_path: String,
    pub original_file_name: String,
    pub declared_size_bytes: Option<i64>,
    /// Defaults to the insertion time.
    pub created_at: Option<DateTime<Utc>>,
}
