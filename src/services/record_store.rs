//! src/services/record_store.rs
//!
//! Record Store: persisted collection of migration records. The engine only
//! sees the `RecordStore` trait; `SqliteRecordStore` is the production
//! adapter. Status strings and millisecond timestamps never leave this file.

use crate::models::{MigrationRecord, MigrationStatus, NewRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Schema applied by `--migrate` and by the test harness.
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const SELECT_COLUMNS: &str = "SELECT id, local_path, original_file_name, declared_size_bytes,
        created_at, updated_at, migration_status, migration_attempts,
        migration_last_attempt, migration_next_retry, content_hash, size_verified,
        backup_created, local_file_deleted, remote_key, uploaded_at, last_error
     FROM materials";

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("record {id} has an invalid `{column}` value: {reason}")]
    Corrupt {
        id: i64,
        column: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

/// Query and update operations the migration engine needs from the database.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record with no migration status.
    async fn insert(&self, record: NewRecord) -> RecordStoreResult<MigrationRecord>;

    async fn get(&self, id: i64) -> RecordStoreResult<Option<MigrationRecord>>;

    /// Records never attempted, oldest first.
    async fn find_eligible(&self, limit: u32) -> RecordStoreResult<Vec<MigrationRecord>>;

    /// `Retry` records whose `next_retry_at <= now`, earliest first.
    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>>;

    /// Records left in an intermediate state and untouched since `before`.
    async fn find_stalled(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>>;

    /// Records in `status`, in the order an operator wants to read them:
    /// failures by most recent attempt, completions by most recent upload,
    /// pending and retry in processing order, the rest by last update.
    async fn find_by_status(
        &self,
        status: MigrationStatus,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>>;

    /// Whole-row write keyed by `record.id`.
    async fn save(&self, record: &MigrationRecord) -> RecordStoreResult<()>;

    /// `Pending` also counts records with no status.
    async fn count_by_status(&self, status: MigrationStatus) -> RecordStoreResult<u64>;

    async fn count(&self) -> RecordStoreResult<u64>;
}

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn fetch_where(
        &self,
        clause: &str,
        binds: &[i64],
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause} LIMIT ?");
        let mut query = sqlx::query_as::<_, MaterialRow>(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&*self.db).await?;
        rows.into_iter().map(MigrationRecord::try_from).collect()
    }
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> RecordStoreResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} schema statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, record: NewRecord) -> RecordStoreResult<MigrationRecord> {
        let created_at = record.created_at.unwrap_or_else(Utc::now);
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO materials (local_path, original_file_name, declared_size_bytes,
                                    created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&record.local_path)
        .bind(&record.original_file_name)
        .bind(record.declared_size_bytes)
        .bind(created_at.timestamp_millis())
        .bind(created_at.timestamp_millis())
        .fetch_one(&*self.db)
        .await?;

        self.get(id).await?.ok_or(RecordStoreError::NotFound(id))
    }

    async fn get(&self, id: i64) -> RecordStoreResult<Option<MigrationRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query_as::<_, MaterialRow>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        row.map(MigrationRecord::try_from).transpose()
    }

    async fn find_eligible(&self, limit: u32) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.fetch_where(
            "(migration_status IS NULL OR migration_status = 'PENDING')
               AND remote_key IS NULL
             ORDER BY created_at ASC, id ASC",
            &[],
            limit,
        )
        .await
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.fetch_where(
            "migration_status = 'RETRY' AND migration_next_retry <= ?
             ORDER BY migration_next_retry ASC, id ASC",
            &[now.timestamp_millis()],
            limit,
        )
        .await
    }

    async fn find_stalled(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.fetch_where(
            "migration_status IN ('IN_PROGRESS', 'BACKUP_CREATED', 'VERIFIED', 'LOCAL_DELETED')
               AND updated_at < ?
             ORDER BY updated_at ASC, id ASC",
            &[before.timestamp_millis()],
            limit,
        )
        .await
    }

    async fn find_by_status(
        &self,
        status: MigrationStatus,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        let clause = match status {
            MigrationStatus::Pending => {
                "(migration_status IS NULL OR migration_status = 'PENDING')
                 ORDER BY created_at ASC, id ASC"
            }
            MigrationStatus::Retry => {
                "migration_status = 'RETRY'
                 ORDER BY migration_next_retry ASC, id ASC"
            }
            MigrationStatus::Failed => {
                "migration_status = 'FAILED'
                 ORDER BY migration_last_attempt DESC, id DESC"
            }
            MigrationStatus::Completed => {
                "migration_status = 'COMPLETED'
                 ORDER BY uploaded_at DESC, id DESC"
            }
            MigrationStatus::InProgress => {
                "migration_status = 'IN_PROGRESS' ORDER BY updated_at DESC, id DESC"
            }
            MigrationStatus::BackupCreated => {
                "migration_status = 'BACKUP_CREATED' ORDER BY updated_at DESC, id DESC"
            }
            MigrationStatus::Verified => {
                "migration_status = 'VERIFIED' ORDER BY updated_at DESC, id DESC"
            }
            MigrationStatus::LocalDeleted => {
                "migration_status = 'LOCAL_DELETED' ORDER BY updated_at DESC, id DESC"
            }
        };
        self.fetch_where(clause, &[], limit).await
    }

    async fn save(&self, record: &MigrationRecord) -> RecordStoreResult<()> {
        let result = sqlx::query(
            "UPDATE materials SET
                updated_at = ?,
                migration_status = ?,
                migration_attempts = ?,
                migration_last_attempt = ?,
                migration_next_retry = ?,
                content_hash = ?,
                size_verified = ?,
                backup_created = ?,
                local_file_deleted = ?,
                remote_key = ?,
                uploaded_at = ?,
                last_error = ?
             WHERE id = ?",
        )
        .bind(record.updated_at.timestamp_millis())
        .bind(record.status.as_str())
        .bind(i64::from(record.attempts))
        .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
        .bind(record.next_retry_at.map(|t| t.timestamp_millis()))
        .bind(record.content_hash.as_deref())
        .bind(record.size_verified)
        .bind(record.backup_created)
        .bind(record.local_file_deleted)
        .bind(record.remote_key.as_deref())
        .bind(record.uploaded_at.map(|t| t.timestamp_millis()))
        .bind(record.last_error.as_deref())
        .bind(record.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::NotFound(record.id));
        }
        debug!(
            record_id = record.id,
            status = record.status.as_str(),
            "record saved"
        );
        Ok(())
    }

    async fn count_by_status(&self, status: MigrationStatus) -> RecordStoreResult<u64> {
        let count: i64 = if status == MigrationStatus::Pending {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM materials
                 WHERE migration_status IS NULL OR migration_status = 'PENDING'",
            )
            .fetch_one(&*self.db)
            .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM materials WHERE migration_status = ?")
                .bind(status.as_str())
                .fetch_one(&*self.db)
                .await?
        };
        Ok(count.max(0) as u64)
    }

    async fn count(&self) -> RecordStoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM materials")
            .fetch_one(&*self.db)
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// Raw `materials` row.
#[derive(FromRow)]
struct MaterialRow {
    id: i64,
    local_path: String,
    original_file_name: String,
    declared_size_bytes: Option<i64>,
    created_at: i64,
    updated_at: i64,
    migration_status: Option<String>,
    migration_attempts: i64,
    migration_last_attempt: Option<i64>,
    migration_next_retry: Option<i64>,
    content_hash: Option<String>,
    size_verified: bool,
    backup_created: bool,
    local_file_deleted: bool,
    remote_key: Option<String>,
    uploaded_at: Option<i64>,
    last_error: Option<String>,
}

impl TryFrom<MaterialRow> for MigrationRecord {
    type Error = RecordStoreError;

    fn try_from(row: MaterialRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let millis = |column: &'static str, value: i64| {
            DateTime::<Utc>::from_timestamp_millis(value).ok_or(RecordStoreError::Corrupt {
                id,
                column,
                reason: format!("timestamp {value} out of range"),
            })
        };
        let optional_millis = |column: &'static str, value: Option<i64>| {
            value.map(|v| millis(column, v)).transpose()
        };

        let status = match row.migration_status.as_deref() {
            None => MigrationStatus::Pending,
            Some(raw) => raw.parse().map_err(|err| RecordStoreError::Corrupt {
                id,
                column: "migration_status",
                reason: format!("{err}"),
            })?,
        };
        let attempts =
            u32::try_from(row.migration_attempts).map_err(|_| RecordStoreError::Corrupt {
                id,
                column: "migration_attempts",
                reason: format!("{} is not a valid attempt count", row.migration_attempts),
            })?;

        Ok(MigrationRecord {
            id,
            local_path: row.local_path,
            original_file_name: row.original_file_name,
            declared_size_bytes: row.declared_size_bytes,
            created_at: millis("created_at", row.created_at)?,
            updated_at: millis("updated_at", row.updated_at)?,
            status,
            attempts,
            last_attempt_at: optional_millis("migration_last_attempt", row.migration_last_attempt)?,
            next_retry_at: optional_millis("migration_next_retry", row.migration_next_retry)?,
            content_hash: row.content_hash,
            size_verified: row.size_verified,
            backup_created: row.backup_created,
            local_file_deleted: row.local_file_deleted,
            remote_key: row.remote_key,
            uploaded_at: optional_millis("uploaded_at", row.uploaded_at)?,
            last_error: row.last_error,
        })
    }
}
