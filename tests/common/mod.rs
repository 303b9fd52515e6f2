#![allow(dead_code)]
//! Shared harness: in-memory SQLite, a temp upload root, a fault-injecting
//! object store and a manual clock.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use material_migrator::{
    models::{MigrationRecord, MigrationStatus, NewRecord},
    services::{
        batch::BatchOrchestrator,
        local_files::LocalFiles,
        migration_service::MigrationService,
        object_store::{ObjectStore, ObjectStoreError, ObjectStoreResult},
        record_store::{
            RecordStore, RecordStoreError, RecordStoreResult, SqliteRecordStore, run_migrations,
        },
        retry::{Clock, ManualClock, RetryPolicy},
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const PANIC_BODY: &[u8] = b"panic-on-upload";

/// In-memory object store with switches for the failure modes the engine
/// must survive.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    /// Every successful put, in order: (key, body).
    puts: Mutex<Vec<(String, Bytes)>>,
    pub fail_puts: AtomicBool,
    /// Accept puts but report the object as absent on HEAD.
    pub lose_objects: AtomicBool,
    pub put_delay: Mutex<Option<Duration>>,
    pub head_delay: Mutex<Option<Duration>>,
    /// Puts entered, counted before any delay.
    puts_started: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_lose_objects(&self, lose: bool) {
        self.lose_objects.store(lose, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.put_delay.lock().unwrap() = delay;
    }

    pub fn set_head_delay(&self, delay: Option<Duration>) {
        *self.head_delay.lock().unwrap() = delay;
    }

    pub fn puts_started(&self) -> usize {
        self.puts_started.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn put_log(&self) -> Vec<(String, Bytes)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        "test-bucket"
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> ObjectStoreResult<()> {
        self.puts_started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if body.as_ref() == PANIC_BODY {
            panic!("object store client crashed");
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Request("503 Service Unavailable".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.clone());
        self.puts.lock().unwrap().push((key.to_string(), body));
        Ok(())
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<bool> {
        let delay = *self.head_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.lose_objects.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Bytes> {
        self.object(key).ok_or_else(|| ObjectStoreError::NotFound {
            bucket: "test-bucket".into(),
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Record store that delegates to SQLite but refuses to save chosen records.
pub struct FaultyRecordStore {
    inner: SqliteRecordStore,
    refuse_saves: Mutex<HashSet<i64>>,
}

impl FaultyRecordStore {
    pub fn new(inner: SqliteRecordStore) -> Self {
        Self {
            inner,
            refuse_saves: Mutex::new(HashSet::new()),
        }
    }

    pub fn refuse_saves_for(&self, id: i64) {
        self.refuse_saves.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl RecordStore for FaultyRecordStore {
    async fn insert(&self, record: NewRecord) -> RecordStoreResult<MigrationRecord> {
        self.inner.insert(record).await
    }

    async fn get(&self, id: i64) -> RecordStoreResult<Option<MigrationRecord>> {
        self.inner.get(id).await
    }

    async fn find_eligible(&self, limit: u32) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.inner.find_eligible(limit).await
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.inner.find_due_for_retry(now, limit).await
    }

    async fn find_stalled(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.inner.find_stalled(before, limit).await
    }

    async fn find_by_status(
        &self,
        status: MigrationStatus,
        limit: u32,
    ) -> RecordStoreResult<Vec<MigrationRecord>> {
        self.inner.find_by_status(status, limit).await
    }

    async fn save(&self, record: &MigrationRecord) -> RecordStoreResult<()> {
        if self.refuse_saves.lock().unwrap().contains(&record.id) {
            return Err(RecordStoreError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.save(record).await
    }

    async fn count_by_status(&self, status: MigrationStatus) -> RecordStoreResult<u64> {
        self.inner.count_by_status(status).await
    }

    async fn count(&self) -> RecordStoreResult<u64> {
        self.inner.count().await
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub root: PathBuf,
    pub records: Arc<SqliteRecordStore>,
    /// What the engine writes through; wraps `records`.
    pub faulty: Arc<FaultyRecordStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub clock: Arc<ManualClock>,
    pub service: MigrationService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_timeout(None).await
    }

    pub async fn with_timeout(network_timeout: Option<Duration>) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        run_migrations(&pool).await.expect("schema");

        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("uploads");
        std::fs::create_dir_all(&root).expect("upload root");

        let records = Arc::new(SqliteRecordStore::new(Arc::new(pool)));
        let faulty = Arc::new(FaultyRecordStore::new(records.as_ref().clone()));
        let objects = Arc::new(MemoryObjectStore::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let service = MigrationService::new(
            faulty.clone(),
            objects.clone(),
            LocalFiles::new(root.clone()),
            RetryPolicy::default(),
            clock.clone(),
        )
        .with_network_timeout(network_timeout);

        Self {
            dir,
            root,
            records,
            faulty,
            objects,
            clock,
            service,
        }
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(self.service.clone()).with_concurrency(4)
    }

    /// Write `content` under the upload root and register it with a
    /// matching declared size.
    pub async fn add_file(&self, relative: &str, content: &[u8]) -> MigrationRecord {
        self.add_file_at(relative, content, self.clock.now()).await
    }

    pub async fn add_file_at(
        &self,
        relative: &str,
        content: &[u8],
        created_at: DateTime<Utc>,
    ) -> MigrationRecord {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        self.records
            .insert(NewRecord {
                local_path: relative.to_string(),
                original_file_name: relative.rsplit('/').next().unwrap().to_string(),
                declared_size_bytes: Some(content.len() as i64),
                created_at: Some(created_at),
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: i64) -> MigrationRecord {
        self.records.get(id).await.unwrap().expect("record exists")
    }

    pub async fn all(&self) -> Vec<MigrationRecord> {
        let total = self.records.count().await.unwrap() as i64;
        let mut out = Vec::new();
        for id in 1..=total {
            if let Some(record) = self.records.get(id).await.unwrap() {
                out.push(record);
            }
        }
        out
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Invariants every persisted record must satisfy at rest.
pub fn assert_record_invariants(record: &MigrationRecord, max_attempts: u32) {
    match record.status {
        MigrationStatus::Completed => {
            assert!(record.remote_key.is_some(), "completed without key: {record:?}");
            let cleanup_pending = record
                .last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("local cleanup failed"));
            assert!(
                record.local_file_deleted || cleanup_pending,
                "completed without delete: {record:?}"
            );
            assert!(record.next_retry_at.is_none(), "completed with retry: {record:?}");
        }
        MigrationStatus::Retry => {
            let next = record.next_retry_at.expect("retry without next_retry_at");
            let last = record.last_attempt_at.expect("retry without last attempt");
            assert!(next > last, "next retry not in the future: {record:?}");
            assert!(record.last_error.is_some());
        }
        MigrationStatus::Failed => assert!(record.last_error.is_some()),
        _ => {}
    }
    assert!(record.attempts <= max_attempts, "attempts overflow: {record:?}");
}
