//! src/services/object_store/disk.rs
//!
//! DiskObjectStore: S3-like object storage on local disk. Payloads live
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`; writes go to a
//! temp file, are fsynced and then renamed into place.

use super::{ObjectStore, ObjectStoreError, ObjectStoreResult};
use crate::services::hashing;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            bucket: bucket.into(),
        }
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> ObjectStoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard from MD5(bucket/key), keeping directories small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove empty directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.bucket_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn write_durably(tmp_path: &Path, body: &[u8]) -> io::Result<()> {
        let mut file = File::create(tmp_path).await?;
        file.write_all(body).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> ObjectStoreResult<()> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = Self::write_durably(&tmp_path, &body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }

        debug!(
            bucket = %self.bucket,
            key,
            content_type,
            size = body.len(),
            etag = %hashing::digest(&body),
            "stored object on disk"
        );
        Ok(())
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<bool> {
        self.ensure_key_safe(key)?;
        match fs::metadata(self.object_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Bytes> {
        self.ensure_key_safe(key)?;
        match fs::read(self.object_path(key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            }),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}
