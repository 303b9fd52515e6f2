//! Object Store Client: put/head/get/delete by key within one bucket.
//!
//! The migration engine treats the store as an opaque capability. Backends:
//! - `DiskObjectStore`: S3-like layout on local disk
//! - `S3ObjectStore` (feature `s3`): any S3-compatible endpoint

pub mod disk;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub use disk::DiskObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object store request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every key is resolved against.
    fn bucket(&self) -> &str;

    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> ObjectStoreResult<()>;

    /// `Ok(false)` when the key does not exist.
    async fn head(&self, key: &str) -> ObjectStoreResult<bool>;

    async fn get(&self, key: &str) -> ObjectStoreResult<Bytes>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()>;
}
