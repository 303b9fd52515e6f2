//! S3-compatible backend built on the AWS SDK.

use super::{ObjectStore, ObjectStoreError, ObjectStoreResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
};
use bytes::Bytes;
use tracing::{debug, info};

/// Connection settings for an S3-compatible store.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Custom endpoint for non-AWS stores. Forces path-style addressing.
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS environment plus `settings`.
    pub async fn connect(settings: &S3Settings) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        if let (Some(access_key), Some(secret_key)) = (
            non_empty(&settings.access_key),
            non_empty(&settings.secret_key),
        ) {
            builder = builder.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }

        if let Some(endpoint) = non_empty(&settings.endpoint) {
            info!(%endpoint, "using custom S3 endpoint with path-style addressing");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }
}

fn request_error<E>(err: E) -> ObjectStoreError
where
    E: std::error::Error,
{
    ObjectStoreError::Request(format!("{}", DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> ObjectStoreResult<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(request_error)?;
        debug!(bucket = %self.bucket, key, size, "uploaded object to S3");
        Ok(())
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(request_error(err)),
        }
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Bytes> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(ObjectStoreError::NotFound {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(request_error(err)),
        };

        let body = output.body.collect().await.map_err(request_error)?;
        Ok(body.into_bytes())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(request_error)?;
        Ok(())
    }
}
