//! AWS S3 blob storage.
//!
//! Objects live under `s3://{bucket}/{prefix}/{key}`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

pub struct S3Blobs {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Blobs {
    /// Create a new S3 blob store.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET")
            .map_err(|_| AppError::config("S3_BUCKET is required for S3 storage"))?;
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "harvester".to_string());

        Ok(Self::new(client, bucket, prefix))
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl BlobStore for S3Blobs {
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = self.object_key(key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::storage(format!("s3 read {object_key}: {e}")))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::debug!("No existing object at {}", self.location(key));
                    Ok(None)
                } else {
                    Err(AppError::storage(format!("s3 read {object_key}: {service_err}")))
                }
            }
        }
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::storage(format!("s3 write {object_key}: {e}")))?;

        log::debug!("Wrote {} bytes to {}", bytes.len(), self.location(key));
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key(key))
    }
}
