//! S3-backed `BlobStorePort`: stdout/stderr captures and artifact archives.

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use url::Url;

use crate::domain::errors::BlobError;
use crate::domain::ports::BlobStorePort;

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStorePort for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_disposition: Option<&str>) -> crate::domain::errors::BlobResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));
        if let Some(disposition) = content_disposition {
            request = request.content_disposition(disposition);
        }
        request.send().await.map_err(|e| BlobError::Upload {
            key: key.to_string(),
            source: e.into(),
        })?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl_secs: u64) -> crate::domain::errors::BlobResult<Url> {
        let presign_config =
            PresigningConfig::expires_in(std::time::Duration::from_secs(ttl_secs)).map_err(|e| BlobError::Presign {
                key: key.to_string(),
                source: e.into(),
            })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| BlobError::Presign {
                key: key.to_string(),
                source: e.into(),
            })?;

        Url::parse(presigned.uri()).map_err(|e| BlobError::Presign {
            key: key.to_string(),
            source: e.into(),
        })
    }
}
