//! Blob store port: durable storage for captured stdout/stderr and packaged
//! artifact archives.

use async_trait::async_trait;
use url::Url;

use crate::domain::errors::BlobResult;

/// Port implemented by the blob store (S3 in production, filesystem for
/// local/dev/test).
#[async_trait]
pub trait BlobStorePort: Send + Sync {
    /// Upload `bytes` under `key`. `content_disposition` (when set) is
    /// forwarded as the object's `Content-Disposition` header so browsers
    /// download archives instead of rendering them inline.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_disposition: Option<&str>) -> BlobResult<()>;

    /// A time-limited URL clients can fetch `key` from directly.
    async fn presigned_url(&self, key: &str, ttl_secs: u64) -> BlobResult<Url>;
}
