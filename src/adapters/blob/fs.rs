//! Filesystem-backed `BlobStorePort`, used in local/dev/test configurations
//! where no S3 bucket is configured.

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::domain::errors::{BlobError, BlobResult};
use crate::domain::ports::BlobStorePort;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStorePort for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_disposition: Option<&str>) -> BlobResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| BlobError::Upload {
                key: key.to_string(),
                source: e.into(),
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| BlobError::Upload {
            key: key.to_string(),
            source: e.into(),
        })
    }

    async fn presigned_url(&self, key: &str, _ttl_secs: u64) -> BlobResult<Url> {
        let path = self.path_for(key);
        Url::from_file_path(&path).map_err(|()| BlobError::Presign {
            key: key.to_string(),
            source: anyhow::anyhow!("path {} is not a valid file:// URL", path.display()),
        })
    }
}
