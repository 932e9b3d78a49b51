//! Blob store adapters: S3 for production, filesystem for local/dev/test.

pub mod fs;
pub mod s3;

pub use fs::FsBlobStore;
pub use s3::S3BlobStore;
