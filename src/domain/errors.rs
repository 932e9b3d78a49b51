//! Domain-level error types shared by services and adapters.

use thiserror::Error;

/// Errors surfaced by the task queue broker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    Connection(String),

    #[error("queue operation failed: {0}")]
    Operation(String),

    #[error("reserved entry {0} no longer exists (touch/delete/release on an expired handle)")]
    UnknownHandle(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the results store (the attempt-row and duration tables).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the blob store (logs/artifacts).
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("upload failed for key {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to presign url for key {key}: {source}")]
    Presign {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type BlobResult<T> = Result<T, BlobError>;
