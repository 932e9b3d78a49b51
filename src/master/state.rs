//! Shared application state injected into every axum handler.

use std::sync::Arc;

use crate::domain::ports::{BlobStorePort, ResultsStorePort, TaskQueuePort};

pub struct AppState {
    pub results_store: Arc<dyn ResultsStorePort>,
    pub task_queue: Arc<dyn TaskQueuePort>,
    pub blob_store: Arc<dyn BlobStorePort>,
}

pub type SharedState = Arc<AppState>;
