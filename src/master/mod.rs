//! Master: the HTTP front door slaves reserve work from and clients submit
//! jobs through.

pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::domain::ports::{BlobStorePort, ResultsStorePort, TaskQueuePort};
use crate::infrastructure::auth::bypass::BypassList;
use crate::infrastructure::auth::middleware::{require_auth, AuthState};
use crate::domain::models::config::MasterConfig;

pub use state::{AppState, SharedState};

/// Assemble the master's router: mutating endpoints (`submit_job`,
/// `retry_task`, `cancel_job`) require Digest auth; read-only status
/// endpoints do not, since they carry no capability to change state.
pub fn build_router(
    config: &MasterConfig,
    results_store: Arc<dyn ResultsStorePort>,
    task_queue: Arc<dyn TaskQueuePort>,
    blob_store: Arc<dyn BlobStorePort>,
) -> Router {
    let app_state: SharedState = Arc::new(AppState {
        results_store,
        task_queue,
        blob_store,
    });

    let bypass = BypassList::parse(&config.auth_bypass_cidrs).unwrap_or_else(|_| BypassList::parse(&[]).unwrap());
    let auth_state = Arc::new(AuthState::new(config.auth_accounts.clone(), bypass, &config.auth_realm));

    let write_routes = Router::new()
        .route("/submit_job", post(handlers::submit_job))
        .route("/retry_task", post(handlers::retry_task))
        .route("/cancel_job", post(handlers::cancel_job))
        .route_layer(axum::middleware::from_fn_with_state(auth_state, require_auth));

    let read_routes = Router::new()
        .route("/job_status", get(handlers::job_status))
        .route("/tasks", get(handlers::tasks))
        .route("/queue_stats", get(handlers::queue_stats));

    let dashboard_stubs = Router::new()
        .route("/", get(handlers::dashboard_stub))
        .route("/job", get(handlers::dashboard_stub))
        .route("/trace", get(handlers::dashboard_stub));

    write_routes.merge(read_routes).merge(dashboard_stubs).with_state(app_state)
}
