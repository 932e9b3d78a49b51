//! Master HTTP handlers. Write endpoints (submit/retry/cancel) sit behind
//! `infrastructure::auth::require_auth`; read-only JSON endpoints do not.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::models::Task;
use crate::services::priority::{priority_for, sort_tasks_by_duration};
use crate::services::summarize::summarize_tasks;

use super::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct SubmittedTask {
    pub isolate_hash: String,
    pub description: String,
    #[serde(default, rename = "timeout")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub artifact_archive_globs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: String,
    pub tasks: Vec<SubmittedTask>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse { status: "SUCCESS" })
}

/// `POST /submit_job`: materializes one `Task` per entry, orders them
/// longest-known-duration-first, registers all attempts, then enqueues.
pub async fn submit_job(
    State(state): State<SharedState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let mut tasks: Vec<Task> = request
        .tasks
        .into_iter()
        .enumerate()
        .map(|(index, submitted)| Task {
            job_id: request.job_id.clone(),
            task_id: Task::task_id_for(&submitted.isolate_hash, index),
            isolate_hash: submitted.isolate_hash,
            description: submitted.description,
            timeout_secs: submitted.timeout_secs,
            attempt: 0,
            max_retries: submitted.max_retries,
            artifact_archive_globs: submitted.artifact_archive_globs,
        })
        .collect();

    let mut duration_cache = std::collections::HashMap::new();
    for task in &tasks {
        if duration_cache.contains_key(&task.description) {
            continue;
        }
        let duration = state
            .results_store
            .fetch_duration(&task.description)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to fetch duration history");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        duration_cache.insert(task.description.clone(), duration);
    }
    sort_tasks_by_duration(&mut tasks, &|description| duration_cache.get(description).copied().flatten());

    state.results_store.register_tasks(&tasks, Utc::now()).await.map_err(|e| {
        tracing::error!(error = %e, "failed to register tasks");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    for task in &tasks {
        state
            .task_queue
            .submit(task, priority_for(task))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to enqueue task");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
    }

    Ok(ok())
}

/// `POST /retry_task`: called by a slave after a failing attempt. Bumps
/// `attempt`, registers the new row, and enqueues at boosted priority.
/// Idempotent under duplicate submission: the `(job_id, task_id, attempt)`
/// primary key rejects a duplicate insert cleanly.
pub async fn retry_task(State(state): State<SharedState>, Json(mut task): Json<Task>) -> Json<StatusResponse> {
    if task.has_retries_remaining() {
        task.attempt += 1;
        if let Err(e) = state.results_store.register_tasks(std::slice::from_ref(&task), Utc::now()).await {
            tracing::warn!(error = %e, retry_id = %task.retry_id(), "retry registration failed, possibly duplicate");
            return ok();
        }
        if let Err(e) = state.task_queue.submit(&task, priority_for(&task)).await {
            tracing::error!(error = %e, retry_id = %task.retry_id(), "failed to enqueue retry");
        }
    }
    ok()
}

#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub job_id: String,
}

/// `GET /job_status?job_id=...`: aggregate counters for a job.
pub async fn job_status(
    State(state): State<SharedState>,
    Query(query): Query<JobIdQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let rows = state.results_store.fetch_task_rows_for_job(&query.job_id).await.map_err(|e| {
        tracing::error!(error = %e, "failed to fetch job rows");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match summarize_tasks(&rows) {
        Some(summary) => Ok(Json(serde_json::to_value(summary).unwrap())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub job_id: String,
    pub status: Option<String>,
}

/// `GET /tasks?job_id=...&status=failed|succeeded|finished`: per-attempt
/// rows, optionally filtered, with blob keys resolved to presigned links so
/// the client CLI can download them directly.
pub async fn tasks(
    State(state): State<SharedState>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Vec<serde_json::Value>>, StatusCode> {
    let rows = state.results_store.fetch_task_rows_for_job(&query.job_id).await.map_err(|e| {
        tracing::error!(error = %e, "failed to fetch job rows");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let filtered = match query.status.as_deref() {
        None => rows,
        Some("failed") => rows.into_iter().filter(crate::domain::models::task::TaskRecord::is_failed_attempt).collect(),
        Some("succeeded") => rows.into_iter().filter(crate::domain::models::task::TaskRecord::is_succeeded).collect(),
        Some("finished") => rows.into_iter().filter(crate::domain::models::task::TaskRecord::is_finished).collect(),
        Some(_) => return Err(StatusCode::BAD_REQUEST),
    };

    const PRESIGN_TTL_SECS: u64 = 86_400;
    let mut out = Vec::with_capacity(filtered.len());
    for row in filtered {
        let mut value = serde_json::to_value(&row).unwrap();
        let obj = value.as_object_mut().unwrap();
        for (key_field, link_field) in [
            ("stdout_key", "stdout_link"),
            ("stderr_key", "stderr_link"),
            ("artifact_archive_key", "artifact_archive_link"),
        ] {
            if let Some(key) = obj.get(key_field).and_then(|v| v.as_str()).map(str::to_string) {
                match state.blob_store.presigned_url(&key, PRESIGN_TTL_SECS).await {
                    Ok(url) => {
                        obj.insert(link_field.to_string(), serde_json::Value::String(url.to_string()));
                    }
                    Err(e) => tracing::warn!(error = %e, key, "failed to presign blob link"),
                }
            }
        }
        out.push(value);
    }
    Ok(Json(out))
}

/// `POST /cancel_job?job_id=...`: cancels all unfinished rows of a job.
pub async fn cancel_job(
    State(state): State<SharedState>,
    Query(query): Query<JobIdQuery>,
) -> Result<Json<StatusResponse>, StatusCode> {
    state.results_store.cancel_job(&query.job_id).await.map_err(|e| {
        tracing::error!(error = %e, "failed to cancel job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(ok())
}

/// `GET /queue_stats`: ready/running counts the autoscaler polls.
pub async fn queue_stats(State(state): State<SharedState>) -> Result<Json<crate::domain::ports::QueueStats>, StatusCode> {
    state.task_queue.stats().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "failed to fetch queue stats");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// HTML dashboard, job detail, and trace-viewer routes are out of scope;
/// these stubs document the full original surface without reimplementing
/// dashboard rendering.
pub async fn dashboard_stub() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "error": "dashboard rendering is served by a separate service",
        })),
    )
}
