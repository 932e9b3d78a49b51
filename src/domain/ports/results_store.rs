//! Results store port: the durable record of attempt rows and per-isolate
//! duration history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreResult;
use crate::domain::models::{DurationRecord, Task, TaskRecord};

/// Outcome reported by a slave once an attempt's subprocess has exited (or
/// been killed).
#[derive(Debug, Clone)]
pub struct FinishedAttempt {
    pub job_id: String,
    pub task_id: String,
    pub attempt: u32,
    pub description: String,
    pub hostname: String,
    pub status: i32,
    pub complete_ts: DateTime<Utc>,
    pub output_archive_hash: Option<String>,
    pub stdout_abbrev: Option<String>,
    pub stderr_abbrev: Option<String>,
    pub stdout_key: Option<String>,
    pub stderr_key: Option<String>,
    pub artifact_archive_key: Option<String>,
    pub duration_secs: f64,
}

/// Port implemented by the relational results store.
#[async_trait]
pub trait ResultsStorePort: Send + Sync {
    /// Insert fresh `status = NULL` rows for every task in a submitted job.
    async fn register_tasks(&self, tasks: &[Task], submit_ts: DateTime<Utc>) -> StoreResult<()>;

    /// CAS-start an attempt: succeeds only if the row's `status` was still
    /// `NULL`. Returns `false` on a lost race (already started or canceled).
    async fn mark_running(
        &self,
        job_id: &str,
        task_id: &str,
        attempt: u32,
        hostname: &str,
        start_ts: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Mark every still-unfinished row of a job as canceled (`status = -1`).
    async fn cancel_job(&self, job_id: &str) -> StoreResult<u64>;

    /// Finish a running attempt and fold its duration into the isolate's
    /// EWMA record.
    async fn mark_finished(&self, attempt: &FinishedAttempt) -> StoreResult<()>;

    /// All attempt rows for a job, in submission order.
    async fn fetch_task_rows_for_job(&self, job_id: &str) -> StoreResult<Vec<TaskRecord>>;

    /// A single attempt row, if present.
    async fn fetch_task(&self, job_id: &str, task_id: &str, attempt: u32) -> StoreResult<Option<TaskRecord>>;

    /// Most recently submitted jobs, newest first, for dashboards/CLI.
    async fn fetch_recent_job_rows(&self, limit: u32) -> StoreResult<Vec<TaskRecord>>;

    /// Current duration estimate for a given task description, if any
    /// attempt sharing that description has ever finished.
    async fn fetch_duration(&self, description: &str) -> StoreResult<Option<DurationRecord>>;
}
