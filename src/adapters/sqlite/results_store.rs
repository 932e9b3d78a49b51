//! SQLite-backed `ResultsStorePort`: the durable attempt-row table and the
//! per-isolate duration memory.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{DurationRecord, Task, TaskRecord};
use crate::domain::ports::results_store::FinishedAttempt;
use crate::domain::ports::ResultsStorePort;

/// Queries retry up to this many times on a connection-lost failure before
/// giving up, matching the reconnect ceiling of the original store.
const MAX_QUERY_ATTEMPTS: u32 = 3;

#[derive(sqlx::FromRow)]
struct TaskRow {
    job_id: String,
    task_id: String,
    attempt: i64,
    max_retries: i64,
    description: String,
    submit_timestamp: String,
    start_timestamp: Option<String>,
    complete_timestamp: Option<String>,
    hostname: Option<String>,
    status: Option<i64>,
    output_archive_hash: Option<String>,
    stdout_abbrev: Option<String>,
    stderr_abbrev: Option<String>,
    stdout_key: Option<String>,
    stderr_key: Option<String>,
    artifact_archive_key: Option<String>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            job_id: row.job_id,
            task_id: row.task_id,
            attempt: row.attempt as u32,
            max_retries: row.max_retries as u32,
            description: row.description,
            submit_ts: parse_ts(&row.submit_timestamp)?,
            start_ts: row.start_timestamp.as_deref().map(parse_ts).transpose()?,
            complete_ts: row.complete_timestamp.as_deref().map(parse_ts).transpose()?,
            hostname: row.hostname,
            status: row.status.map(|s| s as i32),
            output_archive_hash: row.output_archive_hash,
            stdout_abbrev: row.stdout_abbrev,
            stderr_abbrev: row.stderr_abbrev,
            stdout_key: row.stdout_key,
            stderr_key: row.stderr_key,
            artifact_archive_key: row.artifact_archive_key,
        })
    }
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Migration(format!("invalid timestamp {s}: {e}")))
}

#[derive(Clone)]
pub struct SqliteResultsStore {
    pool: SqlitePool,
}

impl SqliteResultsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Retry a fallible query up to `MAX_QUERY_ATTEMPTS` times, backing off
    /// between attempts. Mirrors the original's reconnect-on-"server has
    /// gone away" loop, generalized to any transient `sqlx::Error`.
    async fn with_retry<T, F, Fut>(&self, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(std::time::Duration::from_millis(50))
            .with_max_elapsed_time(Some(std::time::Duration::from_secs(5)))
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_QUERY_ATTEMPTS && is_transient(&err) => {
                    let delay = backoff.next_backoff().unwrap_or(std::time::Duration::from_millis(100));
                    tracing::warn!(attempt, error = %err, "query failed, retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(StoreError::Database(err)),
            }
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ResultsStorePort for SqliteResultsStore {
    async fn register_tasks(&self, tasks: &[Task], submit_ts: DateTime<Utc>) -> StoreResult<()> {
        let submit_ts = submit_ts.to_rfc3339();
        for task in tasks {
            self.with_retry(|| {
                sqlx::query(
                    "INSERT INTO dist_test_tasks
                        (job_id, task_id, attempt, max_retries, isolate_hash, description, timeout_secs, submit_timestamp)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&task.job_id)
                .bind(&task.task_id)
                .bind(i64::from(task.attempt))
                .bind(i64::from(task.max_retries))
                .bind(&task.isolate_hash)
                .bind(&task.description)
                .bind(i64::from(task.timeout_secs))
                .bind(&submit_ts)
                .execute(&self.pool)
            })
            .await?;
        }
        Ok(())
    }

    async fn mark_running(
        &self,
        job_id: &str,
        task_id: &str,
        attempt: u32,
        hostname: &str,
        start_ts: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let start_ts = start_ts.to_rfc3339();
        let result = self
            .with_retry(|| {
                sqlx::query(
                    "UPDATE dist_test_tasks SET start_timestamp = ?, hostname = ?
                     WHERE job_id = ? AND task_id = ? AND attempt = ? AND status IS NULL",
                )
                .bind(&start_ts)
                .bind(hostname)
                .bind(job_id)
                .bind(task_id)
                .bind(i64::from(attempt))
                .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, job_id: &str) -> StoreResult<u64> {
        let now = Utc::now().to_rfc3339();
        let result = self
            .with_retry(|| {
                sqlx::query(
                    "UPDATE dist_test_tasks SET status = -1, stderr_abbrev = '[canceled]', complete_timestamp = ?
                     WHERE job_id = ? AND status IS NULL",
                )
                .bind(&now)
                .bind(job_id)
                .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_finished(&self, attempt: &FinishedAttempt) -> StoreResult<()> {
        let complete_ts = attempt.complete_ts.to_rfc3339();
        self.with_retry(|| {
            sqlx::query(
                "UPDATE dist_test_tasks SET
                    status = ?, stdout_key = ?, stdout_abbrev = ?, stderr_key = ?, stderr_abbrev = ?,
                    artifact_archive_key = ?, output_archive_hash = ?, complete_timestamp = ?
                 WHERE job_id = ? AND task_id = ? AND attempt = ?",
            )
            .bind(attempt.status)
            .bind(&attempt.stdout_key)
            .bind(&attempt.stdout_abbrev)
            .bind(&attempt.stderr_key)
            .bind(&attempt.stderr_abbrev)
            .bind(&attempt.artifact_archive_key)
            .bind(&attempt.output_archive_hash)
            .bind(&complete_ts)
            .bind(&attempt.job_id)
            .bind(&attempt.task_id)
            .bind(i64::from(attempt.attempt))
            .execute(&self.pool)
        })
        .await?;

        self.with_retry(|| {
            sqlx::query(
                "INSERT INTO dist_test_durations (description, last_task_id, ewma_secs)
                 VALUES (?, ?, ?)
                 ON CONFLICT(description) DO UPDATE SET
                    last_task_id = excluded.last_task_id,
                    ewma_secs = (ewma_secs * 0.7) + (excluded.ewma_secs * 0.3)",
            )
            .bind(&attempt.description)
            .bind(&attempt.task_id)
            .bind(attempt.duration_secs)
            .execute(&self.pool)
        })
        .await?;

        Ok(())
    }

    async fn fetch_task_rows_for_job(&self, job_id: &str) -> StoreResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> = self
            .with_retry(|| {
                sqlx::query_as("SELECT * FROM dist_test_tasks WHERE job_id = ? ORDER BY submit_timestamp ASC")
                    .bind(job_id)
                    .fetch_all(&self.pool)
            })
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn fetch_task(&self, job_id: &str, task_id: &str, attempt: u32) -> StoreResult<Option<TaskRecord>> {
        let row: Option<TaskRow> = self
            .with_retry(|| {
                sqlx::query_as("SELECT * FROM dist_test_tasks WHERE job_id = ? AND task_id = ? AND attempt = ?")
                    .bind(job_id)
                    .bind(task_id)
                    .bind(i64::from(attempt))
                    .fetch_optional(&self.pool)
            })
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn fetch_recent_job_rows(&self, limit: u32) -> StoreResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> = self
            .with_retry(|| {
                sqlx::query_as(
                    "SELECT * FROM dist_test_tasks
                     WHERE job_id IN (
                        SELECT DISTINCT job_id FROM dist_test_tasks
                        ORDER BY submit_timestamp DESC LIMIT ?
                     )
                     ORDER BY submit_timestamp DESC",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
            })
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn fetch_duration(&self, description: &str) -> StoreResult<Option<DurationRecord>> {
        let row: Option<(f64,)> = self
            .with_retry(|| {
                sqlx::query_as("SELECT ewma_secs FROM dist_test_durations WHERE description = ?")
                    .bind(description)
                    .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.map(|(ewma,)| DurationRecord::new(ewma)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::{all_embedded_migrations, Migrator};

    async fn setup() -> SqliteResultsStore {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteResultsStore::new(pool)
    }

    fn task(job_id: &str, task_id: &str, attempt: u32) -> Task {
        Task {
            job_id: job_id.into(),
            task_id: task_id.into(),
            isolate_hash: task_id.split('.').next().unwrap().into(),
            description: "t1".into(),
            timeout_secs: 30,
            attempt,
            max_retries: 1,
            artifact_archive_globs: vec![],
        }
    }

    #[tokio::test]
    async fn register_then_mark_running_is_cas_guarded() {
        let store = setup().await;
        let t = task("u.1.2", "hash1.0", 0);
        store.register_tasks(&[t.clone()], Utc::now()).await.unwrap();

        let started = store.mark_running("u.1.2", "hash1.0", 0, "host-a", Utc::now()).await.unwrap();
        assert!(started);

        // Second CAS attempt on the same row loses the race.
        let started_again = store.mark_running("u.1.2", "hash1.0", 0, "host-b", Utc::now()).await.unwrap();
        assert!(!started_again);
    }

    #[tokio::test]
    async fn cancel_job_only_touches_unfinished_rows() {
        let store = setup().await;
        let t1 = task("u.1.2", "hash1.0", 0);
        let t2 = task("u.1.2", "hash2.0", 0);
        store.register_tasks(&[t1, t2.clone()], Utc::now()).await.unwrap();

        store
            .mark_finished(&FinishedAttempt {
                job_id: "u.1.2".into(),
                task_id: "hash2.0".into(),
                attempt: 0,
                description: "t1".into(),
                hostname: "host-a".into(),
                status: 0,
                complete_ts: Utc::now(),
                output_archive_hash: None,
                stdout_abbrev: None,
                stderr_abbrev: None,
                stdout_key: None,
                stderr_key: None,
                artifact_archive_key: None,
                duration_secs: 10.0,
            })
            .await
            .unwrap();

        let canceled = store.cancel_job("u.1.2").await.unwrap();
        assert_eq!(canceled, 1);

        let rows = store.fetch_task_rows_for_job("u.1.2").await.unwrap();
        let canceled_row = rows.iter().find(|r| r.task_id == "hash1.0").unwrap();
        assert_eq!(canceled_row.status, Some(-1));
        let finished_row = rows.iter().find(|r| r.task_id == "hash2.0").unwrap();
        assert_eq!(finished_row.status, Some(0));
    }

    #[tokio::test]
    async fn mark_finished_updates_duration_ewma() {
        let store = setup().await;
        let t = task("u.1.2", "hash1.0", 0);
        store.register_tasks(&[t], Utc::now()).await.unwrap();

        store
            .mark_finished(&FinishedAttempt {
                job_id: "u.1.2".into(),
                task_id: "hash1.0".into(),
                attempt: 0,
                description: "t1".into(),
                hostname: "host-a".into(),
                status: 0,
                complete_ts: Utc::now(),
                output_archive_hash: None,
                stdout_abbrev: None,
                stderr_abbrev: None,
                stdout_key: None,
                stderr_key: None,
                artifact_archive_key: None,
                duration_secs: 10.0,
            })
            .await
            .unwrap();

        let duration = store.fetch_duration("t1").await.unwrap().unwrap();
        assert!((duration.ewma_secs - 10.0).abs() < 1e-9);
    }
}
