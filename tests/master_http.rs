//! End-to-end coverage of the master's HTTP surface: submit a job, inspect
//! its status and per-attempt rows, and cancel it. Drives a real axum server
//! bound to an ephemeral port with `reqwest`, backed by an in-memory SQLite
//! results store, a filesystem blob store under a tempdir, and an in-process
//! fake task queue (no redis server required for these scenarios).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dist_test::adapters::blob::FsBlobStore;
use dist_test::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteResultsStore};
use dist_test::domain::errors::QueueResult;
use dist_test::domain::models::config::MasterConfig;
use dist_test::domain::models::Task;
use dist_test::domain::ports::task_queue::{QueueStats, ReservedHandle};
use dist_test::domain::ports::TaskQueuePort;
use dist_test::master::build_router;

/// An in-memory stand-in for the redis-backed queue, enough to drive the
/// submit/status/tasks/cancel scenarios without a broker.
#[derive(Default)]
struct FakeQueue {
    ready: Mutex<VecDeque<Task>>,
}

#[async_trait]
impl TaskQueuePort for FakeQueue {
    async fn submit(&self, task: &Task, _priority: i64) -> QueueResult<()> {
        self.ready.lock().unwrap().push_back(task.clone());
        Ok(())
    }

    async fn reserve(&self) -> QueueResult<(Task, ReservedHandle)> {
        loop {
            if let Some(task) = self.ready.lock().unwrap().pop_front() {
                return Ok((task, ReservedHandle("fake".to_string())));
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn touch(&self, _handle: &ReservedHandle) -> QueueResult<()> {
        Ok(())
    }

    async fn delete(&self, _handle: &ReservedHandle) -> QueueResult<()> {
        Ok(())
    }

    async fn release(&self, _handle: &ReservedHandle) -> QueueResult<()> {
        Ok(())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            ready: self.ready.lock().unwrap().len() as u64,
            running: 0,
        })
    }
}

async fn spawn_master() -> String {
    let pool = create_test_pool().await.expect("pool");
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.expect("migrations");
    let results_store = Arc::new(SqliteResultsStore::new(pool));
    let task_queue = Arc::new(FakeQueue::default());
    let blob_root = tempfile::tempdir().expect("tempdir");
    let blob_store = Arc::new(FsBlobStore::new(blob_root.keep()));

    let router = build_router(&MasterConfig::default(), results_store, task_queue, blob_store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server");
    });
    format!("http://{addr}")
}

/// S1 — happy path, single task: submission is visible in `/job_status` as
/// running, and `/tasks` returns the registered row before the slave finishes it.
#[tokio::test]
async fn submit_job_registers_and_enqueues_a_single_task() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "job_id": "u.1.2",
        "tasks": [{"isolate_hash": "a".repeat(40), "description": "t1", "timeout": 30, "max_retries": 0}],
    });
    let response = client.post(format!("{base}/submit_job")).json(&body).send().await.expect("submit");
    assert!(response.status().is_success());

    let status: serde_json::Value =
        client.get(format!("{base}/job_status?job_id=u.1.2")).send().await.expect("status").json().await.expect("json");
    assert_eq!(status["total_groups"], 1);
    assert_eq!(status["status"], "running");

    let tasks: Vec<serde_json::Value> =
        client.get(format!("{base}/tasks?job_id=u.1.2")).send().await.expect("tasks").json().await.expect("json");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["attempt"], 0);
}

/// `/job_status` on a job id that was never submitted is a 404, not an
/// empty summary — `summarize_tasks` returns `None` for zero rows.
#[tokio::test]
async fn job_status_for_unknown_job_is_not_found() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();
    let response = client.get(format!("{base}/job_status?job_id=no-such-job")).send().await.expect("status");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

/// S6 — longest-first ordering: with no duration history yet, three tasks
/// enqueue in submission order; this locks in that a first submission
/// (nothing to sort by) doesn't reorder `task_id` derivation (`{hash}.{index}`).
#[tokio::test]
async fn submit_job_assigns_index_derived_task_ids_in_submission_order() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "job_id": "u.2.5",
        "tasks": [
            {"isolate_hash": "c".repeat(40), "description": "c", "timeout": 30, "max_retries": 0},
            {"isolate_hash": "a".repeat(40), "description": "a", "timeout": 30, "max_retries": 0},
            {"isolate_hash": "b".repeat(40), "description": "b", "timeout": 30, "max_retries": 0},
        ],
    });
    client.post(format!("{base}/submit_job")).json(&body).send().await.expect("submit");

    let tasks: Vec<serde_json::Value> =
        client.get(format!("{base}/tasks?job_id=u.2.5")).send().await.expect("tasks").json().await.expect("json");
    let task_ids: Vec<&str> = tasks.iter().map(|t| t["task_id"].as_str().unwrap()).collect();
    assert_eq!(task_ids, vec![format!("{}.0", "c".repeat(40)), format!("{}.1", "a".repeat(40)), format!("{}.2", "b".repeat(40))]);
}

/// S3-adjacent: canceling a job marks every unfinished row `status = -1`,
/// which `/job_status` then reports as finished with zero succeeded groups.
#[tokio::test]
async fn cancel_job_marks_rows_canceled_and_finishes_the_job() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "job_id": "u.3.9",
        "tasks": [{"isolate_hash": "d".repeat(40), "description": "d", "timeout": 30, "max_retries": 0}],
    });
    client.post(format!("{base}/submit_job")).json(&body).send().await.expect("submit");
    let response = client.post(format!("{base}/cancel_job?job_id=u.3.9")).send().await.expect("cancel");
    assert!(response.status().is_success());

    let status: serde_json::Value =
        client.get(format!("{base}/job_status?job_id=u.3.9")).send().await.expect("status").json().await.expect("json");
    assert_eq!(status["status"], "finished");
    assert_eq!(status["succeeded_groups"], 0);
    assert_eq!(status["failed_groups"], 1);
}

/// `/queue_stats` reflects what's still sitting in the ready set, the signal
/// the autoscaler polls to decide whether to grow the fleet.
#[tokio::test]
async fn queue_stats_reports_ready_backlog_after_submission() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "job_id": "u.4.1",
        "tasks": [
            {"isolate_hash": "e".repeat(40), "description": "e", "timeout": 30, "max_retries": 0},
            {"isolate_hash": "f".repeat(40), "description": "f", "timeout": 30, "max_retries": 0},
        ],
    });
    client.post(format!("{base}/submit_job")).json(&body).send().await.expect("submit");

    let stats: serde_json::Value =
        client.get(format!("{base}/queue_stats")).send().await.expect("stats").json().await.expect("json");
    assert_eq!(stats["ready"], 2);
}
