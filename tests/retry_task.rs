//! Coverage of `/retry_task`, the endpoint a slave calls after a failing
//! attempt: S2 (flaky-then-success) and S3 (retries exhausted) from the
//! slave's point of view, exercised purely over HTTP against the master.

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

/// S2 — a retry submitted for a task with retries remaining bumps the
/// attempt number and re-registers a fresh row.
#[tokio::test]
async fn retry_with_budget_remaining_registers_next_attempt() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let submit = serde_json::json!({
        "job_id": "u.5.1",
        "tasks": [{"isolate_hash": "a".repeat(40), "description": "flaky", "timeout": 30, "max_retries": 2}],
    });
    client.post(format!("{base}/submit_job")).json(&submit).send().await.expect("submit");

    let task = serde_json::json!({
        "job_id": "u.5.1",
        "task_id": format!("{}.0", "a".repeat(40)),
        "isolate_hash": "a".repeat(40),
        "description": "flaky",
        "timeout_secs": 30,
        "attempt": 0,
        "max_retries": 2,
        "artifact_archive_globs": [],
    });
    let response = client.post(format!("{base}/retry_task")).json(&task).send().await.expect("retry");
    assert!(response.status().is_success());

    let tasks: Vec<serde_json::Value> =
        client.get(format!("{base}/tasks?job_id=u.5.1")).send().await.expect("tasks").json().await.expect("json");
    let attempts: Vec<i64> = tasks.iter().map(|t| t["attempt"].as_i64().unwrap()).collect();
    assert_eq!(attempts, vec![0, 1]);
}

/// S3 — a retry submitted for a task that has already used its last attempt
/// is a no-op: no new row, nothing re-enqueued.
#[tokio::test]
async fn retry_with_budget_exhausted_does_not_register_another_attempt() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let submit = serde_json::json!({
        "job_id": "u.5.2",
        "tasks": [{"isolate_hash": "b".repeat(40), "description": "hard-fail", "timeout": 30, "max_retries": 1}],
    });
    client.post(format!("{base}/submit_job")).json(&submit).send().await.expect("submit");

    let task = serde_json::json!({
        "job_id": "u.5.2",
        "task_id": format!("{}.0", "b".repeat(40)),
        "isolate_hash": "b".repeat(40),
        "description": "hard-fail",
        "timeout_secs": 30,
        "attempt": 1,
        "max_retries": 1,
        "artifact_archive_globs": [],
    });
    client.post(format!("{base}/retry_task")).json(&task).send().await.expect("retry");

    let tasks: Vec<serde_json::Value> =
        client.get(format!("{base}/tasks?job_id=u.5.2")).send().await.expect("tasks").json().await.expect("json");
    assert_eq!(tasks.len(), 1, "attempt 1 already exhausts max_retries=1, no attempt 2 should appear");
}

/// Duplicate retry submissions for the same `(job_id, task_id, attempt)`
/// are tolerated: the primary key rejects the second insert and the
/// handler still replies with success rather than a 500.
#[tokio::test]
async fn duplicate_retry_submission_is_tolerated() {
    let base = spawn_master().await;
    let client = reqwest::Client::new();

    let submit = serde_json::json!({
        "job_id": "u.5.3",
        "tasks": [{"isolate_hash": "c".repeat(40), "description": "dup", "timeout": 30, "max_retries": 2}],
    });
    client.post(format!("{base}/submit_job")).json(&submit).send().await.expect("submit");

    let task = serde_json::json!({
        "job_id": "u.5.3",
        "task_id": format!("{}.0", "c".repeat(40)),
        "isolate_hash": "c".repeat(40),
        "description": "dup",
        "timeout_secs": 30,
        "attempt": 0,
        "max_retries": 2,
        "artifact_archive_globs": [],
    });
    for _ in 0..2 {
        let response = client.post(format!("{base}/retry_task")).json(&task).send().await.expect("retry");
        assert!(response.status().is_success());
    }

    let tasks: Vec<serde_json::Value> =
        client.get(format!("{base}/tasks?job_id=u.5.3")).send().await.expect("tasks").json().await.expect("json");
    assert_eq!(tasks.len(), 2, "only one attempt-1 row should exist despite the duplicate POST");
}
