//! The slave's main loop: reserve a task, run it, report the result, and
//! conditionally submit a retry. Fourteen steps per spec, folded here into a
//! handful of functions rather than a single literal enumeration.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::models::config::SlaveConfig;
use crate::domain::ports::{BlobStorePort, ReservedHandle, ResultsStorePort, TaskQueuePort};
use crate::services::artifact_packager::package_artifacts;
use crate::services::retry_cache::RetryCache;

use super::cache_dir::{self, ExclusiveCacheDir};
use super::healthz::BusyFlag;
use super::runner::run_task;

pub struct Slave {
    config: SlaveConfig,
    task_queue: Arc<dyn TaskQueuePort>,
    results_store: Arc<dyn ResultsStorePort>,
    blob_store: Arc<dyn BlobStorePort>,
    cache_dir: ExclusiveCacheDir,
    retry_cache: RetryCache,
    busy: Arc<BusyFlag>,
    hostname: String,
    http: reqwest::Client,
}

impl Slave {
    pub async fn new(
        config: SlaveConfig,
        task_queue: Arc<dyn TaskQueuePort>,
        results_store: Arc<dyn ResultsStorePort>,
        blob_store: Arc<dyn BlobStorePort>,
    ) -> anyhow::Result<Self> {
        let cache_dir = cache_dir::acquire(&config.cache_root, config.num_cache_dirs)?;
        let hostname = hostname_or_unknown();
        Ok(Self {
            config,
            task_queue,
            results_store,
            blob_store,
            cache_dir,
            retry_cache: RetryCache::default(),
            busy: Arc::new(BusyFlag::default()),
            hostname,
            http: reqwest::Client::new(),
        })
    }

    /// Spawn the `/healthz` listener as a background task.
    pub fn spawn_healthz(&self) {
        if let Ok(addr) = self.config.healthz_bind_addr.parse::<SocketAddr>() {
            let flag = self.busy.clone();
            tokio::spawn(async move {
                if let Err(err) = super::healthz::serve(addr, flag).await {
                    tracing::warn!(error = %err, "healthz listener exited");
                }
            });
        } else {
            tracing::warn!(addr = %self.config.healthz_bind_addr, "invalid healthz bind address, skipping");
        }
    }

    /// Run forever, reserving and executing one task at a time, until a
    /// SIGTERM is observed (signaled by the caller cancelling `shutdown`).
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            self.busy.set(false);
            tracing::info!("waiting for next task...");

            let reserved = tokio::select! {
                result = self.task_queue.reserve() => result,
                _ = shutdown.changed() => {
                    tracing::warn!("caught shutdown signal while idle");
                    return;
                }
            };

            let (task, handle) = match reserved {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to reserve task");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            if self.retry_cache.get(&task.retry_id()).is_some() {
                tracing::info!(retry_id = %task.retry_id(), "got a retry this slave submitted, releasing and backing off");
                if let Err(err) = self.task_queue.release(&handle).await {
                    tracing::warn!(error = %err, "failed to release anti-affinity retry");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }

            self.busy.set(true);
            if *shutdown.borrow() {
                let _ = self.task_queue.release(&handle).await;
                return;
            }

            self.execute(&task, &handle).await;

            if let Err(err) = self.task_queue.delete(&handle).await {
                tracing::warn!(error = %err, "failed to delete completed queue entry");
            }
        }
    }

    async fn execute(&mut self, task: &crate::domain::models::Task, handle: &ReservedHandle) {
        let start_ts = Utc::now();
        match self
            .results_store
            .mark_running(&task.job_id, &task.task_id, task.attempt, &self.hostname, start_ts)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(task_id = %task.task_id, "task canceled before start, lost the race");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to mark task running, abandoning attempt");
                return;
            }
        }

        tracing::info!(task_id = %task.task_id, "running command");
        let outcome = match run_task(
            &self.config.isolate_home,
            &self.config.isolate_server,
            &self.cache_dir.path,
            task,
            self.config.kill_grace_secs,
            self.task_queue.as_ref(),
            handle,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "failed to invoke runner");
                return;
            }
        };

        let attempt_id = task.attempt_id();
        let succeeded = outcome.status == 0;

        // Don't upload logs from successful attempts.
        let (stdout_key, stdout_abbrev) = if succeeded {
            (None, None)
        } else {
            self.upload_log(&attempt_id, "stdout", &outcome.stdout).await
        };
        let (stderr_key, stderr_abbrev) = if succeeded {
            (None, None)
        } else {
            self.upload_log(&attempt_id, "stderr", &outcome.stderr).await
        };

        let artifact_archive_key = match &outcome.leaked_dir {
            Some(dir) => match package_artifacts(dir, &task.artifact_archive_globs) {
                Some(archive) => self.upload_artifact(&attempt_id, archive.bytes).await,
                None => None,
            },
            None => None,
        };

        if let Some(dir) = &outcome.leaked_dir {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %err, "failed to clean up leaked test directory");
            }
        }

        let finished = crate::domain::ports::results_store::FinishedAttempt {
            job_id: task.job_id.clone(),
            task_id: task.task_id.clone(),
            attempt: task.attempt,
            description: task.description.clone(),
            hostname: self.hostname.clone(),
            status: outcome.status,
            complete_ts: Utc::now(),
            output_archive_hash: outcome.output_archive_hash,
            stdout_abbrev,
            stderr_abbrev,
            stdout_key,
            stderr_key,
            artifact_archive_key,
            duration_secs: outcome.duration_secs,
        };

        if let Err(err) = self.results_store.mark_finished(&finished).await {
            tracing::error!(error = %err, task_id = %task.task_id, "failed to record finished attempt, abandoning");
            return;
        }

        if !succeeded && task.has_retries_remaining() {
            self.submit_retry(task).await;
        }
    }

    async fn upload_log(&self, attempt_id: &str, which: &str, contents: &str) -> (Option<String>, Option<String>) {
        const ABBREV_LEN: usize = 100;
        let key = format!("{attempt_id}.{which}");
        match self.blob_store.put(&key, contents.as_bytes().to_vec(), Some("inline")).await {
            Ok(()) => {
                let abbrev = contents.chars().take(ABBREV_LEN).collect::<String>();
                (Some(key), Some(abbrev))
            }
            Err(err) => {
                tracing::error!(error = %err, key, "failed to upload log");
                (None, None)
            }
        }
    }

    async fn upload_artifact(&self, attempt_id: &str, bytes: Vec<u8>) -> Option<String> {
        let key = format!("{attempt_id}-artifacts.zip");
        match self.blob_store.put(&key, bytes, Some("attachment")).await {
            Ok(()) => Some(key),
            Err(err) => {
                tracing::error!(error = %err, key, "failed to upload artifact archive");
                None
            }
        }
    }

    async fn submit_retry(&mut self, task: &crate::domain::models::Task) {
        let url = format!("{}/retry_task", self.config.master_url.trim_end_matches('/'));
        match self.http.post(&url).json(task).send().await {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(body) if body.get("status").and_then(|v| v.as_str()) == Some("SUCCESS") => {
                    self.retry_cache.put(task.retry_id());
                }
                Ok(body) => tracing::warn!(?body, "retry submission not acknowledged"),
                Err(err) => tracing::warn!(error = %err, "failed to parse retry submission response"),
            },
            Err(err) => tracing::warn!(error = %err, "failed to submit retry task"),
        }
    }
}

fn hostname_or_unknown() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
