//! Implementations behind each `dctl` subcommand.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use console::style;
use serde::Deserialize;
use tokio::task::JoinSet;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_HTTP_ATTEMPTS: u32 = 10;
const HTTP_RETRY_SLEEP: Duration = Duration::from_secs(5);

pub struct Client {
    http: reqwest::Client,
    master_url: String,
    last_job_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobStatus {
    pub status: String,
    pub total_groups: usize,
    pub finished_groups: usize,
    pub failed_groups: usize,
    pub retried_tasks: usize,
}

impl JobStatus {
    fn exit_code(&self) -> Option<i32> {
        if self.status != "finished" {
            return None;
        }
        Some(if self.failed_groups > 0 { 88 } else { 0 })
    }
}

impl Client {
    pub fn new(master_url: String, last_job_path: PathBuf) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(Duration::from_secs(60)).build().expect("client"),
            master_url: master_url.trim_end_matches('/').to_string(),
            last_job_path,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.master_url, path)
    }

    fn save_last_job_id(&self, job_id: &str) {
        if let Err(err) = std::fs::write(&self.last_job_path, job_id) {
            tracing::warn!(error = %err, path = %self.last_job_path.display(), "failed to cache last job id");
        }
    }

    fn load_last_job_id(&self) -> Option<String> {
        std::fs::read_to_string(&self.last_job_path).ok()
    }

    pub fn resolve_job_id(&self, job_id: Option<String>) -> anyhow::Result<String> {
        if let Some(job_id) = job_id {
            return Ok(job_id);
        }
        self.load_last_job_id()
            .ok_or_else(|| anyhow::anyhow!("no job id given and no previously submitted job is cached"))
    }

    async fn get_with_retry(&self, url: &str) -> anyhow::Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            match self.http.get(url).send().await {
                Ok(response) => return Ok(response.error_for_status()?),
                Err(err) if attempt < MAX_HTTP_ATTEMPTS => {
                    attempt += 1;
                    tracing::info!(attempt, max = MAX_HTTP_ATTEMPTS, error = %err, "failed to contact master, retrying");
                    tokio::time::sleep(HTTP_RETRY_SLEEP).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn submit(&self, job_json_path: &Path, name_prefix: &str) -> anyhow::Result<String> {
        let body = std::fs::read_to_string(job_json_path)?;
        // Validate it parses before sending it over the wire.
        let _: serde_json::Value = serde_json::from_str(&body)?;

        let job_id = generate_job_id(name_prefix);
        let url = self.url("/submit_job");
        let payload = serde_json::json!({ "job_id": job_id, "tasks": serde_json::from_str::<serde_json::Value>(&body)?["tasks"] });

        let response: SubmitResponse = self.http.post(&url).json(&payload).send().await?.error_for_status()?.json().await?;
        if response.status != "SUCCESS" {
            anyhow::bail!("master rejected job submission: {:?}", response.status);
        }
        self.save_last_job_id(&job_id);
        Ok(job_id)
    }

    pub async fn watch(&self, job_id: &str) -> anyhow::Result<i32> {
        println!("Watch your results at {}", self.url(&format!("/job?job_id={job_id}")));
        let url = self.url(&format!("/job_status?job_id={job_id}"));
        let start = SystemTime::now();
        let mut previous: Option<JobStatus> = None;
        let mut first = true;

        loop {
            let status: JobStatus = self.get_with_retry(&url).await?.json().await?;
            let exit_code = status.exit_code();
            print_status(start, previous.as_ref(), &status, first, exit_code);
            first = false;
            previous = Some(status);
            if let Some(code) = exit_code {
                return Ok(code);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn cancel(&self, job_id: &str) -> anyhow::Result<()> {
        let url = self.url(&format!("/cancel_job?job_id={job_id}"));
        let body = self.get_with_retry(&url).await?.text().await?;
        println!("Cancellation: {body}");
        Ok(())
    }

    pub async fn fetch(&self, job_id: &str, output_dir: &Path, logs: bool, artifacts: bool, failed_only: bool) -> anyhow::Result<()> {
        let status_filter = if failed_only { "failed" } else { "finished" };
        let url = self.url(&format!("/tasks?job_id={job_id}&status={status_filter}"));
        let tasks: Vec<serde_json::Value> = self.get_with_retry(&url).await?.json().await?;
        if tasks.is_empty() {
            println!("No tasks in specified job, or job does not exist");
            return Ok(());
        }
        std::fs::create_dir_all(output_dir).ok();

        let mut downloads = Vec::new();
        for task in &tasks {
            let prefix = format!(
                "{}.{}.{}",
                safe_name(task["task_id"].as_str().unwrap_or("")),
                safe_name(&task["attempt"].to_string()),
                safe_name(task["description"].as_str().unwrap_or(""))
            );
            if logs {
                if let Some(link) = task.get("stdout_link").and_then(|v| v.as_str()) {
                    downloads.push((link.to_string(), output_dir.join(format!("{prefix}.stdout")), false));
                }
                if let Some(link) = task.get("stderr_link").and_then(|v| v.as_str()) {
                    downloads.push((link.to_string(), output_dir.join(format!("{prefix}.stderr")), false));
                }
            }
            if artifacts {
                if let Some(link) = task.get("artifact_archive_link").and_then(|v| v.as_str()) {
                    downloads.push((link.to_string(), output_dir.join(format!("{prefix}.zip")), true));
                }
            }
        }

        println!("Fetching {} files into {}", downloads.len(), output_dir.display());
        let extract_dir = output_dir.to_path_buf();
        let mut joins = JoinSet::new();
        for (link, path, is_archive) in downloads {
            let http = self.http.clone();
            let extract_dir = extract_dir.clone();
            joins.spawn(async move {
                if let Err(err) = download(&http, &link, &path).await {
                    tracing::warn!(error = %err, link, "download failed");
                    return;
                }
                if is_archive {
                    if let Err(err) = extract_archive(&path, &extract_dir) {
                        tracing::warn!(error = %err, path = %path.display(), "extraction failed");
                    }
                }
            });
        }
        while joins.join_next().await.is_some() {}
        Ok(())
    }
}

fn generate_job_id(prefix: &str) -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let pid = std::process::id();
    let base = format!("{user}.{epoch}.{pid}");
    if prefix.is_empty() {
        base
    } else {
        format!("{prefix}.{base}")
    }
}

fn safe_name(s: &str) -> String {
    s.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}

fn print_status(start: SystemTime, previous: Option<&JobStatus>, result: &JobStatus, first: bool, exit_code: Option<i32>) {
    if let Some(previous) = previous {
        if previous.finished_groups == result.finished_groups && !first {
            return;
        }
    }
    let elapsed = start.elapsed().unwrap_or_default().as_secs_f64();
    let mut line = format!(" {elapsed:.1}s\t {}/{} tests complete", result.finished_groups, result.total_groups);
    if result.failed_groups > 0 {
        line.push_str(&format!(" ({} failed)", result.failed_groups));
    }
    if result.retried_tasks > 0 {
        line.push_str(&format!(" ({} retries)", result.retried_tasks));
    }
    let styled = match exit_code {
        Some(0) => style(line).green(),
        Some(_) => style(line).red(),
        None => style(line),
    };
    println!("{styled}");
}

async fn download(http: &reqwest::Client, link: &str, path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    const MAX_ATTEMPTS: u32 = 10;
    let mut attempt = 0;
    loop {
        match http.get(link).send().await.and_then(reqwest::Response::error_for_status) {
            Ok(response) => {
                let bytes = response.bytes().await?;
                std::fs::write(path, bytes)?;
                return Ok(());
            }
            Err(err) if attempt < MAX_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(5)).await;
                tracing::info!(attempt, error = %err, "retrying download");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn extract_archive(path: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let zip_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("archive");
    let dest = out_dir.join(zip_name);
    if dest.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&dest)?;
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(entry_path) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(entry_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }
    Ok(())
}
