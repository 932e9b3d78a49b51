//! Subprocess supervision: invokes the isolate runner, enforces the
//! timeout/kill escalation, and extracts the two pieces of information the
//! runner communicates only through stdout/stderr text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use std::sync::LazyLock;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::domain::models::Task;
use crate::domain::ports::{ReservedHandle, TaskQueuePort};

static OUTPUT_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[run_isolated_out_hack\](.+?)\[/run_isolated_out_hack\]").unwrap());

static LEAKED_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^WARNING\s+\d+\s+run_isolated.*: Deliberately leaking (.*) for later examination$").unwrap());

/// What the runner invocation produced, before result-store persistence.
pub struct RunOutcome {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub output_archive_hash: Option<String>,
    pub leaked_dir: Option<PathBuf>,
    pub duration_secs: f64,
}

/// Invoke the isolate runner for `task`, supervising it for at most
/// `task.timeout_secs` before SIGTERM, and five seconds past that before
/// SIGKILL. Caller is responsible for having already won the CAS race via
/// `mark_running`.
pub async fn run_task(
    isolate_home: &Path,
    isolate_server: &str,
    cache_dir: &Path,
    task: &Task,
    kill_grace_secs: u64,
    task_queue: &dyn TaskQueuePort,
    handle: &ReservedHandle,
) -> std::io::Result<RunOutcome> {
    let runner_path = isolate_home.join("run_isolated.py");
    let mut command = Command::new(runner_path);
    command
        .arg(format!("--isolate-server={isolate_server}"))
        .arg(format!("--cache={}", cache_dir.display()))
        .arg("--verbose")
        .arg("--leak-temp")
        .arg("--hash")
        .arg(&task.isolate_hash)
        .env("SWARMING_HEADLESS", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::info!(task_id = %task.task_id, attempt = task.attempt, "running isolate command");
    let mut child = command.spawn()?;

    let start = Instant::now();
    let (stdout, stderr) = supervise(&mut child, task.timeout_secs, kill_grace_secs, task_queue, handle).await?;
    let status = child.wait().await?.code().unwrap_or(-1);
    let duration_secs = start.elapsed().as_secs_f64();

    let output_archive_hash = OUTPUT_HASH_RE
        .captures(&stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| serde_json::from_str::<serde_json::Value>(m.as_str()).ok())
        .and_then(|v| v.get("hash").and_then(|h| h.as_str()).map(str::to_string));

    let leaked_dir = parse_leaked_dir(&stderr);

    Ok(RunOutcome {
        status,
        stdout,
        stderr,
        output_archive_hash,
        leaked_dir,
        duration_secs,
    })
}

/// Read both pipes until the process exits, touching the queue reservation
/// every ~10s and escalating SIGTERM/SIGKILL against timeout.
async fn supervise(
    child: &mut Child,
    timeout_secs: u32,
    kill_grace_secs: u64,
    task_queue: &dyn TaskQueuePort,
    handle: &ReservedHandle,
) -> std::io::Result<(String, String)> {
    let mut stdout_pipe = BufReader::new(child.stdout.take().expect("piped stdout"));
    let mut stderr_pipe = BufReader::new(child.stderr.take().expect("piped stderr"));
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let start = Instant::now();
    let term_at = if timeout_secs > 0 {
        Some(Duration::from_secs(u64::from(timeout_secs)))
    } else {
        None
    };
    let kill_at = term_at.map(|d| d + Duration::from_secs(kill_grace_secs));
    let mut terminated = false;

    let mut tick = tokio::time::interval(Duration::from_secs(2));
    let mut ticks_since_touch = 0u32;
    let mut chunk = [0u8; 1024 * 1024];
    loop {
        tokio::select! {
            result = stdout_pipe.read(&mut chunk) => {
                let n = result?;
                if n > 0 { stdout.extend_from_slice(&chunk[..n]); }
            }
            result = stderr_pipe.read(&mut chunk) => {
                let n = result?;
                if n > 0 { stderr.extend_from_slice(&chunk[..n]); }
            }
            _ = tick.tick() => {
                ticks_since_touch += 1;
                if ticks_since_touch >= 5 {
                    ticks_since_touch = 0;
                    if let Err(err) = task_queue.touch(handle).await {
                        tracing::warn!(error = %err, "failed to touch queue reservation");
                    }
                }
            }
        }

        if let Some(exit) = child.try_wait()? {
            tracing::debug!(?exit, "runner process exited");
            break;
        }

        let elapsed = start.elapsed();
        if let Some(term_at) = term_at {
            if !terminated && elapsed > term_at {
                tracing::info!("task timed out, sending SIGTERM");
                stderr.extend_from_slice(format!("\n------\nKilling task after {timeout_secs} seconds").as_bytes());
                if let Some(pid) = child.id() {
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                }
                terminated = true;
            }
        }
        if let Some(kill_at) = kill_at {
            if elapsed > kill_at {
                tracing::info!("task did not exit after SIGTERM, sending SIGKILL");
                if let Some(pid) = child.id() {
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            }
        }
    }

    // Drain whatever remains buffered after the process has exited.
    let _ = stdout_pipe.read_to_end(&mut stdout).await;
    let _ = stderr_pipe.read_to_end(&mut stderr).await;

    Ok((String::from_utf8_lossy(&stdout).into_owned(), String::from_utf8_lossy(&stderr).into_owned()))
}

/// The runner leaks its working directory on purpose (`--leak-temp`) so
/// artifacts can be collected; it announces the path as the last matching
/// warning line in stderr.
fn parse_leaked_dir(stderr: &str) -> Option<PathBuf> {
    let mut found = None;
    for line in stderr.lines() {
        if let Some(captures) = LEAKED_DIR_RE.captures(line) {
            found = Some(PathBuf::from(captures[1].to_string()));
        }
    }
    match &found {
        Some(dir) if dir.exists() => found,
        Some(dir) => {
            tracing::warn!(dir = %dir.display(), "parsed leaked directory does not exist");
            None
        }
        None => {
            tracing::warn!("no leaked test directory found in runner stderr");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_matching_leaked_dir_line() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let stderr = format!(
            "WARNING   3420    run_isolated(197): Deliberately leaking /nonexistent for later examination\n\
             WARNING   3420    run_isolated(197): Deliberately leaking {} for later examination\n",
            dir.display()
        );
        assert_eq!(parse_leaked_dir(&stderr), Some(dir));
    }

    #[test]
    fn missing_leaked_dir_line_returns_none() {
        assert_eq!(parse_leaked_dir("nothing interesting here\n"), None);
    }

    #[test]
    fn output_hash_regex_extracts_embedded_json() {
        let stdout = "noise\n[run_isolated_out_hack]{\"hash\": \"abc123\"}[/run_isolated_out_hack]\nmore noise";
        let captures = OUTPUT_HASH_RE.captures(stdout).unwrap();
        let value: serde_json::Value = serde_json::from_str(&captures[1]).unwrap();
        assert_eq!(value["hash"], "abc123");
    }
}
