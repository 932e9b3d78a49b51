//! Task domain model: the serializable descriptor passed between master and
//! slaves, the persisted attempt row, and the derived task-group status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default queue priority. Lower values reserve first; this sits at the
/// midpoint of the `i64` priority space so that boosted retries (lower
/// numbers) and deprioritized work (higher numbers) both have room.
pub const DEFAULT_PRIORITY: i64 = 1 << 31;

/// Status code recorded once an attempt finishes.
pub mod status {
    /// The attempt's subprocess exited zero.
    pub const SUCCEEDED: i32 = 0;
    /// The attempt was killed after exceeding its timeout.
    pub const TIMED_OUT: i32 = -9;
    /// The job (or the attempt specifically) was canceled before it started.
    pub const CANCELED: i32 = -1;
}

/// Serializable task descriptor. This is what travels on the queue and in
/// the `/retry_task` request body; it carries no timestamps or results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job_id: String,
    pub task_id: String,
    pub isolate_hash: String,
    pub description: String,
    #[serde(default)]
    pub timeout_secs: u32,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub artifact_archive_globs: Vec<String>,
}

impl Task {
    /// Derive `task_id` from the payload fingerprint and its index within
    /// the submitted job, per the submission contract.
    pub fn task_id_for(isolate_hash: &str, index: usize) -> String {
        format!("{isolate_hash}.{index}")
    }

    /// Attempt-independent identity, used for retry anti-affinity and for
    /// grouping attempts into a `TaskGroup`.
    pub fn retry_id(&self) -> String {
        format!("{}.{}", self.job_id, self.task_id)
    }

    /// Fully-qualified identity of this specific attempt, used as the blob
    /// store key prefix.
    pub fn attempt_id(&self) -> String {
        format!("{}.{}.{}", self.job_id, self.task_id, self.attempt)
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.attempt < self.max_retries
    }
}

/// A persisted attempt row: everything master/slave add on top of the
/// submitted `Task` descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub job_id: String,
    pub task_id: String,
    pub attempt: u32,
    pub max_retries: u32,
    pub description: String,
    pub submit_ts: DateTime<Utc>,
    pub start_ts: Option<DateTime<Utc>>,
    pub complete_ts: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    /// `NULL` while unfinished; `0` on success; `-9` on timeout-kill; `-1`
    /// on cancel; any other value is a failing exit code.
    pub status: Option<i32>,
    pub output_archive_hash: Option<String>,
    pub stdout_abbrev: Option<String>,
    pub stderr_abbrev: Option<String>,
    pub stdout_key: Option<String>,
    pub stderr_key: Option<String>,
    pub artifact_archive_key: Option<String>,
}

impl TaskRecord {
    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == Some(status::SUCCEEDED)
    }

    pub fn is_failed_attempt(&self) -> bool {
        matches!(self.status, Some(s) if s != status::SUCCEEDED)
    }
}

/// All attempt rows sharing `(job_id, task_id)`. Not stored — computed on
/// demand from `fetch_task_rows_for_job`.
pub struct TaskGroup<'a> {
    pub task_id: &'a str,
    pub tasks: Vec<&'a TaskRecord>,
}

impl<'a> TaskGroup<'a> {
    pub fn new(task_id: &'a str, tasks: Vec<&'a TaskRecord>) -> Self {
        Self { task_id, tasks }
    }

    pub fn any_succeeded(&self) -> bool {
        self.tasks.iter().any(|t| t.is_succeeded())
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.is_failed_attempt())
    }

    pub fn all_failed(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.is_failed_attempt())
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.tasks.iter().all(|t| t.attempt < t.max_retries)
    }

    pub fn is_succeeded(&self) -> bool {
        self.any_succeeded()
    }

    pub fn is_failed(&self) -> bool {
        self.all_failed() && !self.has_retries_remaining()
    }

    pub fn is_flaky(&self) -> bool {
        (self.all_failed() && self.has_retries_remaining()) || (self.any_succeeded() && self.any_failed())
    }

    pub fn is_finished(&self) -> bool {
        self.any_succeeded() || (self.all_failed() && !self.has_retries_remaining())
    }

    /// Number of failing attempts within a flaky group (used for the
    /// `flaky_tasks` job-summary counter).
    pub fn flaky_attempt_count(&self) -> usize {
        if !self.is_flaky() {
            return 0;
        }
        self.tasks.iter().filter(|t| !t.is_succeeded()).count()
    }
}

/// Group attempt rows of a job by `task_id`, preserving first-seen order.
pub fn group_by_task_id(rows: &[TaskRecord]) -> Vec<TaskGroup<'_>> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: std::collections::HashMap<&str, Vec<&TaskRecord>> = std::collections::HashMap::new();
    for row in rows {
        groups.entry(row.task_id.as_str()).or_insert_with(|| {
            order.push(row.task_id.as_str());
            Vec::new()
        });
    }
    for row in rows {
        groups.get_mut(row.task_id.as_str()).unwrap().push(row);
    }
    order
        .into_iter()
        .map(|task_id| TaskGroup::new(task_id, groups.remove(task_id).unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(attempt: u32, max_retries: u32, status: Option<i32>) -> TaskRecord {
        TaskRecord {
            job_id: "u.1.2".into(),
            task_id: "a".repeat(40) + ".0",
            attempt,
            max_retries,
            description: "t1".into(),
            submit_ts: Utc::now(),
            start_ts: None,
            complete_ts: None,
            hostname: None,
            status,
            output_archive_hash: None,
            stdout_abbrev: None,
            stderr_abbrev: None,
            stdout_key: None,
            stderr_key: None,
            artifact_archive_key: None,
        }
    }

    #[test]
    fn single_success_is_succeeded_and_finished() {
        let rows = vec![row(0, 0, Some(0))];
        let group = TaskGroup::new("t", rows.iter().collect());
        assert!(group.is_succeeded());
        assert!(!group.is_failed());
        assert!(!group.is_flaky());
        assert!(group.is_finished());
    }

    #[test]
    fn flaky_then_succeeded_matches_s2() {
        let rows = vec![row(0, 2, Some(1)), row(1, 2, Some(0))];
        let group = TaskGroup::new("t", rows.iter().collect());
        assert!(group.is_flaky());
        assert!(group.is_succeeded());
        assert!(!group.is_failed());
    }

    #[test]
    fn exhausted_retries_is_failed_matches_s3() {
        let rows = vec![row(0, 1, Some(2)), row(1, 1, Some(2))];
        let group = TaskGroup::new("t", rows.iter().collect());
        assert!(group.is_failed());
        assert!(!group.is_succeeded());
        assert!(group.is_finished());
    }

    #[test]
    fn all_failed_with_retries_remaining_is_flaky_not_finished() {
        let rows = vec![row(0, 2, Some(1))];
        let group = TaskGroup::new("t", rows.iter().collect());
        assert!(group.is_flaky());
        assert!(!group.is_finished());
    }

    #[test]
    fn unfinished_group_has_no_predicate_true() {
        let rows = vec![row(0, 0, None)];
        let group = TaskGroup::new("t", rows.iter().collect());
        assert!(!group.is_succeeded());
        assert!(!group.is_failed());
        assert!(!group.is_flaky());
        assert!(!group.is_finished());
    }

    #[test]
    fn retry_and_attempt_ids() {
        let task = Task {
            job_id: "u.1.2".into(),
            task_id: "abc.0".into(),
            isolate_hash: "abc".into(),
            description: "t1".into(),
            timeout_secs: 30,
            attempt: 1,
            max_retries: 2,
            artifact_archive_globs: vec![],
        };
        assert_eq!(task.retry_id(), "u.1.2.abc.0");
        assert_eq!(task.attempt_id(), "u.1.2.abc.0.1");
        assert!(task.has_retries_remaining());
    }
}
