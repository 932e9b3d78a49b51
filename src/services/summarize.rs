//! Aggregate statistics over a job's attempt rows, used by `/job_status`
//! and by the client CLI's progress line.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::models::task::status;
use crate::domain::models::{group_by_task_id, TaskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub running_tasks: usize,
    pub retried_tasks: usize,
    pub timedout_tasks: usize,
    pub failed_tasks: usize,
    pub succeeded_tasks: usize,

    pub total_groups: usize,
    pub flaky_groups: usize,
    pub failed_groups: usize,
    pub succeeded_groups: usize,
    pub finished_groups: usize,
    pub flaky_tasks: usize,

    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_secs: Option<f64>,
}

/// Compute the aggregate summary of a job's attempt rows. Returns `None` for
/// an empty set (a job id with no registered tasks).
pub fn summarize_tasks(tasks: &[TaskRecord]) -> Option<JobSummary> {
    if tasks.is_empty() {
        return None;
    }

    let total_tasks = tasks.len();
    let finished_tasks = tasks.iter().filter(|t| t.status.is_some()).count();
    let running_tasks = tasks.iter().filter(|t| t.status.is_none()).count();
    let retried_tasks = tasks.iter().filter(|t| t.attempt > 0).count();
    let timedout_tasks = tasks.iter().filter(|t| t.status == Some(status::TIMED_OUT)).count();
    let failed_tasks = tasks
        .iter()
        .filter(|t| t.status.is_some() && t.status != Some(status::SUCCEEDED))
        .count();
    let succeeded_tasks = tasks.iter().filter(|t| t.status == Some(status::SUCCEEDED)).count();

    let groups = group_by_task_id(tasks);
    let total_groups = groups.len();
    let flaky_groups = groups.iter().filter(|g| g.is_flaky()).count();
    let failed_groups = groups.iter().filter(|g| g.is_failed()).count();
    let succeeded_groups = groups.iter().filter(|g| g.is_succeeded()).count();
    let finished_groups = groups.iter().filter(|g| g.is_finished()).count();
    let flaky_tasks = groups.iter().map(|g| g.flaky_attempt_count()).sum();

    let submit_time = tasks.iter().map(|t| t.submit_ts).min();
    let mut finish_time = None;
    let mut job_status = JobState::Running;
    if total_groups == finished_groups {
        job_status = JobState::Finished;
        finish_time = tasks.iter().filter_map(|t| t.complete_ts).max();
    }
    let stop = finish_time.unwrap_or_else(Utc::now);
    let runtime_secs = submit_time.map(|start| (stop - start).num_milliseconds() as f64 / 1000.0);

    Some(JobSummary {
        total_tasks,
        finished_tasks,
        running_tasks,
        retried_tasks,
        timedout_tasks,
        failed_tasks,
        succeeded_tasks,
        total_groups,
        flaky_groups,
        failed_groups,
        succeeded_groups,
        finished_groups,
        flaky_tasks,
        status: job_status,
        submit_time,
        finish_time,
        runtime_secs,
    })
}

impl JobSummary {
    /// Client CLI exit-code contract: 0 if every group eventually
    /// succeeded, 88 if any group is failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed_groups > 0 {
            88
        } else {
            0
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(task_id: &str, attempt: u32, max_retries: u32, status: Option<i32>, submit_ts: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            job_id: "u.1.2".into(),
            task_id: task_id.into(),
            attempt,
            max_retries,
            description: "t".into(),
            submit_ts,
            start_ts: None,
            complete_ts: status.map(|_| submit_ts),
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
    fn empty_job_has_no_summary() {
        assert!(summarize_tasks(&[]).is_none());
    }

    #[test]
    fn all_succeeded_job_is_finished_with_zero_exit_code() {
        let now = Utc::now();
        let tasks = vec![row("a", 0, 0, Some(0), now), row("b", 0, 0, Some(0), now)];
        let summary = summarize_tasks(&tasks).unwrap();
        assert_eq!(summary.total_groups, 2);
        assert_eq!(summary.succeeded_groups, 2);
        assert!(summary.is_finished());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn exhausted_retry_group_fails_job_with_88_exit_code() {
        let now = Utc::now();
        let tasks = vec![
            row("a", 0, 0, Some(0), now),
            row("b", 0, 1, Some(2), now),
            row("b", 1, 1, Some(2), now),
        ];
        let summary = summarize_tasks(&tasks).unwrap();
        assert_eq!(summary.failed_groups, 1);
        assert!(summary.is_finished());
        assert_eq!(summary.exit_code(), 88);
    }

    #[test]
    fn unfinished_group_keeps_job_running() {
        let now = Utc::now();
        let tasks = vec![row("a", 0, 0, None, now)];
        let summary = summarize_tasks(&tasks).unwrap();
        assert!(!summary.is_finished());
        assert_eq!(summary.running_tasks, 1);
    }

    #[test]
    fn flaky_group_counts_failing_attempts() {
        let now = Utc::now();
        let tasks = vec![
            row("a", 0, 2, Some(1), now),
            row("a", 1, 2, Some(0), now),
        ];
        let summary = summarize_tasks(&tasks).unwrap();
        assert_eq!(summary.flaky_groups, 1);
        assert_eq!(summary.flaky_tasks, 1);
    }
}
