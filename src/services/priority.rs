//! Submission-time task ordering and queue priority assignment.

use crate::domain::models::duration::sort_by_duration_desc;
use crate::domain::models::{DurationRecord, Task};
use crate::domain::ports::task_queue::{retry_priority, DEFAULT_PRIORITY};

/// Priority a task should be submitted (or resubmitted) at.
pub fn priority_for(task: &Task) -> i64 {
    if task.attempt == 0 {
        DEFAULT_PRIORITY
    } else {
        retry_priority(task.attempt)
    }
}

/// Order tasks longest-first using known duration history, so the slave
/// fleet reserves the slowest work earliest and minimizes overall makespan.
/// History is keyed by `description`, the stable identity across attempts
/// (unlike `isolate_hash`, which changes whenever the underlying test
/// payload is rebuilt). Tasks with no history sort after all known ones;
/// ties preserve input (submission) order.
pub fn sort_tasks_by_duration(tasks: &mut [Task], durations: &dyn Fn(&str) -> Option<DurationRecord>) {
    sort_by_duration_desc(tasks, |task| durations(&task.description).map(|d| d.ewma_secs));
}
