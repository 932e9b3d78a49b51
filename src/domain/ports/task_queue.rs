//! Task queue broker port: the priority-ordered, visibility-timeout-backed
//! work queue that stands between Master and the slave fleet.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::QueueResult;
use crate::domain::models::Task;

/// Default priority reserved for fresh submissions.
pub const DEFAULT_PRIORITY: i64 = crate::domain::models::task::DEFAULT_PRIORITY;

/// Priority assigned to a retried attempt: boosted ahead of fresh work but
/// never below the floor, so repeated retries can't starve the queue.
pub fn retry_priority(attempt: u32) -> i64 {
    let boosted = DEFAULT_PRIORITY - 1000 * i64::from(attempt);
    boosted.max(1000)
}

/// Opaque handle identifying a reserved queue entry, used for `touch`,
/// `delete`, and `release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservedHandle(pub String);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: u64,
    pub running: u64,
}

/// Port implemented by the work queue broker.
#[async_trait]
pub trait TaskQueuePort: Send + Sync {
    /// Enqueue `task` at `priority`; lower values are reserved first.
    async fn submit(&self, task: &Task, priority: i64) -> QueueResult<()>;

    /// Block (internally retrying) until an entry is available, returning
    /// the reserved task and a handle used to touch/delete/release it.
    async fn reserve(&self) -> QueueResult<(Task, ReservedHandle)>;

    /// Extend the visibility-timeout deadline of a reservation still in
    /// progress.
    async fn touch(&self, handle: &ReservedHandle) -> QueueResult<()>;

    /// Permanently remove a reserved entry once its work is done.
    async fn delete(&self, handle: &ReservedHandle) -> QueueResult<()>;

    /// Return a reserved entry to the ready set without finishing it
    /// (used when a CAS race means the work turned out to be unnecessary).
    async fn release(&self, handle: &ReservedHandle) -> QueueResult<()>;

    /// Current ready/running counts, used by the autoscaler and job status.
    async fn stats(&self) -> QueueResult<QueueStats>;
}
