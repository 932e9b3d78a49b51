//! Trait boundaries between pure domain logic and the outside world.

pub mod blob_store;
pub mod results_store;
pub mod task_queue;

pub use blob_store::BlobStorePort;
pub use results_store::{FinishedAttempt, ResultsStorePort};
pub use task_queue::{QueueStats, ReservedHandle, TaskQueuePort};
