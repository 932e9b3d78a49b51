//! Plain data types shared across services and adapters.

pub mod config;
pub mod duration;
pub mod task;

pub use config::Config;
pub use duration::DurationRecord;
pub use task::{group_by_task_id, Task, TaskGroup, TaskRecord};
