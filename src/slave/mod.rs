//! Slave: reserves tasks from the queue, runs the isolate runner, and
//! reports results back to the master.

pub mod cache_dir;
pub mod healthz;
pub mod main_loop;
pub mod runner;

pub use main_loop::Slave;
