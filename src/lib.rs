//! A distributed test-execution service: a master that queues and tracks
//! test tasks, slaves that reserve and run them in isolated sandboxes, an
//! autoscaler that sizes the slave fleet to backlog, and `dctl`, the client
//! used to submit and watch jobs.

pub mod domain;
pub mod services;
pub mod adapters;
pub mod infrastructure;

pub mod master;
pub mod slave;
pub mod autoscaler;
pub mod client;
