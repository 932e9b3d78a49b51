//! Business logic built purely against domain ports, free of any concrete
//! adapter (sqlite, redis, S3, subprocess) dependency.

pub mod artifact_packager;
pub mod priority;
pub mod retry_cache;
pub mod summarize;
