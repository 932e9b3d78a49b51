//! Concrete implementations of ambient, cross-cutting concerns: config,
//! logging, and auth. Adapters for domain ports live under `adapters`.

pub mod auth;
pub mod config;
pub mod logging;
