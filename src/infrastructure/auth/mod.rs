//! HTTP Digest authentication and the source-IP bypass allow-list.

pub mod bypass;
pub mod digest;
pub mod middleware;

pub use bypass::BypassList;
pub use digest::{Challenge, DigestCredentials};
pub use middleware::{require_auth, AuthState};
