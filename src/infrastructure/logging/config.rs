//! Logging configuration shape, merged in by the same Figment layers as the
//! rest of `Config`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    Never,
    Hourly,
    Daily,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub rotation: RotationPolicy,
    /// Directory for rolling file logs. `None` disables the file layer
    /// (stdout-only), useful for tests and local runs.
    pub directory: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Keep logging to stdout even when a file layer is also configured.
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    /// Scrub likely secrets (API keys, bearer tokens, password fields) out
    /// of logged event fields before they reach any sink.
    #[serde(default = "default_scrub_secrets")]
    pub scrub_secrets: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "dist-test".to_string()
}

fn default_scrub_secrets() -> bool {
    true
}

fn default_enable_stdout() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            rotation: RotationPolicy::default(),
            directory: None,
            file_prefix: default_file_prefix(),
            enable_stdout: default_enable_stdout(),
            scrub_secrets: default_scrub_secrets(),
        }
    }
}
