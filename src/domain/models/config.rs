//! Top-level configuration shape, loaded by `infrastructure::config::loader`
//! through a layered Figment merge (defaults -> project yaml -> local yaml ->
//! env overrides).

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::infrastructure::logging::LogConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub slave: SlaveConfig,
    #[serde(default)]
    pub autoscaler: AutoscalerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            blob_store: BlobStoreConfig::default(),
            master: MasterConfig::default(),
            slave: SlaveConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://dist-test.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Reservation visibility timeout, in seconds, before a sweep returns an
    /// un-touched reservation to the ready set.
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_reservation_ttl() -> u64 {
    120
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            reservation_ttl_secs: default_reservation_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreKind {
    S3,
    Filesystem,
}

impl Default for BlobStoreKind {
    fn default() -> Self {
        Self::Filesystem
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    #[serde(default)]
    pub kind: BlobStoreKind,
    pub s3_bucket: Option<String>,
    #[serde(default = "default_fs_root")]
    pub fs_root: PathBuf,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

fn default_fs_root() -> PathBuf {
    PathBuf::from("./blobs")
}

fn default_presign_ttl() -> u64 {
    86_400
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            kind: BlobStoreKind::default(),
            s3_bucket: None,
            fs_root: default_fs_root(),
            presign_ttl_secs: default_presign_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Accounts permitted to hit authenticated endpoints (account -> password).
    #[serde(default)]
    pub auth_accounts: HashMap<String, String>,
    /// Source IP ranges that bypass Digest auth entirely.
    #[serde(default)]
    pub auth_bypass_cidrs: Vec<String>,
    #[serde(default = "default_auth_realm")]
    pub auth_realm: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_auth_realm() -> String {
    "dist-test".to_string()
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth_accounts: HashMap::new(),
            auth_bypass_cidrs: Vec::new(),
            auth_realm: default_auth_realm(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    #[serde(default = "default_master_url")]
    pub master_url: String,
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    #[serde(default = "default_num_cache_dirs")]
    pub num_cache_dirs: u32,
    #[serde(default = "default_healthz_bind_addr")]
    pub healthz_bind_addr: String,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    /// Directory containing the `run_isolated.py` runner binary.
    #[serde(default = "default_isolate_home")]
    pub isolate_home: PathBuf,
    /// Content-addressed isolate file server the runner fetches inputs from.
    #[serde(default = "default_isolate_server")]
    pub isolate_server: String,
}

fn default_master_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("/tmp/dist-test-cache")
}

fn default_num_cache_dirs() -> u32 {
    16
}

fn default_healthz_bind_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_isolate_home() -> PathBuf {
    PathBuf::from("/usr/local/isolate")
}

fn default_isolate_server() -> String {
    "https://isolateserver.appspot.com".to_string()
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            master_url: default_master_url(),
            cache_root: default_cache_root(),
            num_cache_dirs: default_num_cache_dirs(),
            healthz_bind_addr: default_healthz_bind_addr(),
            kill_grace_secs: default_kill_grace_secs(),
            isolate_home: default_isolate_home(),
            isolate_server: default_isolate_server(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(default = "default_master_url")]
    pub master_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_shrink_lag")]
    pub shrink_lag_secs: u64,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_grow_step")]
    pub grow_step: u32,
    /// Shell command used to resize/describe the fleet, e.g. a `gcloud
    /// compute instance-groups managed` invocation.
    #[serde(default)]
    pub resize_command: Vec<String>,
    #[serde(default)]
    pub describe_command: Vec<String>,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_shrink_lag() -> u64 {
    600
}

fn default_max_size() -> u32 {
    100
}

fn default_grow_step() -> u32 {
    10
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            master_url: default_master_url(),
            poll_interval_secs: default_poll_interval(),
            shrink_lag_secs: default_shrink_lag(),
            max_size: default_max_size(),
            grow_step: default_grow_step(),
            resize_command: Vec::new(),
            describe_command: Vec::new(),
        }
    }
}

/// A parsed CIDR allow-list entry, resolved once at config-validation time.
#[derive(Debug, Clone, Copy)]
pub struct AllowedRange(pub ipnet::IpNet);

impl AllowedRange {
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.0.contains(&addr)
    }
}
