use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database url cannot be empty")]
    EmptyDatabaseUrl,

    #[error("invalid max_connections: {0}, must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid log level: {0}, must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid reservation_ttl_secs: {0}, must be positive")]
    InvalidReservationTtl(u64),

    #[error("invalid autoscaler grow_step: {0}, must be at least 1")]
    InvalidGrowStep(u32),

    #[error("autoscaler max_size {0} is smaller than grow_step {1}")]
    MaxSizeSmallerThanGrowStep(u32, u32),

    #[error("blob_store.kind is s3 but s3_bucket is not set")]
    MissingS3Bucket,

    #[error("invalid auth_bypass_cidrs entry {0:?}: {1}")]
    InvalidCidr(String, String),
}

/// Loads `Config` through a layered Figment merge, mirroring how most
/// services in this codebase resolve configuration: programmatic defaults,
/// then a project file, then an optional local override file, then
/// environment variables (highest precedence).
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. `Config::default()`
    /// 2. `dist-test.yaml` (project config)
    /// 3. `dist-test.local.yaml` (optional local overrides, gitignored)
    /// 4. `DIST_TEST_*` environment variables (double-underscore nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("dist-test.yaml"))
            .merge(Yaml::file("dist-test.local.yaml"))
            .merge(Env::prefixed("DIST_TEST_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DIST_TEST_").split("__"))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.queue.reservation_ttl_secs == 0 {
            return Err(ConfigError::InvalidReservationTtl(config.queue.reservation_ttl_secs));
        }

        if config.autoscaler.grow_step == 0 {
            return Err(ConfigError::InvalidGrowStep(config.autoscaler.grow_step));
        }
        if config.autoscaler.max_size < config.autoscaler.grow_step {
            return Err(ConfigError::MaxSizeSmallerThanGrowStep(
                config.autoscaler.max_size,
                config.autoscaler.grow_step,
            ));
        }

        if config.blob_store.kind == crate::domain::models::config::BlobStoreKind::S3
            && config.blob_store.s3_bucket.is_none()
        {
            return Err(ConfigError::MissingS3Bucket);
        }

        for cidr in &config.master.auth_bypass_cidrs {
            cidr.parse::<ipnet::IpNet>()
                .map_err(|e| ConfigError::InvalidCidr(cidr.clone(), e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should validate");
    }

    #[test]
    fn rejects_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn rejects_max_size_below_grow_step() {
        let mut config = Config::default();
        config.autoscaler.grow_step = 50;
        config.autoscaler.max_size = 10;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::MaxSizeSmallerThanGrowStep(10, 50))
        ));
    }

    #[test]
    fn s3_kind_without_bucket_is_rejected() {
        let mut config = Config::default();
        config.blob_store.kind = crate::domain::models::config::BlobStoreKind::S3;
        config.blob_store.s3_bucket = None;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::MissingS3Bucket)));
    }

    #[test]
    fn invalid_cidr_is_rejected() {
        let mut config = Config::default();
        config.master.auth_bypass_cidrs.push("not-a-cidr".to_string());
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidCidr(_, _))));
    }

    #[test]
    fn hierarchical_merging_prefers_override_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "database:\n  url: sqlite://base.db\nlogging:\n  level: info").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "logging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.database.url, "sqlite://base.db");
        assert_eq!(config.logging.level, "debug");
    }
}
