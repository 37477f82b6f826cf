//! Configuration management for the task lifecycle service.
//!
//! This module handles loading and validating a `taskd.toml` file into a
//! [`ServiceConfig`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use shared::config::ServiceConfig;
use tracing::{debug, info};

/// The expected name of the configuration file.
const CONFIG_FILE: &str = "taskd.toml";

/// Manages the service's configuration.
pub struct ConfigManager {
    /// Full path to the configuration file.
    pub config_path: PathBuf,
    /// The loaded and validated configuration.
    pub config: ServiceConfig,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads+validates the
    /// configuration, so an instance is always in a valid loaded state.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            anyhow::bail!("Configuration file does not exist: {}", config_path.display());
        }

        let config = Self::load(&config_path)?;
        Ok(Self { config_path, config })
    }

    fn load(config_path: &std::path::Path) -> Result<ServiceConfig> {
        info!("Loading task service configuration from {}", config_path.display());

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ServiceConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

        debug!(listen_address = %config.listen_address, "listen_address");
        debug!(redis_write_url = %config.redis_write_url, "redis_write_url");
        debug!(redis_task_ttl_seconds = config.redis_task_ttl_seconds, "redis_task_ttl_seconds");
        debug!(scheduler_base_url = %config.scheduler_base_url, "scheduler_base_url");
        debug!(event_worker_count = config.event_worker_count, "event_worker_count");
        debug!(in_memory_store = config.in_memory_store, "in_memory_store");

        info!(
            listen_address = %config.listen_address,
            scheduler_base_url = %config.scheduler_base_url,
            "task service configuration loaded successfully"
        );

        Ok(config)
    }

    /// Re-reads the configuration file from disk, validating the result
    /// before replacing the in-memory copy.
    pub fn reload(&mut self) -> Result<()> {
        self.config = Self::load(&self.config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
        redis_write_url = "redis://localhost:6379/0"
        scheduler_base_url = "http://scheduler.internal"
        operator_token = "secret"
    "#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        assert_eq!(manager.config.redis_task_ttl_seconds, 90 * 24 * 60 * 60);
        assert_eq!(manager.config.event_worker_count, 4);
        assert!(!manager.config.in_memory_store);
    }

    #[test]
    fn missing_file_fails_construction() {
        let result = ConfigManager::new(PathBuf::from("/nonexistent/taskd.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_ttl_fails_validation() {
        let file = write_config(
            r#"
            redis_write_url = "redis://localhost:6379/0"
            redis_task_ttl_seconds = 0
            scheduler_base_url = "http://scheduler.internal"
            operator_token = "secret"
            "#,
        );
        let result = ConfigManager::new(file.path().to_path_buf());
        assert!(result.is_err());
    }

    #[test]
    fn reload_picks_up_on_disk_changes() {
        let file = write_config(MINIMAL);
        let mut manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        std::fs::write(
            file.path(),
            r#"
            redis_write_url = "redis://localhost:6379/0"
            scheduler_base_url = "http://scheduler.internal"
            operator_token = "secret"
            in_memory_store = true
            "#,
        )
        .unwrap();
        manager.reload().unwrap();
        assert!(manager.config.in_memory_store);
    }
}
