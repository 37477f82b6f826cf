//! Configuration types shared between `taskd` and its configuration loader.
//!
//! `ServiceConfig` is the plain data; `taskd::config::ConfigManager` owns
//! reading it from disk and applying CLI overrides.

use serde::{Deserialize, Serialize};

use crate::defaults::*;
use crate::error::TaskError;

/// Configuration for the task lifecycle service, loaded from `taskd.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Redis URL used for writes. Required.
    pub redis_write_url: String,
    /// Redis URL used for reads. Falls back to `redis_write_url` if absent.
    #[serde(default)]
    pub redis_read_url: Option<String>,
    /// TTL applied to every task key and its indexes. Must be positive.
    #[serde(default = "default_redis_task_ttl_seconds")]
    pub redis_task_ttl_seconds: i64,
    /// Extra lifetime the metadata breadcrumb gets beyond the task TTL, so
    /// the expiration listener can still read it after the primary expires.
    #[serde(default = "default_metadata_grace_seconds")]
    pub metadata_grace_seconds: i64,

    /// Base URL of the external scheduler.
    pub scheduler_base_url: String,
    #[serde(default = "default_scheduler_task_endpoint")]
    pub scheduler_task_endpoint: String,
    #[serde(default = "default_scheduler_cancel_endpoint")]
    pub scheduler_cancel_endpoint: String,
    /// Timeout applied uniformly to every outbound scheduler request.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: f64,

    /// Number of event processor workers. Must be at least 1.
    #[serde(default = "default_event_worker_count")]
    pub event_worker_count: usize,

    /// Shared secret required on the `X-Operator-Token` header.
    pub operator_token: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    /// Development escape hatch: use the in-memory repository instead of
    /// Redis, and skip starting the expiration listener.
    #[serde(default)]
    pub in_memory_store: bool,
}

impl ServiceConfig {
    /// Returns the reader URL, falling back to the writer URL when a
    /// dedicated reader was not configured.
    pub fn redis_read_url(&self) -> &str {
        self.redis_read_url.as_deref().unwrap_or(&self.redis_write_url)
    }

    /// Composes the full scheduler submission URL.
    pub fn scheduler_task_url(&self) -> String {
        join_url(&self.scheduler_base_url, &self.scheduler_task_endpoint)
    }

    /// Composes the full scheduler cancellation URL.
    pub fn scheduler_cancel_url(&self) -> String {
        join_url(&self.scheduler_base_url, &self.scheduler_cancel_endpoint)
    }

    /// Validates values that would otherwise fail silently or late: a
    /// non-positive TTL or a zero worker count are programming errors and
    /// must be caught at construction time, before any networking happens.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.redis_task_ttl_seconds <= 0 {
            return Err(TaskError::NonPositiveTtl(self.redis_task_ttl_seconds));
        }
        if self.event_worker_count == 0 {
            return Err(TaskError::ZeroWorkers(self.event_worker_count));
        }
        Ok(())
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    let base = base.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{base}{endpoint}")
    } else {
        format!("{base}/{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceConfig {
        ServiceConfig {
            listen_address: default_listen_address(),
            redis_write_url: "redis://localhost:6379/0".into(),
            redis_read_url: None,
            redis_task_ttl_seconds: default_redis_task_ttl_seconds(),
            metadata_grace_seconds: default_metadata_grace_seconds(),
            scheduler_base_url: "http://scheduler.internal".into(),
            scheduler_task_endpoint: default_scheduler_task_endpoint(),
            scheduler_cancel_endpoint: default_scheduler_cancel_endpoint(),
            request_timeout_seconds: default_request_timeout_seconds(),
            event_worker_count: default_event_worker_count(),
            operator_token: "secret".into(),
            log_level: default_log_level(),
            log_json: default_log_json(),
            in_memory_store: false,
        }
    }

    #[test]
    fn redis_read_url_falls_back_to_writer() {
        let config = sample();
        assert_eq!(config.redis_read_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_read_url_uses_dedicated_reader_when_present() {
        let mut config = sample();
        config.redis_read_url = Some("redis://reader:6379/0".into());
        assert_eq!(config.redis_read_url(), "redis://reader:6379/0");
    }

    #[test]
    fn scheduler_urls_are_composed_regardless_of_trailing_slash() {
        let mut config = sample();
        config.scheduler_base_url = "http://scheduler.internal/".into();
        assert_eq!(config.scheduler_task_url(), "http://scheduler.internal/task");
        assert_eq!(config.scheduler_cancel_url(), "http://scheduler.internal/cancel");
    }

    #[test]
    fn validate_rejects_non_positive_ttl() {
        let mut config = sample();
        config.redis_task_ttl_seconds = 0;
        assert!(matches!(config.validate(), Err(TaskError::NonPositiveTtl(0))));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = sample();
        config.event_worker_count = 0;
        assert!(matches!(config.validate(), Err(TaskError::ZeroWorkers(0))));
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(sample().validate().is_ok());
    }
}
