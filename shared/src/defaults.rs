//! Default values for configuration parameters.
//!
//! Centralized so `serde`'s `#[serde(default = "...")]` and
//! [`crate::config::ServiceConfig::default`] stay in sync.

pub fn default_redis_task_ttl_seconds() -> i64 {
    90 * 24 * 60 * 60
}

pub fn default_metadata_grace_seconds() -> i64 {
    60
}

pub fn default_scheduler_task_endpoint() -> String {
    "/task".to_string()
}

pub fn default_scheduler_cancel_endpoint() -> String {
    "/cancel".to_string()
}

pub fn default_event_worker_count() -> usize {
    4
}

pub fn default_request_timeout_seconds() -> f64 {
    10.0
}

pub fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_json() -> bool {
    true
}
