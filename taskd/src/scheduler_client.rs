//! HTTP client for the external scheduler the task lifecycle service
//! dispatches work to.
//!
//! Mirrors the shape of the task executors in the original agent: a thin
//! wrapper around a shared `reqwest::Client`, with every failure mode
//! surfaced as a typed error rather than a generic `anyhow::Error`, since
//! the event processor branches on exactly which failure occurred.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use shared::config::ServiceConfig;
use shared::SchedulerError;
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct SubmitPayload<'a> {
    task_id: &'a str,
    service: &'a str,
    user_id: &'a str,
    parameters: &'a HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct CancelPayload<'a> {
    task_id: &'a str,
    service: &'a str,
    user_id: &'a str,
}

/// Client responsible for communicating with the external scheduler.
#[derive(Clone)]
pub struct SchedulerClient {
    client: reqwest::Client,
    task_url: String,
    cancel_url: String,
}

impl SchedulerClient {
    pub fn new(config: &ServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            task_url: config.scheduler_task_url(),
            cancel_url: config.scheduler_cancel_url(),
        })
    }

    pub async fn submit_task(
        &self,
        task_id: &str,
        service: &str,
        user_id: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<(), SchedulerError> {
        let payload = SubmitPayload {
            task_id,
            service,
            user_id,
            parameters,
        };
        debug!(url = %self.task_url, task_id, "submitting task to scheduler");
        self.post(&self.task_url, &payload).await
    }

    pub async fn cancel_task(
        &self,
        task_id: &str,
        service: &str,
        user_id: &str,
    ) -> Result<(), SchedulerError> {
        let payload = CancelPayload {
            task_id,
            service,
            user_id,
        };
        debug!(url = %self.cancel_url, task_id, "cancelling task via scheduler");
        self.post(&self.cancel_url, &payload).await
    }

    async fn post(&self, url: &str, payload: &impl Serialize) -> Result<(), SchedulerError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| SchedulerError::Unavailable {
                url: url.to_string(),
                cause: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(url, status = status.as_u16(), body, "scheduler responded with error");
        Err(SchedulerError::Response {
            url: url.to_string(),
            status_code: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base_url: &str) -> ServiceConfig {
        ServiceConfig {
            listen_address: "127.0.0.1:0".into(),
            redis_write_url: "redis://localhost:6379/0".into(),
            redis_read_url: None,
            redis_task_ttl_seconds: 3600,
            metadata_grace_seconds: 60,
            scheduler_base_url: base_url.to_string(),
            scheduler_task_endpoint: "/task".into(),
            scheduler_cancel_endpoint: "/cancel".into(),
            request_timeout_seconds: 5.0,
            event_worker_count: 1,
            operator_token: "secret".into(),
            log_level: "info".into(),
            log_json: true,
            in_memory_store: false,
        }
    }

    #[tokio::test]
    async fn submit_task_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = SchedulerClient::new(&config_for(&server.uri())).unwrap();
        let result = client.submit_task("1", "sync", "alice", &HashMap::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn submit_task_returns_response_error_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown service"))
            .mount(&server)
            .await;

        let client = SchedulerClient::new(&config_for(&server.uri())).unwrap();
        let err = client
            .submit_task("1", "sync", "alice", &HashMap::new())
            .await
            .unwrap_err();
        match err {
            SchedulerError::Response { status_code, body, .. } => {
                assert_eq!(status_code, 404);
                assert_eq!(body, "unknown service");
            }
            other => panic!("expected Response error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_task_returns_unavailable_when_unreachable() {
        let config = config_for("http://127.0.0.1:1");
        let client = SchedulerClient::new(&config).unwrap();
        let err = client
            .submit_task("1", "sync", "alice", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn cancel_task_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cancel"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = SchedulerClient::new(&config_for(&server.uri())).unwrap();
        let result = client.cancel_task("1", "sync", "alice").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn is_permanent_rejection_matches_403_and_404_only() {
        let forbidden = SchedulerError::Response {
            url: "x".into(),
            status_code: 403,
            body: String::new(),
        };
        let not_found = SchedulerError::Response {
            url: "x".into(),
            status_code: 404,
            body: String::new(),
        };
        let server_error = SchedulerError::Response {
            url: "x".into(),
            status_code: 500,
            body: String::new(),
        };
        assert!(forbidden.is_permanent_rejection());
        assert!(not_found.is_permanent_rejection());
        assert!(!server_error.is_permanent_rejection());
    }
}
