//! Error taxonomy shared between the scheduler client, the event processor,
//! and the repository.

use thiserror::Error;

/// Errors raised by [`crate::Event`] dispatch against the scheduler.
///
/// The event processor matches on these two variants explicitly: a
/// [`SchedulerError::Unavailable`] is a transport failure, a
/// [`SchedulerError::Response`] is an HTTP-level rejection that may or may
/// not be permanent depending on its status code.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler at {url} is unreachable: {cause}")]
    Unavailable { url: String, cause: String },

    #[error("scheduler at {url} responded with {status_code}: {body}")]
    Response {
        url: String,
        status_code: u16,
        body: String,
    },
}

impl SchedulerError {
    /// 403/404 indicate the scheduler has permanently rejected the task;
    /// every other non-2xx status is transient from the core's point of view.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(self, SchedulerError::Response { status_code, .. } if *status_code == 403 || *status_code == 404)
    }
}

/// Programming errors raised by the repository and task service that should
/// never reach an end user; construction-time misconfiguration belongs here.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task_ttl_seconds must be a positive integer, got {0}")]
    NonPositiveTtl(i64),

    #[error("event_worker_count must be at least 1, got {0}")]
    ZeroWorkers(usize),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
