//! Orchestrates task lifecycle operations: creation, cancellation, cleanup,
//! and the read paths the HTTP layer exposes.
//!
//! The state machine itself lives in [`TaskStatus`]; this module only
//! enforces which transitions are legal and drives the event processor.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use shared::event::Event;
use shared::model::{Priority, TaskRecord, TaskStatus};
use tracing::info;

use crate::event_processor::EventSender;
use crate::repository::TaskRepository;

/// Result of [`TaskService::create`].
pub struct TaskCreateResult {
    pub task_id: String,
    pub status: TaskStatus,
}

pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    events: EventSender,
}

impl TaskService {
    pub fn new(repository: Arc<dyn TaskRepository>, events: EventSender) -> Self {
        Self { repository, events }
    }

    pub async fn create(
        &self,
        service: &str,
        user_id: &str,
        parameters: HashMap<String, Value>,
        priority: Priority,
    ) -> Result<TaskCreateResult> {
        let task_id = self.repository.next_task_id().await?;
        let record = TaskRecord::new_pending(
            task_id.clone(),
            service.to_string(),
            user_id.to_string(),
            parameters.clone(),
            priority,
        );
        self.repository.save(&record).await?;
        self.events.send(Event::Submitted {
            task_id: task_id.clone(),
            service: service.to_string(),
            user_id: user_id.to_string(),
            parameters,
        });
        info!(task_id, service, user_id, "task created");
        Ok(TaskCreateResult { task_id, status: record.status })
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        self.repository.get(task_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<TaskRecord>> {
        self.repository.list_all().await
    }

    pub async fn list_by_service(&self, service: &str) -> Result<Vec<TaskRecord>> {
        self.repository.list_by_service(service).await
    }

    pub async fn list_by_service_and_user(&self, service: &str, user_id: &str) -> Result<Vec<TaskRecord>> {
        self.repository.list_by_service_and_user(service, user_id).await
    }

    pub async fn list_users_by_service(&self, service: &str) -> Result<Vec<String>> {
        self.repository.list_users_by_service(service).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.repository.health_check().await
    }

    pub async fn append_log(&self, task_id: &str, message: &str) -> Result<Option<TaskRecord>> {
        self.repository.append_log(task_id, message).await
    }

    pub async fn update_result(
        &self,
        task_id: &str,
        pod_status: Option<String>,
        launcher_output: Option<String>,
    ) -> Result<Option<TaskRecord>> {
        self.repository.update_result(task_id, pod_status, launcher_output).await
    }

    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> Result<Option<TaskRecord>> {
        self.repository.set_status(task_id, status, log_entry).await
    }

    /// Requests cancellation. Ownership filters (`service`/`user_id`), when
    /// given, must match or `None` is returned as if the task didn't exist.
    /// A terminal task is returned unchanged (idempotent). Otherwise the
    /// task moves to `CancelRequested` (unless already there) and a
    /// `TASK_CANCELLED` event is always (re-)enqueued, so repeated calls
    /// re-drive the scheduler call.
    pub async fn cancel(
        &self,
        task_id: &str,
        service: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<TaskRecord>> {
        let Some(mut record) = self.repository.get(task_id).await? else {
            return Ok(None);
        };
        if let Some(service) = service {
            if record.service != service {
                return Ok(None);
            }
        }
        if let Some(user_id) = user_id {
            if record.user_id != user_id {
                return Ok(None);
            }
        }

        if record.status.is_terminal() {
            return Ok(Some(record));
        }

        if record.status != TaskStatus::CancelRequested {
            record = self
                .repository
                .set_status(task_id, TaskStatus::CancelRequested, Some("Cancellation requested"))
                .await?
                .expect("task existed moments ago");
        }

        self.events.send(Event::Cancelled {
            task_id: task_id.to_string(),
            service: record.service.clone(),
            user_id: record.user_id.clone(),
        });

        Ok(Some(record))
    }

    /// Cancels and then deletes the task. Returns `true` if the task
    /// existed and passed the ownership filter.
    pub async fn cleanup(
        &self,
        task_id: &str,
        service: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<bool> {
        let Some(_) = self.cancel(task_id, service, user_id).await? else {
            return Ok(false);
        };
        self.repository.delete(task_id).await?;
        Ok(true)
    }
}
