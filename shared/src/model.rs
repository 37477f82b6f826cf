//! The durable task model.
//!
//! A [`TaskRecord`] is the single unit of state the whole system agrees on:
//! the repository persists it, the event processor mutates it, and the HTTP
//! layer serializes it back out verbatim. Nothing else in the system is
//! allowed to invent task state outside of this struct.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp;

/// Lifecycle stage of a task, from submission through terminal resolution.
///
/// See the state machine in `TaskService` for the allowed transitions
/// between these variants; this type only names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatching,
    Running,
    Completed,
    Failed,
    CancelRequested,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition to a non-terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Dispatch priority. Recorded on the task but never consulted by the event
/// processor: the queue is strict FIFO regardless of this field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Low,
}

/// Structured result payload a scheduler callback may attach to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_output: Option<String>,
}

impl TaskResult {
    /// Merges present fields from `pod_status`/`launcher_output` into this
    /// result. Returns `true` if anything actually changed.
    pub fn merge(&mut self, pod_status: Option<String>, launcher_output: Option<String>) -> bool {
        let mut changed = false;
        if let Some(pod_status) = pod_status {
            if self.pod_status.as_deref() != Some(pod_status.as_str()) {
                self.pod_status = Some(pod_status);
                changed = true;
            }
        }
        if let Some(launcher_output) = launcher_output {
            if self.launcher_output.as_deref() != Some(launcher_output.as_str()) {
                self.launcher_output = Some(launcher_output);
                changed = true;
            }
        }
        changed
    }
}

/// The durable unit stored under `task:{id}` in the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub service: String,
    pub user_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub result: TaskResult,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskRecord {
    /// Builds a freshly submitted task, status `Pending`, with no logs.
    pub fn new_pending(
        task_id: String,
        service: String,
        user_id: String,
        parameters: HashMap<String, Value>,
        priority: Priority,
    ) -> Self {
        let now = timestamp::now();
        Self {
            task_id,
            service,
            user_id,
            status: TaskStatus::Pending,
            parameters,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
            result: TaskResult::default(),
            priority,
        }
    }

    /// Appends a log entry and advances `updated_at`. Every mutation on a
    /// task record goes through this so invariant 2 (`updated_at >=
    /// created_at`, advanced on every mutation) always holds.
    pub fn touch(&mut self, log_entry: Option<&str>) {
        self.updated_at = timestamp::now();
        if let Some(message) = log_entry {
            self.logs.push(timestamp::log_entry(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pending_has_no_logs_and_default_priority() {
        let record = TaskRecord::new_pending(
            "1".into(),
            "sync".into(),
            "alice".into(),
            HashMap::new(),
            Priority::default(),
        );
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.logs.is_empty());
        assert_eq!(record.priority, Priority::Low);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn touch_advances_updated_at_and_appends_log() {
        let mut record = TaskRecord::new_pending(
            "1".into(),
            "sync".into(),
            "alice".into(),
            HashMap::new(),
            Priority::default(),
        );
        let created_at = record.created_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        record.touch(Some("hello"));
        assert!(record.updated_at >= created_at);
        assert_eq!(record.logs.len(), 1);
        assert!(record.logs[0].ends_with(",hello"));
    }

    #[test]
    fn result_merge_reports_whether_anything_changed() {
        let mut result = TaskResult::default();
        assert!(result.merge(None, None) == false);
        assert!(result.merge(Some("Running".into()), None));
        assert!(!result.merge(Some("Running".into()), None));
        assert!(result.merge(None, Some("out".into())));
    }

    #[test]
    fn status_terminal_classification() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::CancelRequested.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::CancelRequested).unwrap();
        assert_eq!(json, "\"cancel_requested\"");
    }
}
