//! In-process lifecycle events consumed by the event processor.
//!
//! Modeled as a tagged enum with named fields rather than an untyped map:
//! each variant carries exactly the data the corresponding handler in the
//! event processor needs.

use std::collections::HashMap;

use serde_json::Value;

/// A single lifecycle event enqueued by the task service and consumed by an
/// event processor worker.
#[derive(Debug, Clone)]
pub enum Event {
    Submitted {
        task_id: String,
        service: String,
        user_id: String,
        parameters: HashMap<String, Value>,
    },
    Cancelled {
        task_id: String,
        service: String,
        user_id: String,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Event::Submitted { task_id, .. } => task_id,
            Event::Cancelled { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Submitted { .. } => "task_submitted",
            Event::Cancelled { .. } => "task_cancelled",
        }
    }
}
