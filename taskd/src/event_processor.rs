//! Worker pool that bridges durable task state to the external scheduler.
//!
//! Events are enqueued fire-and-forget by the task service and consumed by
//! a configurable number of workers. There is no per-task serialization:
//! two events for the same task may be handled concurrently by different
//! workers. The repository's read-modify-write status flips are last-write-
//! wins on `updated_at`, and terminal statuses are monotone at the task
//! service layer, so this is safe.

use std::sync::Arc;
use std::time::Duration;

use shared::event::Event;
use shared::model::TaskStatus;
use shared::SchedulerError;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::repository::TaskRepository;
use crate::scheduler_client::SchedulerClient;

/// Handle used by producers (the task service) to enqueue lifecycle events.
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    #[cfg(test)]
    pub fn for_test(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self { sender }
    }

    pub fn send(&self, event: Event) {
        // The queue is in-process and non-durable: a crash drops queued
        // events, which is acceptable because the task record still
        // reflects its last persisted status.
        if self.sender.send(event).is_err() {
            warn!("event queue has no active workers; event dropped");
        }
    }
}

/// Spawns `worker_count` workers consuming from a shared unbounded queue and
/// returns a handle for enqueuing events plus the worker join handles. Each
/// worker subscribes to `shutdown_tx` independently and exits as soon as it
/// fires, the same cooperative-stop pattern `ExpirationListener` uses.
pub fn spawn(
    worker_count: usize,
    repository: Arc<dyn TaskRepository>,
    scheduler: SchedulerClient,
    shutdown_tx: broadcast::Sender<()>,
) -> (EventSender, Vec<tokio::task::JoinHandle<()>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let receiver = Arc::clone(&receiver);
        let repository = Arc::clone(&repository);
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            run_worker(worker_id, receiver, repository, scheduler, shutdown_rx).await;
        }));
    }

    (EventSender { sender }, handles)
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    repository: Arc<dyn TaskRepository>,
    scheduler: SchedulerClient,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!(worker_id, "event processor worker started");
    loop {
        let event = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = tokio::time::timeout(Duration::from_secs(1), receiver.recv()) => result,
            }
        };
        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_timeout) => continue,
        };

        info!(worker_id, task_id = event.task_id(), kind = event.kind(), "dispatching event");
        match &event {
            Event::Submitted { task_id, service, user_id, parameters } => {
                handle_submitted(&repository, &scheduler, task_id, service, user_id, parameters).await;
            }
            Event::Cancelled { task_id, service, user_id } => {
                handle_cancelled(&repository, &scheduler, task_id, service, user_id).await;
            }
        }
    }
    info!(worker_id, "event processor worker stopped");
}

async fn handle_submitted(
    repository: &Arc<dyn TaskRepository>,
    scheduler: &SchedulerClient,
    task_id: &str,
    service: &str,
    user_id: &str,
    parameters: &std::collections::HashMap<String, serde_json::Value>,
) {
    if let Err(err) = repository
        .set_status(task_id, TaskStatus::Dispatching, Some("Dispatching to scheduler"))
        .await
    {
        warn!(task_id, %err, "failed to mark task as dispatching");
        return;
    }

    match scheduler.submit_task(task_id, service, user_id, parameters).await {
        Ok(()) => {
            let _ = repository
                .append_log(task_id, "Scheduler acknowledged submission")
                .await;
            let _ = repository.set_status(task_id, TaskStatus::Running, None).await;
        }
        Err(SchedulerError::Unavailable { url, cause }) => {
            let _ = repository
                .set_status(
                    task_id,
                    TaskStatus::Failed,
                    Some(&format!("Scheduler unavailable at {url}: {cause}")),
                )
                .await;
        }
        Err(err) if err.is_permanent_rejection() => {
            if let SchedulerError::Response { status_code, body, .. } = &err {
                let _ = repository
                    .set_status(
                        task_id,
                        TaskStatus::Failed,
                        Some(&format!("Scheduler returned {status_code}: {body}")),
                    )
                    .await;
            }
        }
        Err(SchedulerError::Response { status_code, body, url }) => {
            warn!(task_id, url, status_code, body, "scheduler rejected submission; leaving task dispatching");
            let _ = repository
                .append_log(
                    task_id,
                    &format!("Scheduler returned {status_code}: {body}"),
                )
                .await;
        }
    }
}

async fn handle_cancelled(
    repository: &Arc<dyn TaskRepository>,
    scheduler: &SchedulerClient,
    task_id: &str,
    service: &str,
    user_id: &str,
) {
    match scheduler.cancel_task(task_id, service, user_id).await {
        Ok(()) => {
            let _ = repository
                .set_status(task_id, TaskStatus::Cancelled, Some("Task cancelled"))
                .await;
        }
        Err(err) if err.is_permanent_rejection() => {
            if let SchedulerError::Response { status_code, body, .. } = &err {
                let _ = repository
                    .set_status(
                        task_id,
                        TaskStatus::Failed,
                        Some(&format!("Scheduler returned {status_code}: {body}")),
                    )
                    .await;
            }
        }
        Err(SchedulerError::Response { status_code, body, url }) => {
            warn!(task_id, url, status_code, body, "scheduler rejected cancellation; leaving task cancel-requested");
            let _ = repository
                .append_log(task_id, &format!("Scheduler returned {status_code}: {body}"))
                .await;
        }
        Err(SchedulerError::Unavailable { url, cause }) => {
            let _ = repository
                .append_log(task_id, &format!("Scheduler unavailable at {url}: {cause}"))
                .await;
        }
    }
}
