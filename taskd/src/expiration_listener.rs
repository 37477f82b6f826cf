//! Reacts to the store's key-expiration notifications to keep secondary
//! indexes consistent once a task's primary record (and its TTL-bound
//! indexes) disappear on their own.
//!
//! Subscribes to Redis's keyspace notification channel
//! (`__keyevent@{db}__:expired`) with a long-lived pubsub session. On a
//! transport error it sleeps briefly and resubscribes; on a cooperative
//! stop signal it exits without error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::Client;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::repository::TaskRepository;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct ExpirationListener {
    client: Client,
    db_index: i64,
    repository: Arc<dyn TaskRepository>,
}

impl ExpirationListener {
    pub fn new(client: Client, db_index: i64, repository: Arc<dyn TaskRepository>) -> Self {
        Self { client, db_index, repository }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let channel = format!("__keyevent@{}__:expired", self.db_index);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("expiration listener received shutdown signal");
                    return;
                }
                result = self.subscribe_and_consume(&channel, &mut shutdown_rx) => {
                    match result {
                        Ok(()) => return,
                        Err(err) => {
                            warn!(%err, "redis connection lost while listening for expirations; retrying in {}s", RECONNECT_DELAY.as_secs());
                            tokio::select! {
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                                _ = shutdown_rx.recv() => return,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns `Ok(())` only when the cooperative stop signal fired;
    /// any other exit is a transport error to be retried by the caller.
    async fn subscribe_and_consume(
        &self,
        channel: &str,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let connection = self.client.get_async_connection().await?;
        let mut pubsub = connection.into_pubsub();
        pubsub.psubscribe(channel).await?;
        info!(channel, "subscribed to redis expiration events");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                message = stream.next() => {
                    let Some(message) = message else {
                        anyhow::bail!("redis expiration pubsub stream ended");
                    };
                    let key: String = message.get_payload().unwrap_or_default();
                    self.handle_key(&key).await;
                }
            }
        }
    }

    async fn handle_key(&self, key: &str) {
        let Some(rest) = key.strip_prefix("task:") else {
            return;
        };
        if rest.ends_with(":metadata") {
            return;
        }
        let task_id = rest;
        if let Err(err) = self.repository.handle_task_expired(task_id).await {
            warn!(task_id, %err, "failed to reconcile indexes after task expiration");
        }
    }
}
