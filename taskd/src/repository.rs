//! Durable storage for task records and their secondary indexes.
//!
//! The production backend is Redis: every key belonging to a task shares a
//! single TTL, re-stamped on every write, so a task and its indexes expire
//! together. An in-memory backend with no TTL enforcement backs tests and
//! the `--in-memory` development mode; both implement [`TaskRepository`] so
//! the rest of the service is backend-agnostic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use shared::model::TaskRecord;
use shared::{TaskError, TaskStatus};

/// Durable storage for task records plus the indexes that let them be
/// listed by service, by user, and globally.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn next_task_id(&self) -> Result<String>;
    async fn save(&self, task: &TaskRecord) -> Result<()>;
    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>>;
    async fn delete(&self, task_id: &str) -> Result<()>;
    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> Result<Option<TaskRecord>>;
    async fn append_log(&self, task_id: &str, message: &str) -> Result<Option<TaskRecord>>;
    async fn update_result(
        &self,
        task_id: &str,
        pod_status: Option<String>,
        launcher_output: Option<String>,
    ) -> Result<Option<TaskRecord>>;
    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<TaskRecord>>;
    async fn list_all(&self) -> Result<Vec<TaskRecord>>;
    async fn list_by_service(&self, service: &str) -> Result<Vec<TaskRecord>>;
    async fn list_by_service_and_user(&self, service: &str, user_id: &str) -> Result<Vec<TaskRecord>>;
    async fn list_users_by_service(&self, service: &str) -> Result<Vec<String>>;
    /// Invoked by the expiration listener once the store has expired
    /// `task:{task_id}`. Reconstructs index membership from the metadata
    /// breadcrumb and removes it everywhere.
    async fn handle_task_expired(&self, task_id: &str) -> Result<()>;
    /// Cheap connectivity probe used by `/healthz`. Returns `Err` if the
    /// backing store cannot be reached.
    async fn health_check(&self) -> Result<()>;
}

fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

fn metadata_key(task_id: &str) -> String {
    format!("task:{task_id}:metadata")
}

fn service_index(service: &str) -> String {
    format!("index:service:{service}")
}

fn service_user_index(service: &str, user_id: &str) -> String {
    format!("index:service:{service}:user:{user_id}")
}

fn service_users_index(service: &str) -> String {
    format!("index:service:{service}:users")
}

const ALL_TASKS_INDEX: &str = "index:tasks";
const TASK_ID_SEQUENCE: &str = "task:id:sequence";

/// Production repository backed by Redis. `reader`/`writer` are separate
/// [`ConnectionManager`]s so a read-replica URL can be configured
/// independently of the writer, per the service configuration.
#[derive(Clone)]
pub struct RedisTaskRepository {
    reader: ConnectionManager,
    writer: ConnectionManager,
    ttl_seconds: i64,
    metadata_ttl_seconds: i64,
}

impl RedisTaskRepository {
    pub fn new(
        reader: ConnectionManager,
        writer: ConnectionManager,
        ttl_seconds: i64,
        metadata_grace_seconds: i64,
    ) -> Result<Self, TaskError> {
        if ttl_seconds <= 0 {
            return Err(TaskError::NonPositiveTtl(ttl_seconds));
        }
        Ok(Self {
            reader,
            writer,
            ttl_seconds,
            metadata_ttl_seconds: ttl_seconds + metadata_grace_seconds,
        })
    }

    async fn ensure_ttl(&self, key: &str) -> Result<()> {
        let mut conn = self.writer.clone();
        let _: () = conn.expire(key, self.ttl_seconds).await?;
        Ok(())
    }

    async fn cleanup_user_index(&self, service: &str, user_id: &str) -> Result<()> {
        let service_user_index = service_user_index(service, user_id);
        let mut reader = self.reader.clone();
        let remaining: u64 = reader.scard(&service_user_index).await?;
        if remaining > 0 {
            self.ensure_ttl(&service_user_index).await?;
            return Ok(());
        }
        let users_index = service_users_index(service);
        let mut writer = self.writer.clone();
        let _: () = writer.srem(&users_index, user_id).await?;
        self.ensure_ttl(&users_index).await?;
        Ok(())
    }

    async fn read(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.reader.clone();
        let raw: Option<String> = conn.get(task_key(task_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).with_context(|| {
                format!("corrupt task record for task_id={task_id}")
            })?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TaskRepository for RedisTaskRepository {
    async fn next_task_id(&self) -> Result<String> {
        let mut conn = self.writer.clone();
        let next_id: i64 = conn.incr(TASK_ID_SEQUENCE, 1).await?;
        Ok(next_id.to_string())
    }

    async fn save(&self, task: &TaskRecord) -> Result<()> {
        let serialized = serde_json::to_string(task)?;
        let mut writer = self.writer.clone();
        let _: () = writer
            .set_ex(task_key(&task.task_id), serialized, self.ttl_seconds as u64)
            .await?;

        let _: () = writer.sadd(ALL_TASKS_INDEX, &task.task_id).await?;
        self.ensure_ttl(ALL_TASKS_INDEX).await?;

        let service_index = service_index(&task.service);
        let _: () = writer.sadd(&service_index, &task.task_id).await?;
        self.ensure_ttl(&service_index).await?;

        let service_users_index = service_users_index(&task.service);
        let _: () = writer.sadd(&service_users_index, &task.user_id).await?;
        self.ensure_ttl(&service_users_index).await?;

        let service_user_index = service_user_index(&task.service, &task.user_id);
        let _: () = writer.sadd(&service_user_index, &task.task_id).await?;
        self.ensure_ttl(&service_user_index).await?;

        let metadata: HashMap<&str, &str> =
            HashMap::from([("service", task.service.as_str()), ("user_id", task.user_id.as_str())]);
        let _: () = writer
            .hset_multiple(metadata_key(&task.task_id), &metadata.into_iter().collect::<Vec<_>>())
            .await?;
        let _: () = writer
            .expire(metadata_key(&task.task_id), self.metadata_ttl_seconds)
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        self.read(task_id).await
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        let Some(task) = self.read(task_id).await? else {
            return Ok(());
        };
        let mut writer = self.writer.clone();
        let _: () = writer.del(task_key(task_id)).await?;
        let _: () = writer.srem(ALL_TASKS_INDEX, task_id).await?;
        let _: () = writer.srem(service_index(&task.service), task_id).await?;
        let _: () = writer
            .srem(service_user_index(&task.service, &task.user_id), task_id)
            .await?;
        let _: () = writer.del(metadata_key(task_id)).await?;
        self.cleanup_user_index(&task.service, &task.user_id).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> Result<Option<TaskRecord>> {
        let Some(mut task) = self.read(task_id).await? else {
            return Ok(None);
        };
        task.status = status;
        task.touch(log_entry);
        self.save(&task).await?;
        Ok(Some(task))
    }

    async fn append_log(&self, task_id: &str, message: &str) -> Result<Option<TaskRecord>> {
        let Some(mut task) = self.read(task_id).await? else {
            return Ok(None);
        };
        task.touch(Some(message));
        self.save(&task).await?;
        Ok(Some(task))
    }

    async fn update_result(
        &self,
        task_id: &str,
        pod_status: Option<String>,
        launcher_output: Option<String>,
    ) -> Result<Option<TaskRecord>> {
        let Some(mut task) = self.read(task_id).await? else {
            return Ok(None);
        };
        if !task.result.merge(pod_status, launcher_output) {
            return Ok(Some(task));
        }
        task.touch(None);
        self.save(&task).await?;
        Ok(Some(task))
    }

    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<TaskRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| task_key(id)).collect();
        let mut reader = self.reader.clone();
        let raw_values: Vec<Option<String>> = reader.mget(&keys).await?;
        let mut tasks = Vec::with_capacity(raw_values.len());
        for raw in raw_values.into_iter().flatten() {
            match serde_json::from_str(&raw) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("skipping corrupt task record during list: {err}"),
            }
        }
        Ok(tasks)
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>> {
        let mut reader = self.reader.clone();
        let ids: Vec<String> = reader.smembers(ALL_TASKS_INDEX).await?;
        self.list_by_ids(&ids).await
    }

    async fn list_by_service(&self, service: &str) -> Result<Vec<TaskRecord>> {
        let mut reader = self.reader.clone();
        let ids: Vec<String> = reader.smembers(service_index(service)).await?;
        self.list_by_ids(&ids).await
    }

    async fn list_by_service_and_user(&self, service: &str, user_id: &str) -> Result<Vec<TaskRecord>> {
        let mut reader = self.reader.clone();
        let ids: Vec<String> = reader
            .smembers(service_user_index(service, user_id))
            .await?;
        self.list_by_ids(&ids).await
    }

    async fn list_users_by_service(&self, service: &str) -> Result<Vec<String>> {
        let mut reader = self.reader.clone();
        let users: Vec<String> = reader.smembers(service_users_index(service)).await?;
        Ok(users)
    }

    async fn handle_task_expired(&self, task_id: &str) -> Result<()> {
        let mut reader = self.reader.clone();
        let metadata: HashMap<String, String> = reader.hgetall(metadata_key(task_id)).await?;
        let Some(service) = metadata.get("service").cloned() else {
            debug!("expiration of task_id={task_id} with no metadata breadcrumb; nothing to clean up");
            return Ok(());
        };
        let Some(user_id) = metadata.get("user_id").cloned() else {
            return Ok(());
        };

        let mut writer = self.writer.clone();
        let _: () = writer.srem(ALL_TASKS_INDEX, task_id).await?;
        let _: () = writer.srem(service_index(&service), task_id).await?;
        let _: () = writer
            .srem(service_user_index(&service, &user_id), task_id)
            .await?;
        let _: () = writer.del(metadata_key(task_id)).await?;
        self.cleanup_user_index(&service, &user_id).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut reader = self.reader.clone();
        let mut writer = self.writer.clone();
        let _: String = redis::cmd("PING").query_async(&mut reader).await?;
        let _: String = redis::cmd("PING").query_async(&mut writer).await?;
        Ok(())
    }
}

/// Backend for tests and the `--in-memory` development mode. TTLs are not
/// enforced; callers asked for expiration semantics should use
/// [`RedisTaskRepository`] instead.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, TaskRecord>>,
    next_id: RwLock<u64>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn next_task_id(&self) -> Result<String> {
        let mut next_id = self.next_id.write().await;
        *next_id += 1;
        Ok(next_id.to_string())
    }

    async fn save(&self, task: &TaskRecord) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        self.tasks.write().await.remove(task_id);
        Ok(())
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> Result<Option<TaskRecord>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(None);
        };
        task.status = status;
        task.touch(log_entry);
        Ok(Some(task.clone()))
    }

    async fn append_log(&self, task_id: &str, message: &str) -> Result<Option<TaskRecord>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(None);
        };
        task.touch(Some(message));
        Ok(Some(task.clone()))
    }

    async fn update_result(
        &self,
        task_id: &str,
        pod_status: Option<String>,
        launcher_output: Option<String>,
    ) -> Result<Option<TaskRecord>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(None);
        };
        if task.result.merge(pod_status, launcher_output) {
            task.touch(None);
        }
        Ok(Some(task.clone()))
    }

    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        Ok(ids.iter().filter_map(|id| tasks.get(id).cloned()).collect())
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn list_by_service(&self, service: &str) -> Result<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.service == service)
            .cloned()
            .collect())
    }

    async fn list_by_service_and_user(&self, service: &str, user_id: &str) -> Result<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.service == service && task.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_users_by_service(&self, service: &str) -> Result<Vec<String>> {
        let users: HashSet<String> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.service == service)
            .map(|task| task.user_id.clone())
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn handle_task_expired(&self, task_id: &str) -> Result<()> {
        self.tasks.write().await.remove(task_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::Priority;
    use std::collections::HashMap as Map;

    fn sample_task(id: &str, service: &str, user: &str) -> TaskRecord {
        TaskRecord::new_pending(
            id.to_string(),
            service.to_string(),
            user.to_string(),
            Map::new(),
            Priority::Low,
        )
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let repo = InMemoryTaskRepository::new();
        let task = sample_task("1", "sync", "alice");
        repo.save(&task).await.unwrap();
        let fetched = repo.get("1").await.unwrap().unwrap();
        assert_eq!(fetched.task_id, "1");
        assert_eq!(fetched.service, "sync");
    }

    #[tokio::test]
    async fn get_missing_task_returns_none() {
        let repo = InMemoryTaskRepository::new();
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_task_id_is_monotonic_and_distinct() {
        let repo = InMemoryTaskRepository::new();
        let a = repo.next_task_id().await.unwrap();
        let b = repo.next_task_id().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn set_status_advances_updated_at_and_appends_log() {
        let repo = InMemoryTaskRepository::new();
        let task = sample_task("1", "sync", "alice");
        let created_at = task.created_at;
        repo.save(&task).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let updated = repo
            .set_status("1", TaskStatus::Dispatching, Some("Dispatching to scheduler"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Dispatching);
        assert!(updated.updated_at >= created_at);
        assert_eq!(updated.logs.len(), 1);
    }

    #[tokio::test]
    async fn set_status_on_missing_task_returns_none() {
        let repo = InMemoryTaskRepository::new();
        assert!(repo
            .set_status("missing", TaskStatus::Failed, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_result_merges_fields() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&sample_task("1", "sync", "alice")).await.unwrap();
        let updated = repo
            .update_result("1", Some("Running".into()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.result.pod_status.as_deref(), Some("Running"));
    }

    #[tokio::test]
    async fn list_by_service_filters_correctly() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&sample_task("1", "sync", "alice")).await.unwrap();
        repo.save(&sample_task("2", "backup", "alice")).await.unwrap();
        let tasks = repo.list_by_service("sync").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "1");
    }

    #[tokio::test]
    async fn list_by_service_and_user_filters_both_dimensions() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&sample_task("1", "sync", "alice")).await.unwrap();
        repo.save(&sample_task("2", "sync", "bob")).await.unwrap();
        let tasks = repo.list_by_service_and_user("sync", "bob").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "2");
    }

    #[tokio::test]
    async fn list_users_by_service_deduplicates() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&sample_task("1", "sync", "alice")).await.unwrap();
        repo.save(&sample_task("2", "sync", "alice")).await.unwrap();
        let users = repo.list_users_by_service("sync").await.unwrap();
        assert_eq!(users, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_task() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&sample_task("1", "sync", "alice")).await.unwrap();
        repo.delete("1").await.unwrap();
        assert!(repo.get("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handle_task_expired_is_idempotent_on_missing_task() {
        let repo = InMemoryTaskRepository::new();
        assert!(repo.handle_task_expired("missing").await.is_ok());
    }
}
