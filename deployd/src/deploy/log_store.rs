//! Per-task log aggregation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

/// Accumulates the human-readable log of running tasks
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Start an empty log for a task, replacing any previous one
    async fn open(&self, task_id: &str);

    /// Append one timestamped line
    async fn append(&self, task_id: &str, line: &str);

    /// Current log contents, `None` when the task has no open log
    async fn snapshot(&self, task_id: &str) -> Option<String>;

    /// Remove and return the log of a finished task
    async fn take(&self, task_id: &str) -> Option<String>;
}

/// Log store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogStore {
    logs: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn open(&self, task_id: &str) {
        self.logs
            .write()
            .await
            .insert(task_id.to_string(), String::new());
    }

    async fn append(&self, task_id: &str, line: &str) {
        debug!(task_id = %task_id, "{}", line);
        let stamped = format!("[{}] {}\n", Utc::now().format("%H:%M:%S"), line);
        self.logs
            .write()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push_str(&stamped);
    }

    async fn snapshot(&self, task_id: &str) -> Option<String> {
        self.logs.read().await.get(task_id).cloned()
    }

    async fn take(&self, task_id: &str) -> Option<String> {
        self.logs.write().await.remove(task_id)
    }
}
