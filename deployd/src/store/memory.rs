//! In-memory stores

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::DeployerError;
use crate::models::resources::{AppRecord, DatabaseServer};
use crate::models::task::{DeploymentTask, TaskFilter, TaskUpdate};
use crate::store::{not_found, ResourceRegistry, TaskStore};

#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, DeploymentTask>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: DeploymentTask) -> Result<(), DeployerError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(DeployerError::Store(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<DeploymentTask>, DeployerError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<DeploymentTask>, DeployerError> {
        let tasks = self.tasks.read().await;
        Ok(filter.select(tasks.values().cloned()))
    }

    async fn apply(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<DeploymentTask, DeployerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id).ok_or_else(|| not_found(task_id))?;
        task.apply(update)?;
        Ok(task.clone())
    }

    async fn delete(&self, task_id: &str) -> Result<bool, DeployerError> {
        Ok(self.tasks.write().await.remove(task_id).is_some())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistry {
    apps: Arc<RwLock<HashMap<String, AppRecord>>>,
    servers: Arc<RwLock<HashMap<String, DatabaseServer>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryRegistry {
    async fn get_app(&self, name: &str) -> Result<Option<AppRecord>, DeployerError> {
        Ok(self.apps.read().await.get(name).cloned())
    }

    async fn list_apps(&self) -> Result<Vec<AppRecord>, DeployerError> {
        Ok(self.apps.read().await.values().cloned().collect())
    }

    async fn save_app(&self, record: AppRecord) -> Result<(), DeployerError> {
        self.apps.write().await.insert(record.name.clone(), record);
        Ok(())
    }

    async fn remove_app(&self, name: &str) -> Result<bool, DeployerError> {
        Ok(self.apps.write().await.remove(name).is_some())
    }

    async fn register_server(&self, server: DatabaseServer) -> Result<(), DeployerError> {
        self.servers.write().await.insert(server.id.clone(), server);
        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<DatabaseServer>, DeployerError> {
        Ok(self.servers.read().await.get(server_id).cloned())
    }

    async fn remove_server(&self, server_id: &str) -> Result<bool, DeployerError> {
        Ok(self.servers.write().await.remove(server_id).is_some())
    }
}
