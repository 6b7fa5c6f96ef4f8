//! JSON-file backed stores, one file per record

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::resources::{AppRecord, DatabaseServer};
use crate::models::task::{DeploymentTask, TaskFilter, TaskUpdate};
use crate::store::{not_found, ResourceRegistry, TaskStore};

/// A directory of `<key>.json` records
#[derive(Debug, Clone)]
struct JsonDir {
    dir: Dir,
}

impl JsonDir {
    fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn record(&self, key: &str) -> Option<File> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.file(&format!("{}.json", key)))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DeployerError> {
        match self.record(key) {
            Some(file) => file.read_json().await,
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DeployerError> {
        let file = self
            .record(key)
            .ok_or_else(|| DeployerError::Store(format!("invalid record key {:?}", key)))?;
        file.write_json(value).await
    }

    async fn remove(&self, key: &str) -> Result<bool, DeployerError> {
        match self.record(key) {
            Some(file) => file.delete().await,
            None => Ok(false),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, DeployerError> {
        let mut records = Vec::new();
        for path in self.dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = File::new(path).read_json().await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Task store keeping each task in `<dir>/<task_id>.json`
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    tasks: JsonDir,
}

impl FileTaskStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            tasks: JsonDir::new(dir),
        }
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: DeploymentTask) -> Result<(), DeployerError> {
        if self.tasks.read::<DeploymentTask>(&task.id).await?.is_some() {
            return Err(DeployerError::Store(format!("task {} already exists", task.id)));
        }
        self.tasks.write(&task.id, &task).await
    }

    async fn get(&self, task_id: &str) -> Result<Option<DeploymentTask>, DeployerError> {
        self.tasks.read(task_id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<DeploymentTask>, DeployerError> {
        let tasks: Vec<DeploymentTask> = self.tasks.read_all().await?;
        Ok(filter.select(tasks))
    }

    async fn apply(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<DeploymentTask, DeployerError> {
        let mut task: DeploymentTask = self
            .tasks
            .read(task_id)
            .await?
            .ok_or_else(|| not_found(task_id))?;
        task.apply(update)?;
        self.tasks.write(task_id, &task).await?;
        Ok(task)
    }

    async fn delete(&self, task_id: &str) -> Result<bool, DeployerError> {
        self.tasks.remove(task_id).await
    }
}

/// Registry keeping apps in `<dir>/apps` and servers in `<dir>/servers`
#[derive(Debug, Clone)]
pub struct FileRegistry {
    apps: JsonDir,
    servers: JsonDir,
}

impl FileRegistry {
    pub fn new(dir: Dir) -> Self {
        Self {
            apps: JsonDir::new(dir.subdir("apps")),
            servers: JsonDir::new(dir.subdir("servers")),
        }
    }
}

#[async_trait]
impl ResourceRegistry for FileRegistry {
    async fn get_app(&self, name: &str) -> Result<Option<AppRecord>, DeployerError> {
        self.apps.read(name).await
    }

    async fn list_apps(&self) -> Result<Vec<AppRecord>, DeployerError> {
        self.apps.read_all().await
    }

    async fn save_app(&self, record: AppRecord) -> Result<(), DeployerError> {
        self.apps.write(&record.name, &record).await
    }

    async fn remove_app(&self, name: &str) -> Result<bool, DeployerError> {
        self.apps.remove(name).await
    }

    async fn register_server(&self, server: DatabaseServer) -> Result<(), DeployerError> {
        self.servers.write(&server.id, &server).await
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<DatabaseServer>, DeployerError> {
        self.servers.read(server_id).await
    }

    async fn remove_server(&self, server_id: &str) -> Result<bool, DeployerError> {
        self.servers.remove(server_id).await
    }
}
