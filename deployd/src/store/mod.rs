//! Persistence adapters for task records and produced resources

use async_trait::async_trait;

use crate::errors::DeployerError;
use crate::models::resources::{AppRecord, DatabaseServer};
use crate::models::task::{DeploymentTask, TaskFilter, TaskUpdate};

pub mod file;
pub mod memory;

pub use file::{FileRegistry, FileTaskStore};
pub use memory::{InMemoryRegistry, InMemoryTaskStore};

/// Durable storage for deployment task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task
    async fn insert(&self, task: DeploymentTask) -> Result<(), DeployerError>;

    async fn get(&self, task_id: &str) -> Result<Option<DeploymentTask>, DeployerError>;

    /// List tasks matching the filter, newest first
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<DeploymentTask>, DeployerError>;

    /// Apply a partial update and return the resulting record
    async fn apply(&self, task_id: &str, update: TaskUpdate)
        -> Result<DeploymentTask, DeployerError>;

    /// Delete a task, returns whether it existed
    async fn delete(&self, task_id: &str) -> Result<bool, DeployerError>;
}

/// Durable records of deployed apps and provisioned database servers
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn get_app(&self, name: &str) -> Result<Option<AppRecord>, DeployerError>;

    async fn list_apps(&self) -> Result<Vec<AppRecord>, DeployerError>;

    /// Insert or replace the record for `record.name`
    async fn save_app(&self, record: AppRecord) -> Result<(), DeployerError>;

    async fn remove_app(&self, name: &str) -> Result<bool, DeployerError>;

    async fn register_server(&self, server: DatabaseServer) -> Result<(), DeployerError>;

    async fn get_server(&self, server_id: &str) -> Result<Option<DatabaseServer>, DeployerError>;

    async fn remove_server(&self, server_id: &str) -> Result<bool, DeployerError>;
}

pub(crate) fn not_found(task_id: &str) -> DeployerError {
    DeployerError::NotFound(format!("task {}", task_id))
}
