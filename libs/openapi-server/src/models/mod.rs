//! Deployd API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Returned when a deployment or provisioning task is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDeploymentResponse {
    pub task_id: String,
}

/// Task list response, generic over the task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse<T> {
    pub tasks: Vec<T>,
    pub total: usize,
}

/// Task log response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogsResponse {
    pub task_id: String,
    pub logs: String,
}

/// Image prune response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneResponse {
    pub removed: Vec<String>,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
