//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    ErrorResponse, HealthResponse, PruneResponse, StartDeploymentResponse, TaskListResponse,
    TaskLogsResponse, VersionResponse,
};
use tracing::error;

use crate::errors::DeployerError;
use crate::models::spec::{AppSpec, DatabaseSpec};
use crate::models::task::{DeploymentTask, TaskFilter};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(pub DeployerError);

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DeployerError::Validation(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DeployerError::Validation(_) => StatusCode::BAD_REQUEST,
            DeployerError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployerError::TargetBusy(_) | DeployerError::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Start an app deployment
pub async fn deploy_app_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<AppSpec>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(spec) = body?;
    let task_id = state.engine.start_app(spec).await?;
    Ok((StatusCode::ACCEPTED, Json(StartDeploymentResponse { task_id })))
}

/// Start a database provisioning
pub async fn deploy_database_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<DatabaseSpec>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(spec) = body?;
    let task_id = state.engine.start_database(spec).await?;
    Ok((StatusCode::ACCEPTED, Json(StartDeploymentResponse { task_id })))
}

/// List tasks
pub async fn list_tasks_handler(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<TaskListResponse<DeploymentTask>>, ApiError> {
    let tasks = state.engine.list_tasks(&filter).await?;
    let total = tasks.len();
    Ok(Json(TaskListResponse { tasks, total }))
}

/// Get a single task
pub async fn get_task_handler(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
) -> Result<Json<DeploymentTask>, ApiError> {
    Ok(Json(state.engine.get_task(&task_id).await?))
}

/// Get the log of a task
pub async fn task_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskLogsResponse>, ApiError> {
    let logs = state.engine.get_logs(&task_id).await?;
    Ok(Json(TaskLogsResponse { task_id, logs }))
}

/// Delete a finished task and the resources it owns
pub async fn delete_task_handler(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_task(&task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove images no deployment uses anymore
pub async fn prune_images_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<PruneResponse>, ApiError> {
    let removed = state.engine.prune_images().await?;
    Ok(Json(PruneResponse { removed }))
}
