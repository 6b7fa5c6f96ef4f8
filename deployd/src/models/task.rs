//! Deployment task models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Kind of pipeline a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Deploy an application from a Git repository
    App,

    /// Provision a database engine as a container
    Database,
}

impl TaskKind {
    /// Terminal status reported when the pipeline succeeds
    pub fn success_status(&self) -> TaskStatus {
        match self {
            TaskKind::App => TaskStatus::Success,
            TaskKind::Database => TaskStatus::Completed,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::App => write!(f, "app"),
            TaskKind::Database => write!(f, "database"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(TaskKind::App),
            "database" => Ok(TaskKind::Database),
            _ => Err(format!("Invalid task kind: {}", s)),
        }
    }
}

/// Task status.
///
/// App tasks move through `pending, cloning, building, deploying` and end in
/// `success` or `failed`. Database tasks move through `pending, pulling,
/// creating, starting, waiting, verifying` and end in `completed` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Cloning,
    Pulling,
    Building,
    Deploying,
    Creating,
    Starting,
    Waiting,
    Verifying,
    Success,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Completed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Invalid task status: {}", s))
    }
}

/// Status of a single step in the breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-phase breakdown entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub name: String,
    pub status: StepStatus,
    pub progress: u8,
}

impl TaskStep {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            progress: 0,
        }
    }
}

/// One run of the deployment/provisioning pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTask {
    /// Unique task ID
    pub id: String,

    pub kind: TaskKind,

    /// App name or database name the task operates on
    pub target: String,

    pub status: TaskStatus,

    /// Overall progress, 0-100
    pub progress: u8,

    /// Human-readable label of the phase in progress
    pub current_step: String,

    pub steps: Vec<TaskStep>,

    /// Last failure message, empty unless failed
    #[serde(default)]
    pub error: String,

    /// Container ID (app) or server ID (database) produced on success
    #[serde(default)]
    pub result_ref: Option<String>,

    /// Image built or pulled by the task
    #[serde(default)]
    pub image: Option<String>,

    /// Reverse-proxy site bound for the app, if any
    #[serde(default)]
    pub site_id: Option<String>,

    /// Persisted log copy, set once the task is terminal
    #[serde(default)]
    pub logs: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentTask {
    /// Create a pending task with every step pending
    pub fn new(kind: TaskKind, target: impl Into<String>, steps: Vec<TaskStep>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.into(),
            status: TaskStatus::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            steps,
            error: String::new(),
            result_ref: None,
            image: None,
            site_id: None,
            logs: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Apply a state transition, enforcing the record invariants
    pub fn apply(&mut self, update: TaskUpdate) -> Result<(), DeployerError> {
        if self.status.is_terminal() {
            return Err(DeployerError::InvalidTransition(format!(
                "task {} is already {:?}",
                self.id, self.status
            )));
        }

        let status = update.status.unwrap_or(self.status);
        let progress = update.progress.unwrap_or(self.progress);
        if progress < self.progress {
            return Err(DeployerError::InvalidTransition(format!(
                "progress of task {} cannot go from {} to {}",
                self.id, self.progress, progress
            )));
        }
        if progress > 100 || (progress == 100) != status.is_success() {
            return Err(DeployerError::InvalidTransition(format!(
                "progress {} is not allowed while {:?}",
                progress, status
            )));
        }

        self.status = status;
        self.progress = progress;
        if let Some(label) = update.current_step {
            self.current_step = label;
        }
        if let Some(steps) = update.steps {
            self.steps = steps;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        if update.result_ref.is_some() {
            self.result_ref = update.result_ref;
        }
        if update.image.is_some() {
            self.image = update.image;
        }
        if update.site_id.is_some() {
            self.site_id = update.site_id;
        }
        if update.logs.is_some() {
            self.logs = update.logs;
        }
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        Ok(())
    }
}

/// Partial update emitted by the engine and applied by a task store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub steps: Option<Vec<TaskStep>>,
    pub error: Option<String>,
    pub result_ref: Option<String>,
    pub image: Option<String>,
    pub site_id: Option<String>,
    pub logs: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    pub target: Option<String>,
    pub status: Option<TaskStatus>,
    pub active: Option<bool>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &DeploymentTask) -> bool {
        self.kind.map_or(true, |kind| task.kind == kind)
            && self.target.as_deref().map_or(true, |t| task.target == t)
            && self.status.map_or(true, |status| task.status == status)
            && self.active.map_or(true, |active| task.is_active() == active)
    }

    /// Filter, sort newest first and truncate a set of tasks
    pub fn select(&self, tasks: impl IntoIterator<Item = DeploymentTask>) -> Vec<DeploymentTask> {
        let mut selected: Vec<DeploymentTask> =
            tasks.into_iter().filter(|t| self.matches(t)).collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
