//! State shared by the phases of one pipeline run

use std::sync::Arc;

use tracing::{error, info};

use crate::deploy::log_store::LogStore;
use crate::deploy::phases::Phase;
use crate::deploy::tracker::StepTracker;
use crate::errors::DeployerError;
use crate::models::task::{TaskKind, TaskUpdate};
use crate::store::TaskStore;

/// What a successful run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Container ID (app) or server ID (database)
    pub result_ref: String,
    pub site_id: Option<String>,
}

/// Emits the task updates and log lines of one run
pub struct RunContext {
    task_id: String,
    tracker: StepTracker,
    tasks: Arc<dyn TaskStore>,
    logs: Arc<dyn LogStore>,
}

impl RunContext {
    pub fn new(
        task_id: impl Into<String>,
        kind: TaskKind,
        tasks: Arc<dyn TaskStore>,
        logs: Arc<dyn LogStore>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tracker: StepTracker::new(kind),
            tasks,
            logs,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn log(&self, line: impl AsRef<str>) {
        self.logs.append(&self.task_id, line.as_ref()).await;
    }

    pub async fn begin(&mut self, phase: Phase) -> Result<(), DeployerError> {
        let update = self.tracker.begin(phase)?;
        if let Some(label) = &update.current_step {
            self.log(format!("==> {}", label)).await;
        }
        self.emit(update).await
    }

    /// Persist sub-progress of the running phase
    pub async fn advance(&mut self, percent: u8) -> Result<(), DeployerError> {
        match self.tracker.advance(percent)? {
            Some(update) => self.emit(update).await,
            None => Ok(()),
        }
    }

    /// Complete a phase that is not the last one
    pub async fn complete(&mut self) -> Result<(), DeployerError> {
        let update = self.tracker.complete()?;
        self.emit(update).await
    }

    /// Persist fields that are not part of the step breakdown
    pub async fn record(&self, update: TaskUpdate) -> Result<(), DeployerError> {
        self.emit(update).await
    }

    /// Complete the last phase and move the task to its success status
    pub async fn succeed(&mut self, outcome: Outcome) {
        let mut update = match self.tracker.complete() {
            Ok(update) => update,
            Err(e) => {
                self.fail(&e).await;
                return;
            }
        };
        info!(task_id = %self.task_id, "Task succeeded ({})", outcome.result_ref);
        update.result_ref = Some(outcome.result_ref);
        update.site_id = outcome.site_id;
        update.logs = self.logs.snapshot(&self.task_id).await;

        if let Err(e) = self.emit(update).await {
            error!(task_id = %self.task_id, "Failed to persist success: {}", e);
        }
        self.close_log().await;
    }

    /// Mark the task failed with `err`, flushing the log into the record
    pub async fn fail(&mut self, err: &DeployerError) {
        error!(task_id = %self.task_id, "Task failed: {}", err);
        self.log(format!("ERROR: {}", err)).await;

        let mut update = self.tracker.fail(&err.to_string());
        update.logs = self.logs.snapshot(&self.task_id).await;
        if let Err(e) = self.emit(update).await {
            error!(task_id = %self.task_id, "Failed to persist failure: {}", e);
        }
        self.close_log().await;
    }

    /// Drop the live log once the record holds its copy
    async fn close_log(&self) {
        self.logs.take(&self.task_id).await;
    }

    async fn emit(&self, update: TaskUpdate) -> Result<(), DeployerError> {
        self.tasks.apply(&self.task_id, update).await.map(|_| ())
    }
}
