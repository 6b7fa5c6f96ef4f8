//! Step tracker: turns phase transitions into task updates

use chrono::Utc;

use crate::deploy::phases::{phases_for, Phase, PhaseSpec};
use crate::errors::DeployerError;
use crate::models::task::{DeploymentTask, StepStatus, TaskKind, TaskStatus, TaskStep, TaskUpdate};

/// Tracks the step breakdown and overall progress of one running task.
///
/// Every transition returns the `TaskUpdate` to persist; the tracker never
/// touches storage itself.
#[derive(Debug, Clone)]
pub struct StepTracker {
    kind: TaskKind,
    phases: &'static [PhaseSpec],
    steps: Vec<TaskStep>,
    current: Option<usize>,
    status: TaskStatus,
    progress: u8,
}

impl StepTracker {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            phases: phases_for(kind),
            steps: Self::initial_steps(kind),
            current: None,
            status: TaskStatus::Pending,
            progress: 0,
        }
    }

    /// All steps of `kind`, pending
    pub fn initial_steps(kind: TaskKind) -> Vec<TaskStep> {
        phases_for(kind)
            .iter()
            .map(|p| TaskStep::pending(p.name))
            .collect()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    /// Phase currently running or last completed
    pub fn current_phase(&self) -> Option<Phase> {
        self.current.map(|idx| self.phases[idx].phase)
    }

    /// Mark `phase` running
    pub fn begin(&mut self, phase: Phase) -> Result<TaskUpdate, DeployerError> {
        self.ensure_active()?;
        let idx = self
            .phases
            .iter()
            .position(|p| p.phase == phase)
            .ok_or_else(|| {
                DeployerError::InvalidTransition(format!(
                    "{:?} is not a {} phase",
                    phase, self.kind
                ))
            })?;

        if let Some(current) = self.current {
            if idx <= current || self.steps[current].status != StepStatus::Completed {
                return Err(DeployerError::InvalidTransition(format!(
                    "cannot begin {:?} after {:?} ({:?})",
                    phase, self.phases[current].phase, self.steps[current].status
                )));
            }
        }

        let spec = self.phases[idx];
        let first = self.current.is_none();
        self.current = Some(idx);
        self.steps[idx].status = StepStatus::Running;
        self.status = spec.status;
        self.progress = self.progress.max(spec.start);

        let mut update = self.snapshot(spec.label);
        if first {
            update.started_at = Some(Utc::now());
        }
        Ok(update)
    }

    /// Report sub-progress of the running phase. Returns `None` when nothing
    /// changed.
    pub fn advance(&mut self, percent: u8) -> Result<Option<TaskUpdate>, DeployerError> {
        self.ensure_active()?;
        let idx = self.running_index()?;
        let spec = self.phases[idx];

        let percent = percent.min(99);
        let progress = spec.progress_at(percent).min(spec.end.saturating_sub(1));
        let step = &mut self.steps[idx];
        if percent <= step.progress && progress <= self.progress {
            return Ok(None);
        }
        step.progress = step.progress.max(percent);
        self.progress = self.progress.max(progress);
        Ok(Some(self.snapshot(spec.label)))
    }

    /// Mark the running phase completed. Completing the last phase moves the
    /// task to its success status at 100%.
    pub fn complete(&mut self) -> Result<TaskUpdate, DeployerError> {
        self.ensure_active()?;
        let idx = self.running_index()?;
        let spec = self.phases[idx];

        let step = &mut self.steps[idx];
        step.status = StepStatus::Completed;
        step.progress = 100;
        self.progress = self.progress.max(spec.end);

        if idx + 1 == self.phases.len() {
            self.status = self.kind.success_status();
            let mut update = self.snapshot("Completed");
            update.completed_at = Some(Utc::now());
            return Ok(update);
        }
        Ok(self.snapshot(spec.label))
    }

    /// Mark the running phase (or the first one, if none began) failed
    pub fn fail(&mut self, error: &str) -> TaskUpdate {
        if let Some(idx) = self.current.or_else(|| (!self.steps.is_empty()).then_some(0)) {
            if self.steps[idx].status != StepStatus::Completed {
                self.steps[idx].status = StepStatus::Failed;
            }
        }
        self.status = TaskStatus::Failed;
        TaskUpdate {
            status: Some(TaskStatus::Failed),
            steps: Some(self.steps.clone()),
            error: Some(error.to_string()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Failure update for a persisted task whose tracker is gone, e.g. after
    /// a crash or restart
    pub fn failure_for(task: &DeploymentTask, error: &str) -> TaskUpdate {
        let mut steps = task.steps.clone();
        let failed = steps
            .iter()
            .position(|s| s.status == StepStatus::Running)
            .or_else(|| steps.iter().position(|s| s.status == StepStatus::Pending));
        if let Some(idx) = failed {
            steps[idx].status = StepStatus::Failed;
        }
        TaskUpdate {
            status: Some(TaskStatus::Failed),
            steps: Some(steps),
            error: Some(error.to_string()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn ensure_active(&self) -> Result<(), DeployerError> {
        if self.status.is_terminal() {
            return Err(DeployerError::InvalidTransition(format!(
                "task is already {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn running_index(&self) -> Result<usize, DeployerError> {
        match self.current {
            Some(idx) if self.steps[idx].status == StepStatus::Running => Ok(idx),
            _ => Err(DeployerError::InvalidTransition(
                "no phase is running".to_string(),
            )),
        }
    }

    fn snapshot(&self, label: &str) -> TaskUpdate {
        TaskUpdate {
            status: Some(self.status),
            progress: Some(self.progress),
            current_step: Some(label.to_string()),
            steps: Some(self.steps.clone()),
            ..Default::default()
        }
    }
}
