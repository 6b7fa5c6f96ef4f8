//! Deployment engine: accepts requests, runs pipelines in the background and
//! answers queries about their tasks

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::deploy::cleanup::ContainerRollback;
use crate::deploy::collaborators::Collaborators;
use crate::deploy::locks::{TargetLease, TargetLocks};
use crate::deploy::log_store::LogStore;
use crate::deploy::ports::PortAllocator;
use crate::deploy::tracker::StepTracker;
use crate::deploy::{app_pipeline, database_pipeline};
use crate::errors::DeployerError;
use crate::models::spec::{AppSpec, DatabaseEngine, DatabaseSpec};
use crate::models::task::{DeploymentTask, TaskFilter, TaskKind, TaskUpdate};
use crate::store::{ResourceRegistry, TaskStore};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reject a start while another task for the same target is in flight
    pub serialize_targets: bool,

    /// Parent directory of per-task checkouts
    pub checkout_root: PathBuf,

    /// Host address container ports are published on
    pub publish_host: String,

    /// Address the proxy and database clients reach published ports on
    pub upstream_host: String,

    /// Per-engine readiness delays, replacing the built-in ones
    pub readiness_delays: HashMap<DatabaseEngine, Duration>,

    /// Number of sub-progress updates emitted while waiting for readiness
    pub readiness_ticks: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            serialize_targets: true,
            checkout_root: std::env::temp_dir().join("deployd-checkouts"),
            publish_host: "0.0.0.0".to_string(),
            upstream_host: "127.0.0.1".to_string(),
            readiness_delays: HashMap::new(),
            readiness_ticks: 10,
        }
    }
}

impl EngineSettings {
    pub fn readiness_delay(&self, engine: DatabaseEngine) -> Duration {
        self.readiness_delays
            .get(&engine)
            .copied()
            .unwrap_or_else(|| engine.readiness_delay())
    }
}

/// Dependencies the pipelines run against
pub(crate) struct Shared {
    pub collaborators: Collaborators,
    pub tasks: Arc<dyn TaskStore>,
    pub registry: Arc<dyn ResourceRegistry>,
    pub logs: Arc<dyn LogStore>,
    pub ports: PortAllocator,
    pub settings: EngineSettings,
}

enum Job {
    App(AppSpec),
    Database(DatabaseSpec),
}

/// Runs deployment and provisioning pipelines as supervised background tasks
#[derive(Clone)]
pub struct DeploymentEngine {
    shared: Arc<Shared>,
    locks: TargetLocks,
    running: Arc<Mutex<HashMap<String, watch::Receiver<bool>>>>,
}

impl DeploymentEngine {
    pub fn new(
        collaborators: Collaborators,
        tasks: Arc<dyn TaskStore>,
        registry: Arc<dyn ResourceRegistry>,
        logs: Arc<dyn LogStore>,
        ports: PortAllocator,
        settings: EngineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                collaborators,
                tasks,
                registry,
                logs,
                ports,
                settings,
            }),
            locks: TargetLocks::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate an app spec, create its task and start the pipeline.
    /// Returns the task ID without waiting for the run.
    pub async fn start_app(&self, spec: AppSpec) -> Result<String, DeployerError> {
        let spec = spec.validate()?;
        let target = spec.name.clone();
        self.start(TaskKind::App, &target, Job::App(spec)).await
    }

    /// Validate a database spec, create its task and start the pipeline
    pub async fn start_database(&self, spec: DatabaseSpec) -> Result<String, DeployerError> {
        let spec = spec.validate()?;
        let target = spec.name.clone();
        self.start(TaskKind::Database, &target, Job::Database(spec)).await
    }

    async fn start(&self, kind: TaskKind, target: &str, job: Job) -> Result<String, DeployerError> {
        let lease = if self.shared.settings.serialize_targets {
            self.locks.try_acquire(kind, target)?
        } else {
            TargetLease::unguarded(&self.locks)
        };

        let task = DeploymentTask::new(kind, target, StepTracker::initial_steps(kind));
        let task_id = task.id.clone();
        self.shared.tasks.insert(task).await?;
        self.shared.logs.open(&task_id).await;
        info!(task_id = %task_id, "Accepted {} task for {}", kind, target);

        self.launch(task_id.clone(), kind, lease, job);
        Ok(task_id)
    }

    fn launch(&self, task_id: String, kind: TaskKind, lease: TargetLease, job: Job) {
        let (done_tx, done_rx) = watch::channel(false);
        self.running_map().insert(task_id.clone(), done_rx);

        let engine = self.clone();
        let rollback = ContainerRollback::new();
        tokio::spawn(async move {
            let shared = engine.shared.clone();
            let id = task_id.clone();
            let run_rollback = rollback.clone();
            let run = tokio::spawn(async move {
                match job {
                    Job::App(spec) => app_pipeline::run(&shared, &id, spec, &run_rollback).await,
                    Job::Database(spec) => {
                        database_pipeline::run(&shared, &id, spec, &run_rollback).await
                    }
                }
            });

            if let Err(e) = run.await {
                error!(task_id = %task_id, "{} pipeline crashed: {}", kind, e);
                engine.mark_crashed(&task_id, &e.to_string(), &rollback).await;
            }

            drop(lease);
            engine.running_map().remove(&task_id);
            let _ = done_tx.send(true);
        });
    }

    async fn mark_crashed(&self, task_id: &str, reason: &str, rollback: &ContainerRollback) {
        let message = format!("engine crashed: {}", reason);
        let runtime = self.shared.collaborators.runtime.as_ref();
        for problem in rollback.rollback(runtime).await {
            self.shared
                .logs
                .append(task_id, &format!("WARNING: cleanup failed: {}", problem))
                .await;
        }

        let task = match self.shared.tasks.get(task_id).await {
            Ok(Some(task)) if task.is_active() => task,
            Ok(_) => return,
            Err(e) => {
                error!(task_id = %task_id, "Failed to load crashed task: {}", e);
                return;
            }
        };

        self.shared
            .logs
            .append(task_id, &format!("ERROR: {}", message))
            .await;
        let mut update = StepTracker::failure_for(&task, &message);
        update.logs = self.shared.logs.snapshot(task_id).await;
        if let Err(e) = self.shared.tasks.apply(task_id, update).await {
            error!(task_id = %task_id, "Failed to mark crashed task: {}", e);
        }
        self.shared.logs.take(task_id).await;
    }

    fn running_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Receiver<bool>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of runs still in flight
    pub fn in_flight(&self) -> usize {
        self.running_map().len()
    }

    /// Wait until the run of `task_id` is over and return the final record
    pub async fn wait(&self, task_id: &str) -> Result<DeploymentTask, DeployerError> {
        let done = self.running_map().get(task_id).cloned();
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_task(task_id).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<DeploymentTask, DeployerError> {
        self.shared
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| DeployerError::NotFound(format!("task {}", task_id)))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<DeploymentTask>, DeployerError> {
        self.shared.tasks.list(filter).await
    }

    /// Live log while the task runs, the persisted copy afterwards
    pub async fn get_logs(&self, task_id: &str) -> Result<String, DeployerError> {
        if let Some(live) = self.shared.logs.snapshot(task_id).await {
            return Ok(live);
        }
        let task = self.get_task(task_id).await?;
        Ok(task.logs.unwrap_or_default())
    }

    /// Delete a finished task together with the resources it still owns
    pub async fn delete_task(&self, task_id: &str) -> Result<(), DeployerError> {
        let task = self.get_task(task_id).await?;
        if task.is_active() {
            return Err(DeployerError::InvalidTransition(format!(
                "task {} is still {:?}",
                task_id, task.status
            )));
        }

        if task.status.is_success() {
            match task.kind {
                TaskKind::App => self.remove_app_resources(&task).await?,
                TaskKind::Database => self.remove_database_resources(&task).await?,
            }
        }

        self.shared.tasks.delete(task_id).await?;
        info!(task_id = %task_id, "Deleted {} task for {}", task.kind, task.target);
        Ok(())
    }

    async fn remove_app_resources(&self, task: &DeploymentTask) -> Result<(), DeployerError> {
        let registry = &self.shared.registry;
        let record = match registry.get_app(&task.target).await? {
            Some(record) if record.task_id == task.id => record,
            // superseded by a later deployment
            _ => return Ok(()),
        };

        let runtime = &self.shared.collaborators.runtime;
        if let Err(e) = runtime.remove(&record.container_id, true).await {
            warn!("Failed to remove container {}: {}", record.container_id, e);
        }
        if let Some(site_id) = &record.site_id {
            if let Err(e) = self.shared.collaborators.proxy.unbind(site_id).await {
                warn!("Failed to unbind site {}: {}", site_id, e);
            }
        }
        registry.remove_app(&record.name).await?;
        Ok(())
    }

    async fn remove_database_resources(&self, task: &DeploymentTask) -> Result<(), DeployerError> {
        let Some(server_id) = &task.result_ref else {
            return Ok(());
        };
        let registry = &self.shared.registry;
        let Some(server) = registry.get_server(server_id).await? else {
            return Ok(());
        };

        let runtime = &self.shared.collaborators.runtime;
        if let Err(e) = runtime.remove(&server.container_id, true).await {
            warn!("Failed to remove container {}: {}", server.container_id, e);
        }
        registry.remove_server(server_id).await?;
        Ok(())
    }

    /// Remove images built by finished app tasks that no deployed app or
    /// running task uses. Returns the removed tags.
    pub async fn prune_images(&self) -> Result<Vec<String>, DeployerError> {
        let tasks = self
            .shared
            .tasks
            .list(&TaskFilter {
                kind: Some(TaskKind::App),
                ..Default::default()
            })
            .await?;

        let mut keep: HashSet<String> = self
            .shared
            .registry
            .list_apps()
            .await?
            .into_iter()
            .map(|app| app.image)
            .collect();
        keep.extend(
            tasks
                .iter()
                .filter(|t| t.is_active())
                .filter_map(|t| t.image.clone()),
        );

        let candidates: HashSet<String> = tasks
            .into_iter()
            .filter(|t| !t.is_active())
            .filter_map(|t| t.image)
            .filter(|image| !keep.contains(image))
            .collect();

        let mut removed = Vec::new();
        for image in candidates {
            match self.shared.collaborators.runtime.remove_image(&image).await {
                Ok(()) => {
                    info!("Pruned image {}", image);
                    removed.push(image);
                }
                Err(e) => warn!("Failed to prune image {}: {}", image, e),
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Fail every persisted task left active by a previous process.
    /// Returns how many were marked.
    pub async fn recover_interrupted(&self) -> Result<usize, DeployerError> {
        let active = self
            .shared
            .tasks
            .list(&TaskFilter {
                active: Some(true),
                ..Default::default()
            })
            .await?;

        let mut recovered = 0;
        for task in active {
            let running = self.running_map().contains_key(&task.id);
            if running {
                continue;
            }
            let update: TaskUpdate =
                StepTracker::failure_for(&task, "interrupted by daemon restart");
            match self.shared.tasks.apply(&task.id, update).await {
                Ok(_) => {
                    warn!(task_id = %task.id, "Marked interrupted {} task for {} as failed", task.kind, task.target);
                    recovered += 1;
                }
                Err(e) => error!(task_id = %task.id, "Failed to recover task: {}", e),
            }
        }
        Ok(recovered)
    }

    /// Wait for in-flight runs to finish, up to `timeout`
    pub async fn drain(&self, timeout: Duration) -> Result<(), DeployerError> {
        let pending: Vec<watch::Receiver<bool>> = self.running_map().values().cloned().collect();
        if pending.is_empty() {
            return Ok(());
        }
        info!("Waiting for {} running task(s) to finish...", pending.len());

        let all_done = futures::future::join_all(pending.into_iter().map(|mut done| async move {
            let _ = done.wait_for(|finished| *finished).await;
        }));
        tokio::time::timeout(timeout, all_done).await.map_err(|_| {
            DeployerError::ShutdownError(format!(
                "{} task(s) still running after {:?}",
                self.in_flight(),
                timeout
            ))
        })?;
        Ok(())
    }
}
