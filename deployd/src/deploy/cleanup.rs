//! Resource cleanup for pipeline runs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::deploy::collaborators::ContainerRuntime;

/// Owns a checkout directory and removes it once the run is over, whatever
/// the outcome.
///
/// Prefer `release`; dropping the guard falls back to a blocking removal so
/// the directory also goes away when the pipeline future is cancelled or
/// panics.
#[derive(Debug)]
pub struct CheckoutGuard {
    path: Option<PathBuf>,
}

impl CheckoutGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub async fn release(mut self) {
        if let Some(path) = self.path.take() {
            remove_checkout(&path).await;
        }
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => info!("Removed checkout {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove checkout {}: {}", path.display(), e),
            }
        }
    }
}

async fn remove_checkout(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => info!("Removed checkout {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove checkout {}: {}", path.display(), e),
    }
}

/// Remembers the container created by the current run so a failure after
/// creation can tear it down again.
///
/// Clones share the tracked container, so the supervisor of a run can still
/// roll back after the pipeline itself panicked.
#[derive(Debug, Clone, Default)]
pub struct ContainerRollback {
    container_id: Arc<Mutex<Option<String>>>,
}

impl ContainerRollback {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.container_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track(&self, container_id: impl Into<String>) {
        *self.slot() = Some(container_id.into());
    }

    /// Forget the container, it now belongs to a successful deployment
    pub fn commit(&self) {
        *self.slot() = None;
    }

    pub fn tracked(&self) -> Option<String> {
        self.slot().clone()
    }

    /// Stop and force-remove the tracked container. Returns the messages of
    /// any cleanup errors, which never replace the original failure.
    pub async fn rollback(&self, runtime: &dyn ContainerRuntime) -> Vec<String> {
        let taken = self.slot().take();
        let Some(container_id) = taken else {
            return Vec::new();
        };
        info!("Rolling back container {}", container_id);

        let mut problems = Vec::new();
        if let Err(e) = runtime.stop(&container_id).await {
            problems.push(format!("stop {}: {}", container_id, e));
        }
        if let Err(e) = runtime.remove(&container_id, true).await {
            problems.push(format!("remove {}: {}", container_id, e));
        }
        for problem in &problems {
            warn!("Container rollback: {}", problem);
        }
        problems
    }
}
