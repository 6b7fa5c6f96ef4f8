//! Per-target run exclusion

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::errors::DeployerError;
use crate::models::task::TaskKind;

type TargetKey = (TaskKind, String);

/// Set of targets that currently have a task in flight
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    held: Arc<Mutex<HashSet<TargetKey>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target`, failing with `TargetBusy` if another task holds it
    pub fn try_acquire(&self, kind: TaskKind, target: &str) -> Result<TargetLease, DeployerError> {
        let key = (kind, target.to_string());
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return Err(DeployerError::TargetBusy(format!(
                "a {} task for {} is already running",
                kind, target
            )));
        }
        Ok(TargetLease {
            locks: self.clone(),
            key: Some(key),
        })
    }

    pub fn is_held(&self, kind: TaskKind, target: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(kind, target.to_string()))
    }

    fn release(&self, key: &TargetKey) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Held claim on a target, released on drop
#[derive(Debug)]
pub struct TargetLease {
    locks: TargetLocks,
    key: Option<TargetKey>,
}

impl TargetLease {
    /// A lease that guards nothing, used when target exclusion is disabled
    pub fn unguarded(locks: &TargetLocks) -> Self {
        Self {
            locks: locks.clone(),
            key: None,
        }
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.locks.release(&key);
        }
    }
}
