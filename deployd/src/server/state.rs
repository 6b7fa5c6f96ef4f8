//! Server state

use crate::deploy::engine::DeploymentEngine;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: DeploymentEngine,
}

impl ServerState {
    pub fn new(engine: DeploymentEngine) -> Self {
        Self { engine }
    }
}
