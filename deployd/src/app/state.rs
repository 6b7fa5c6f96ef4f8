//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::collaborators::{Collaborators, ReverseProxy};
use crate::deploy::docker::DockerCli;
use crate::deploy::engine::DeploymentEngine;
use crate::deploy::git::GitCli;
use crate::deploy::log_store::InMemoryLogStore;
use crate::deploy::ports::PortAllocator;
use crate::deploy::proxy::{CaddyProxy, DisabledProxy};
use crate::errors::DeployerError;
use crate::storage::settings::StoreBackend;
use crate::store::{
    FileRegistry, FileTaskStore, InMemoryRegistry, InMemoryTaskStore, ResourceRegistry, TaskStore,
};

/// Main application state
pub struct AppState {
    pub engine: DeploymentEngine,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeployerError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        let (tasks, registry): (Arc<dyn TaskStore>, Arc<dyn ResourceRegistry>) =
            match options.storage.backend {
                StoreBackend::File => (
                    Arc::new(FileTaskStore::new(layout.tasks_dir())),
                    Arc::new(FileRegistry::new(layout.registry_dir())),
                ),
                StoreBackend::Memory => {
                    warn!("Using in-memory storage, tasks are lost on restart");
                    (
                        Arc::new(InMemoryTaskStore::new()),
                        Arc::new(InMemoryRegistry::new()),
                    )
                }
            };

        let engine = DeploymentEngine::new(
            collaborators(options),
            tasks,
            registry,
            Arc::new(InMemoryLogStore::new()),
            PortAllocator::new(
                options.ports.bind_host.clone(),
                options.ports.start,
                options.ports.end,
            ),
            options.engine.clone(),
        );

        let recovered = engine.recover_interrupted().await?;
        if recovered > 0 {
            warn!("Marked {} interrupted task(s) as failed", recovered);
        }

        Ok(Self { engine })
    }

    /// Wait for running tasks to finish
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<(), DeployerError> {
        info!("Shutting down application state...");
        self.engine.drain(drain_timeout).await
    }
}

fn collaborators(options: &AppOptions) -> Collaborators {
    let tools = &options.tools;
    let docker = Arc::new(DockerCli::new(tools.docker_binary.clone()));
    let proxy: Arc<dyn ReverseProxy> = match &tools.proxy_admin_url {
        Some(admin_url) => Arc::new(CaddyProxy::new(
            admin_url.clone(),
            tools.proxy_server_name.clone(),
        )),
        None => {
            info!("No reverse proxy configured, domains will not be routed");
            Arc::new(DisabledProxy)
        }
    };

    Collaborators {
        scm: Arc::new(GitCli::new(tools.git_binary.clone(), tools.git_timeout)),
        builder: docker.clone(),
        runtime: docker,
        proxy,
    }
}
