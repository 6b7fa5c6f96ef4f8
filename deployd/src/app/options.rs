//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::engine::EngineSettings;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{PortSettings, Settings, StoreBackend};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// External tool configuration
    pub tools: ToolOptions,

    /// Host port range for containers
    pub ports: PortSettings,

    /// Engine settings
    pub engine: EngineSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl AppOptions {
    /// Options derived from a settings file, with data under `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let engine = settings.engine.to_engine_settings(
            layout.checkouts_dir().path().to_path_buf(),
            &settings.ports,
            &settings.proxy,
        );
        Self {
            lifecycle: LifecycleOptions {
                drain_timeout: Duration::from_secs(settings.engine.shutdown_timeout_secs),
                ..Default::default()
            },
            storage: StorageOptions {
                layout,
                backend: settings.store.backend,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            tools: ToolOptions {
                docker_binary: settings.docker.binary.clone(),
                git_binary: settings.git.binary.clone(),
                git_timeout: Duration::from_secs(settings.git.timeout_secs),
                proxy_admin_url: settings.proxy.admin_url.clone(),
                proxy_server_name: settings.proxy.server_name.clone(),
            },
            ports: settings.ports.clone(),
            engine,
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long shutdown waits for running tasks
    pub drain_timeout: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    pub backend: StoreBackend,
}

impl StorageOptions {
    pub fn data_dir(&self) -> PathBuf {
        self.layout.base_dir.clone()
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

/// Binaries and endpoints of the external collaborators
#[derive(Debug, Clone)]
pub struct ToolOptions {
    pub docker_binary: String,
    pub git_binary: String,
    pub git_timeout: Duration,

    /// Caddy admin API, reverse proxy disabled when absent
    pub proxy_admin_url: Option<String>,
    pub proxy_server_name: String,
}
