//! Settings file management

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deploy::engine::EngineSettings;
use crate::deploy::ports::{DEFAULT_PORT_END, DEFAULT_PORT_START};
use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::spec::DatabaseEngine;

/// Daemon settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Data directory, defaults to the platform location
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub ports: PortSettings,

    #[serde(default)]
    pub docker: DockerSettings,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    /// Read settings from `file`; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, DeployerError> {
        let settings = file.read_json::<Settings>().await.map_err(|e| {
            DeployerError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })?;
        let settings = settings.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.ports.start >= self.ports.end {
            return Err(DeployerError::ConfigError(format!(
                "port range {}-{} is empty",
                self.ports.start, self.ports.end
            )));
        }
        if self.git.timeout_secs == 0 {
            return Err(DeployerError::ConfigError(
                "git.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8420
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Host port range handed out to containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_port_start")]
    pub start: u16,

    /// Exclusive
    #[serde(default = "default_port_end")]
    pub end: u16,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port_start() -> u16 {
    DEFAULT_PORT_START
}

fn default_port_end() -> u16 {
    DEFAULT_PORT_END
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Deadline for each git invocation
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_git_timeout() -> u64 {
    300
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout(),
        }
    }
}

/// Reverse proxy settings. The proxy is disabled without an admin URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub admin_url: Option<String>,

    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address the proxy reaches published container ports on
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
}

fn default_server_name() -> String {
    "srv0".to_string()
}

fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            admin_url: None,
            server_name: default_server_name(),
            upstream_host: default_upstream_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub serialize_targets: bool,

    /// Readiness delay overrides in seconds, keyed by engine name
    #[serde(default)]
    pub readiness_secs: BTreeMap<String, u64>,

    #[serde(default = "default_readiness_ticks")]
    pub readiness_ticks: u32,

    /// How long shutdown waits for running tasks
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_readiness_ticks() -> u32 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            serialize_targets: true,
            readiness_secs: BTreeMap::new(),
            readiness_ticks: default_readiness_ticks(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl EngineConfig {
    /// Engine settings with checkouts under `checkout_root`
    pub fn to_engine_settings(
        &self,
        checkout_root: PathBuf,
        ports: &PortSettings,
        proxy: &ProxySettings,
    ) -> EngineSettings {
        let mut readiness_delays = HashMap::new();
        for (name, secs) in &self.readiness_secs {
            match serde_json::from_value::<DatabaseEngine>(serde_json::Value::String(name.clone())) {
                Ok(engine) => {
                    readiness_delays.insert(engine, Duration::from_secs(*secs));
                }
                Err(_) => warn!("Ignoring readiness override for unknown engine {:?}", name),
            }
        }

        EngineSettings {
            serialize_targets: self.serialize_targets,
            checkout_root,
            publish_host: ports.bind_host.clone(),
            upstream_host: proxy.upstream_host.clone(),
            readiness_delays,
            readiness_ticks: self.readiness_ticks,
        }
    }
}

/// Task and registry persistence backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
}
