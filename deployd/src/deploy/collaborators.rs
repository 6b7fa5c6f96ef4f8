//! Interfaces to the external systems a pipeline drives

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;

use crate::errors::DeployerError;

/// Result of a successful clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub path: PathBuf,
    pub commit_hash: String,
    pub commit_message: String,
}

/// Source control client
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `branch` of `url` into `dest`.
    ///
    /// Implementations remove whatever they wrote to `dest` when the clone
    /// fails.
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        auth_token: Option<&SecretString>,
        dest: &Path,
    ) -> Result<Checkout, DeployerError>;
}

/// A single item of image build output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Log(String),
    Error(String),
}

/// Image build request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context: PathBuf,
    pub dockerfile: String,
    pub tag: String,
}

/// Container image builder
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Start a build and stream its output. An `Error` item aborts the build.
    async fn build(
        &self,
        request: &BuildRequest,
    ) -> Result<BoxStream<'static, BuildEvent>, DeployerError>;
}

/// Container restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

/// Host port published for a container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub command: Vec<String>,
    pub restart_policy: RestartPolicy,
}

/// Observed container state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
}

/// Container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), DeployerError>;

    /// Create a container and return its ID
    async fn create(&self, spec: &ContainerSpec) -> Result<String, DeployerError>;

    async fn start(&self, container_id: &str) -> Result<(), DeployerError>;

    async fn stop(&self, container_id: &str) -> Result<(), DeployerError>;

    async fn remove(&self, container_id: &str, force: bool) -> Result<(), DeployerError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, DeployerError>;

    async fn remove_image(&self, image: &str) -> Result<(), DeployerError>;
}

/// Reverse-proxy configurator
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Route `domain` to `upstream` and return the site ID
    async fn bind(&self, domain: &str, upstream: &str) -> Result<String, DeployerError>;

    async fn update(&self, site_id: &str, upstream: &str) -> Result<(), DeployerError>;

    async fn unbind(&self, site_id: &str) -> Result<(), DeployerError>;
}

/// The set of collaborators an engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub scm: Arc<dyn SourceControl>,
    pub builder: Arc<dyn ImageBuilder>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub proxy: Arc<dyn ReverseProxy>,
}
