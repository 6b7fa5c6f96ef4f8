//! Docker image builder and container runtime

use std::process::Stdio;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::collaborators::{
    BuildEvent, BuildRequest, ContainerRuntime, ContainerSpec, ContainerState, ImageBuilder,
};
use crate::errors::DeployerError;

/// Builder and runtime backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<String, DeployerError> {
        debug!("Running {} {}", self.binary, loggable_args(args));
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| DeployerError::Container(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployerError::Container(format!(
                "docker {} failed: {}",
                args.first().map(String::as_str).unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Command-line arguments for `docker create`
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--restart".to_string(),
        spec.restart_policy.as_str().to_string(),
    ];
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!(
            "{}:{}:{}",
            port.host_ip, port.host_port, port.container_port
        ));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Arguments joined for logging, with environment values and passwords masked
pub fn loggable_args(args: &[String]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut previous: Option<&str> = None;
    for arg in args {
        let shown = match previous {
            Some("-e") | Some("--env") => match arg.split_once('=') {
                Some((key, _)) => format!("{}=***", key),
                None => arg.clone(),
            },
            Some("--requirepass") => "***".to_string(),
            _ => arg.clone(),
        };
        masked.push(shown);
        previous = Some(arg.as_str());
    }
    masked.join(" ")
}

async fn forward_lines<R>(reader: Option<R>, tx: UnboundedSender<BuildEvent>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.unbounded_send(BuildEvent::Log(line)).is_err() {
            break;
        }
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(
        &self,
        request: &BuildRequest,
    ) -> Result<BoxStream<'static, BuildEvent>, DeployerError> {
        info!("Building image {} from {}", request.tag, request.context.display());

        let mut child = Command::new(&self.binary)
            .current_dir(&request.context)
            .args([
                "build",
                "--progress=plain",
                "-f",
                request.dockerfile.as_str(),
                "-t",
                request.tag.as_str(),
                ".",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeployerError::Build(format!("Failed to run docker build: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::unbounded();

        tokio::spawn(async move {
            futures::join!(
                forward_lines(stdout, tx.clone()),
                forward_lines(stderr, tx.clone())
            );
            let failure = match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(format!("docker build exited with {}", status)),
                Err(e) => Some(format!("Failed to wait for docker build: {}", e)),
            };
            if let Some(message) = failure {
                let _ = tx.unbounded_send(BuildEvent::Error(message));
            }
        });

        Ok(rx.boxed())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull_image(&self, image: &str) -> Result<(), DeployerError> {
        info!("Pulling image: {}", image);
        self.docker(&["pull".to_string(), image.to_string()])
            .await
            .map(|_| ())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, DeployerError> {
        info!("Creating container {} from {}", spec.name, spec.image);
        self.docker(&create_args(spec)).await
    }

    async fn start(&self, container_id: &str) -> Result<(), DeployerError> {
        self.docker(&["start".to_string(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    async fn stop(&self, container_id: &str) -> Result<(), DeployerError> {
        self.docker(&["stop".to_string(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<(), DeployerError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(container_id.to_string());
        self.docker(&args).await.map(|_| ())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, DeployerError> {
        let status = self
            .docker(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{.State.Status}}".to_string(),
                container_id.to_string(),
            ])
            .await?;
        Ok(ContainerState {
            running: status == "running",
            status,
        })
    }

    async fn remove_image(&self, image: &str) -> Result<(), DeployerError> {
        self.docker(&["rmi".to_string(), image.to_string()])
            .await
            .map(|_| ())
    }
}
