//! Database provisioning pipeline:
//! prepare, pull, create, start, wait for readiness, verify and register

use std::collections::BTreeMap;

use chrono::Utc;
use secrecy::ExposeSecret;

use crate::deploy::app_pipeline::TASK_LABEL;
use crate::deploy::cleanup::ContainerRollback;
use crate::deploy::collaborators::{ContainerSpec, PortBinding, RestartPolicy};
use crate::deploy::context::{Outcome, RunContext};
use crate::deploy::engine::Shared;
use crate::deploy::phases::Phase;
use crate::errors::DeployerError;
use crate::models::resources::DatabaseServer;
use crate::models::spec::DatabaseSpec;
use crate::models::task::{TaskKind, TaskUpdate};

pub const DATABASE_LABEL: &str = "deployd.database";

pub(crate) async fn run(
    shared: &Shared,
    task_id: &str,
    spec: DatabaseSpec,
    rollback: &ContainerRollback,
) {
    let mut ctx = RunContext::new(
        task_id,
        TaskKind::Database,
        shared.tasks.clone(),
        shared.logs.clone(),
    );

    match run_phases(shared, &mut ctx, &spec, rollback).await {
        Ok(outcome) => ctx.succeed(outcome).await,
        Err(e) => {
            for problem in rollback.rollback(shared.collaborators.runtime.as_ref()).await {
                ctx.log(format!("WARNING: cleanup failed: {}", problem)).await;
            }
            ctx.fail(&e).await;
        }
    }
}

async fn run_phases(
    shared: &Shared,
    ctx: &mut RunContext,
    spec: &DatabaseSpec,
    rollback: &ContainerRollback,
) -> Result<Outcome, DeployerError> {
    let runtime = &shared.collaborators.runtime;
    let image = spec.image();

    // Prepare
    ctx.begin(Phase::Prepare).await?;
    ctx.log(format!("Provisioning {} database {}", spec.engine, spec.name))
        .await;
    let host_port = match spec.host_port {
        Some(port) => port,
        None => shared.ports.allocate()?,
    };
    ctx.log(format!("Using host port {}", host_port)).await;
    ctx.complete().await?;

    // Pull
    ctx.begin(Phase::PullImage).await?;
    runtime.pull_image(&image).await?;
    ctx.record(TaskUpdate {
        image: Some(image.clone()),
        ..Default::default()
    })
    .await?;
    ctx.log(format!("Pulled {}", image)).await;
    ctx.complete().await?;

    // Create
    ctx.begin(Phase::CreateContainer).await?;
    let password = spec
        .root_password
        .as_ref()
        .map(|p| p.expose_secret().to_string())
        .unwrap_or_default();
    let mut labels = BTreeMap::new();
    labels.insert(TASK_LABEL.to_string(), ctx.task_id().to_string());
    labels.insert(DATABASE_LABEL.to_string(), spec.name.clone());
    let container = ContainerSpec {
        name: spec.container_name(),
        image: image.clone(),
        env: spec.engine.credential_env(&password),
        ports: vec![PortBinding {
            host_ip: shared.settings.publish_host.clone(),
            host_port,
            container_port: spec.engine.internal_port(),
        }],
        labels,
        volumes: vec![format!("{}:{}", spec.volume_name(), spec.engine.data_dir())],
        command: spec.engine.command(&password),
        restart_policy: RestartPolicy::UnlessStopped,
    };
    let container_id = runtime.create(&container).await?;
    rollback.track(container_id.clone());
    ctx.log(format!("Created container {}", container_id)).await;
    ctx.complete().await?;

    // Start
    ctx.begin(Phase::StartContainer).await?;
    runtime.start(&container_id).await?;
    ctx.log("Container started").await;
    ctx.complete().await?;

    // Wait for readiness
    ctx.begin(Phase::WaitReady).await?;
    let delay = shared.settings.readiness_delay(spec.engine);
    let ticks = shared.settings.readiness_ticks.max(1);
    ctx.log(format!("Waiting {:?} for {} to accept connections", delay, spec.engine))
        .await;
    for tick in 1..=ticks {
        tokio::time::sleep(delay / ticks).await;
        ctx.advance((tick * 100 / ticks) as u8).await?;
    }
    ctx.complete().await?;

    // Verify and register
    ctx.begin(Phase::Verify).await?;
    let state = runtime.inspect(&container_id).await?;
    if !state.running {
        return Err(DeployerError::Container(format!(
            "container {} is {} after the readiness wait",
            container_id, state.status
        )));
    }

    let server = DatabaseServer {
        id: uuid::Uuid::new_v4().to_string(),
        name: spec.name.clone(),
        engine: spec.engine,
        host: shared.settings.upstream_host.clone(),
        port: host_port,
        username: spec.engine.default_username().to_string(),
        container_id: container_id.clone(),
        created_at: Utc::now(),
    };
    let server_id = server.id.clone();
    shared.registry.register_server(server).await?;
    rollback.commit();
    ctx.log(format!(
        "========== {} {} ready on {}:{} (server {}) ==========",
        spec.engine, spec.name, shared.settings.upstream_host, host_port, server_id
    ))
    .await;

    Ok(Outcome {
        result_ref: server_id,
        site_id: None,
    })
}
