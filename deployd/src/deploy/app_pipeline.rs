//! Application deployment pipeline:
//! clone, build, stop previous, create and start, proxy, finalize

use std::collections::BTreeMap;

use chrono::Utc;
use futures::StreamExt;
use tracing::warn;

use crate::deploy::cleanup::{CheckoutGuard, ContainerRollback};
use crate::deploy::collaborators::{
    BuildEvent, BuildRequest, Checkout, ContainerSpec, PortBinding, RestartPolicy,
};
use crate::deploy::context::{Outcome, RunContext};
use crate::deploy::engine::Shared;
use crate::deploy::phases::Phase;
use crate::errors::DeployerError;
use crate::models::resources::AppRecord;
use crate::models::spec::AppSpec;
use crate::models::task::{TaskKind, TaskUpdate};

pub const TASK_LABEL: &str = "deployd.task";
pub const APP_LABEL: &str = "deployd.app";

/// Image tag for a build of `name` at `commit`
pub fn image_tag(name: &str, commit: &str, task_id: &str) -> String {
    let version: String = if commit.is_empty() {
        task_id.chars().take(8).collect()
    } else {
        commit.chars().take(12).collect()
    };
    format!("panel-app-{}:{}", name, version)
}

pub(crate) async fn run(
    shared: &Shared,
    task_id: &str,
    spec: AppSpec,
    rollback: &ContainerRollback,
) {
    let mut ctx = RunContext::new(task_id, TaskKind::App, shared.tasks.clone(), shared.logs.clone());
    let checkout = CheckoutGuard::new(
        shared
            .settings
            .checkout_root
            .join(format!("{}-{}", spec.name, task_id)),
    );

    let result = run_phases(shared, &mut ctx, &spec, &checkout, rollback).await;
    checkout.release().await;

    match result {
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
    spec: &AppSpec,
    checkout: &CheckoutGuard,
    rollback: &ContainerRollback,
) -> Result<Outcome, DeployerError> {
    let collaborators = &shared.collaborators;
    ctx.log(format!(
        "Deploying {} from {} (branch {})",
        spec.name,
        spec.repo_url,
        spec.branch()
    ))
    .await;

    // Clone
    ctx.begin(Phase::Clone).await?;
    tokio::fs::create_dir_all(&shared.settings.checkout_root).await?;
    let source: Checkout = collaborators
        .scm
        .clone_repo(
            &spec.repo_url,
            spec.branch(),
            spec.auth_token.as_ref(),
            checkout.path(),
        )
        .await?;
    ctx.log(format!(
        "Checked out {} \"{}\"",
        short(&source.commit_hash),
        source.commit_message
    ))
    .await;
    ctx.complete().await?;

    // Build
    ctx.begin(Phase::Build).await?;
    let tag = image_tag(&spec.name, &source.commit_hash, ctx.task_id());
    build_image(shared, ctx, spec, &source, &tag).await?;
    ctx.record(TaskUpdate {
        image: Some(tag.clone()),
        ..Default::default()
    })
    .await?;
    ctx.log(format!("Built image {}", tag)).await;
    ctx.complete().await?;

    // Stop the previous container only once the new image exists
    ctx.begin(Phase::StopPrevious).await?;
    let previous = shared.registry.get_app(&spec.name).await?;
    match &previous {
        Some(prev) => {
            ctx.log(format!("Stopping previous container {}", short(&prev.container_id)))
                .await;
            let runtime = &collaborators.runtime;
            if let Err(e) = runtime.stop(&prev.container_id).await {
                warn!("Failed to stop {}: {}", prev.container_id, e);
                ctx.log(format!("WARNING: {}", e)).await;
            }
            if let Err(e) = runtime.remove(&prev.container_id, true).await {
                warn!("Failed to remove {}: {}", prev.container_id, e);
                ctx.log(format!("WARNING: {}", e)).await;
            }
        }
        None => ctx.log("No previous container").await,
    }
    ctx.complete().await?;

    // Create and start
    ctx.begin(Phase::Deploy).await?;
    let host_port = shared.ports.allocate()?;
    ctx.log(format!("Allocated host port {}", host_port)).await;

    let mut labels = BTreeMap::new();
    labels.insert(TASK_LABEL.to_string(), ctx.task_id().to_string());
    labels.insert(APP_LABEL.to_string(), spec.name.clone());
    let container = ContainerSpec {
        name: spec.container_name(),
        image: tag.clone(),
        env: spec.env.clone(),
        ports: vec![PortBinding {
            host_ip: shared.settings.publish_host.clone(),
            host_port,
            container_port: spec.container_port,
        }],
        labels,
        volumes: Vec::new(),
        command: Vec::new(),
        restart_policy: RestartPolicy::UnlessStopped,
    };
    let container_id = collaborators.runtime.create(&container).await?;
    rollback.track(container_id.clone());
    ctx.log(format!("Created container {}", short(&container_id))).await;

    collaborators.runtime.start(&container_id).await?;
    ctx.log(format!(
        "Started container {} on port {}",
        short(&container_id),
        host_port
    ))
    .await;
    ctx.complete().await?;

    // Reverse proxy, best-effort
    ctx.begin(Phase::ConfigureProxy).await?;
    let routing = configure_proxy(shared, ctx, spec, previous.as_ref(), host_port).await;
    ctx.complete().await?;

    // Finalize
    ctx.begin(Phase::Finalize).await?;
    shared
        .registry
        .save_app(AppRecord {
            name: spec.name.clone(),
            container_id: container_id.clone(),
            image: tag.clone(),
            host_port,
            domain: spec.domain.clone(),
            site_id: routing.recorded,
            task_id: ctx.task_id().to_string(),
            deployed_at: Utc::now(),
        })
        .await?;
    rollback.commit();
    ctx.log(format!(
        "========== {} deployed: container {}, port {}, image {} ==========",
        spec.name,
        short(&container_id),
        host_port,
        tag
    ))
    .await;

    Ok(Outcome {
        result_ref: container_id,
        site_id: routing.bound,
    })
}

/// Sites routing the app once the proxy phase is over
struct Routing {
    /// Site bound or updated by this run
    bound: Option<String>,

    /// Site kept in the app record
    recorded: Option<String>,
}

async fn configure_proxy(
    shared: &Shared,
    ctx: &RunContext,
    spec: &AppSpec,
    previous: Option<&AppRecord>,
    host_port: u16,
) -> Routing {
    let proxy = &shared.collaborators.proxy;

    // a previous site is only reused for the same domain
    let (reusable, stale) = match previous {
        Some(AppRecord {
            site_id: Some(site_id),
            domain,
            ..
        }) => {
            if domain.is_some() && *domain == spec.domain {
                (Some(site_id.clone()), None)
            } else {
                (None, Some(site_id.clone()))
            }
        }
        _ => (None, None),
    };

    let bound = match &spec.domain {
        Some(domain) => {
            let upstream = format!("{}:{}", shared.settings.upstream_host, host_port);
            let result = match &reusable {
                Some(site_id) => proxy
                    .update(site_id, &upstream)
                    .await
                    .map(|_| site_id.clone()),
                None => proxy.bind(domain, &upstream).await,
            };
            match result {
                Ok(site_id) => {
                    ctx.log(format!("Routed {} to {} ({})", domain, upstream, site_id))
                        .await;
                    Some(site_id)
                }
                Err(e) => {
                    warn!("Reverse proxy for {} failed: {}", domain, e);
                    ctx.log(format!(
                        "WARNING: reverse proxy configuration failed, {} is not routed: {}",
                        domain, e
                    ))
                    .await;
                    None
                }
            }
        }
        None => {
            ctx.log("No domain configured, skipping reverse proxy").await;
            None
        }
    };

    if let Some(site_id) = stale {
        match proxy.unbind(&site_id).await {
            Ok(()) => ctx.log(format!("Removed stale site {}", site_id)).await,
            Err(e) => {
                warn!("Failed to unbind stale site {}: {}", site_id, e);
                ctx.log(format!("WARNING: failed to remove stale site {}: {}", site_id, e))
                    .await;
            }
        }
    }

    Routing {
        recorded: bound.clone().or(reusable),
        bound,
    }
}

async fn build_image(
    shared: &Shared,
    ctx: &RunContext,
    spec: &AppSpec,
    source: &Checkout,
    tag: &str,
) -> Result<(), DeployerError> {
    let request = BuildRequest {
        context: source.path.clone(),
        dockerfile: spec.dockerfile().to_string(),
        tag: tag.to_string(),
    };
    let mut events = shared.collaborators.builder.build(&request).await?;
    while let Some(event) = events.next().await {
        match event {
            BuildEvent::Log(line) => ctx.log(line).await,
            BuildEvent::Error(message) => return Err(DeployerError::Build(message)),
        }
    }
    Ok(())
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
