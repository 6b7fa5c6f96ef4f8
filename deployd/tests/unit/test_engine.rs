//! Deployment engine tests: admission, queries, cleanup and lifecycle

use std::time::Duration;

use deployd::deploy::ports::PortAllocator;
use deployd::deploy::tracker::StepTracker;
use deployd::errors::DeployerError;
use deployd::models::spec::DatabaseEngine;
use deployd::models::task::{DeploymentTask, StepStatus, TaskFilter, TaskKind, TaskStatus};
use deployd::store::TaskStore;

use crate::support::{
    app_spec, app_spec_with_domain, postgres_spec, test_settings, Harness,
};

/// Harness whose postgres readiness wait takes `delay`
fn slow_postgres(delay: Duration) -> Harness {
    let mut settings = test_settings();
    settings
        .readiness_delays
        .insert(DatabaseEngine::Postgres, delay);
    Harness::with(settings, PortAllocator::new("127.0.0.1", 42000, 42999))
}

#[tokio::test]
async fn test_invalid_spec_creates_no_task() {
    let h = Harness::new();

    let mut spec = app_spec("web");
    spec.repo_url = "ftp://example.com/a.git".to_string();
    let result = h.engine.start_app(spec).await;
    assert!(matches!(result, Err(DeployerError::Validation(_))));

    let mut spec = app_spec("web");
    spec.container_port = 0;
    assert!(h.engine.start_app(spec).await.is_err());

    assert!(h
        .engine
        .list_tasks(&TaskFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn test_start_returns_before_completion() {
    let h = slow_postgres(Duration::from_millis(400));

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.get_task(&task_id).await.unwrap();
    assert!(task.is_active());
    assert_eq!(h.engine.in_flight(), 1);

    let task = h.engine.wait(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(h.engine.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_start_on_same_target_is_rejected() {
    let h = slow_postgres(Duration::from_millis(300));

    let first = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let second = h.engine.start_database(postgres_spec("main")).await;
    assert!(matches!(second, Err(DeployerError::TargetBusy(_))));

    // a different target is not affected
    let other = h.engine.start_database(postgres_spec("other")).await.unwrap();

    h.engine.wait(&first).await.unwrap();
    h.engine.wait(&other).await.unwrap();

    let again = h.engine.start_database(postgres_spec("main")).await;
    assert!(again.is_ok());
    h.engine.wait(&again.unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_unserialized_targets_accept_concurrent_starts() {
    let mut settings = test_settings();
    settings.serialize_targets = false;
    settings
        .readiness_delays
        .insert(DatabaseEngine::Postgres, Duration::from_millis(200));
    let h = Harness::with(settings, PortAllocator::new("127.0.0.1", 42000, 42999));

    let first = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let second = h.engine.start_database(postgres_spec("main")).await.unwrap();
    assert_ne!(first, second);

    let first = h.engine.wait(&first).await.unwrap();
    let second = h.engine.wait(&second).await.unwrap();
    assert!(first.status.is_terminal());
    assert!(second.status.is_terminal());
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let h = Harness::new();

    assert!(matches!(
        h.engine.get_task("missing").await,
        Err(DeployerError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.get_logs("missing").await,
        Err(DeployerError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.delete_task("missing").await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_tasks_filters() {
    let h = Harness::new();

    let app = h.engine.start_app(app_spec("web")).await.unwrap();
    let db = h.engine.start_database(postgres_spec("main")).await.unwrap();
    h.engine.wait(&app).await.unwrap();
    h.engine.wait(&db).await.unwrap();

    let all = h.engine.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let apps = h
        .engine
        .list_tasks(&TaskFilter {
            kind: Some(TaskKind::App),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id, app);

    let active = h
        .engine
        .list_tasks(&TaskFilter {
            active: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn test_logs_live_then_persisted() {
    let h = slow_postgres(Duration::from_millis(300));

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let live = h.engine.get_logs(&task_id).await.unwrap();
    assert!(live.contains("Provisioning postgres database main"));
    assert!(h.engine.get_task(&task_id).await.unwrap().logs.is_none());

    let task = h.engine.wait(&task_id).await.unwrap();
    let persisted = task.logs.clone().unwrap();
    assert!(persisted.contains("Provisioning postgres database main"));
    assert!(persisted.contains("ready on"));
    assert_eq!(h.engine.get_logs(&task_id).await.unwrap(), persisted);
}

#[tokio::test]
async fn test_delete_active_task_is_rejected() {
    let h = slow_postgres(Duration::from_millis(300));

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let result = h.engine.delete_task(&task_id).await;
    assert!(matches!(result, Err(DeployerError::InvalidTransition(_))));

    h.engine.wait(&task_id).await.unwrap();
}

#[tokio::test]
async fn test_delete_app_task_removes_resources() {
    let h = Harness::new();

    let task_id = h
        .engine
        .start_app(app_spec_with_domain("web", "app.example.com"))
        .await
        .unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();
    let container_id = task.result_ref.unwrap();

    h.engine.delete_task(&task_id).await.unwrap();

    assert!(h.runtime.container(&container_id).is_none());
    assert!(h.journal.contains("unbind site-app-example-com"));
    assert!(h.registry_app("web").await.is_none());
    assert!(matches!(
        h.engine.get_task(&task_id).await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_superseded_app_task_keeps_current_container() {
    let h = Harness::new();

    let first = h.engine.start_app(app_spec("web")).await.unwrap();
    h.engine.wait(&first).await.unwrap();
    let second = h.engine.start_app(app_spec("web")).await.unwrap();
    let second = h.engine.wait(&second).await.unwrap();
    let current = second.result_ref.unwrap();

    h.engine.delete_task(&first).await.unwrap();

    assert!(h.runtime.container(&current).unwrap().running);
    assert_eq!(h.registry_app("web").await.unwrap().container_id, current);
}

#[tokio::test]
async fn test_delete_database_task_removes_server() {
    let h = Harness::new();

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();
    let server_id = task.result_ref.unwrap();
    let container_id = h.registry_server(&server_id).await.unwrap().container_id;

    h.engine.delete_task(&task_id).await.unwrap();

    assert!(h.registry_server(&server_id).await.is_none());
    assert!(h.runtime.container(&container_id).is_none());
}

#[tokio::test]
async fn test_delete_failed_task_only_removes_record() {
    let h = Harness::new();
    *h.builder.fail_with.lock().unwrap() = Some("broken".to_string());

    let task_id = h.engine.start_app(app_spec("web")).await.unwrap();
    h.engine.wait(&task_id).await.unwrap();
    let calls = h.journal.entries().len();

    h.engine.delete_task(&task_id).await.unwrap();
    assert_eq!(h.journal.entries().len(), calls);
    assert!(h.engine.get_task(&task_id).await.is_err());
}

#[tokio::test]
async fn test_prune_images_keeps_deployed_image() {
    let h = Harness::new();

    let first = h.engine.start_app(app_spec("web")).await.unwrap();
    let first = h.engine.wait(&first).await.unwrap();
    let second = h.engine.start_app(app_spec("web")).await.unwrap();
    let second = h.engine.wait(&second).await.unwrap();

    let removed = h.engine.prune_images().await.unwrap();
    assert_eq!(removed, vec![first.image.unwrap()]);
    assert!(!h.journal.contains(&format!("rmi {}", second.image.unwrap())));

    assert!(h.engine.prune_images().await.unwrap().len() <= 1);
}

#[tokio::test]
async fn test_recover_interrupted_tasks() {
    let h = Harness::new();

    let mut orphan = DeploymentTask::new(
        TaskKind::App,
        "web",
        StepTracker::initial_steps(TaskKind::App),
    );
    orphan.status = TaskStatus::Building;
    orphan.progress = 30;
    orphan.steps[0].status = StepStatus::Completed;
    orphan.steps[1].status = StepStatus::Running;
    let orphan_id = orphan.id.clone();
    h.tasks.insert(orphan).await.unwrap();

    let finished = h.engine.start_app(app_spec("api")).await.unwrap();
    h.engine.wait(&finished).await.unwrap();

    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 1);

    let task = h.engine.get_task(&orphan_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error, "interrupted by daemon restart");
    assert_eq!(task.progress, 30);
    assert_eq!(task.steps[1].status, StepStatus::Failed);
    assert!(task.completed_at.is_some());

    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_skips_running_tasks() {
    let h = slow_postgres(Duration::from_millis(300));

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 0);

    let task = h.engine.wait(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_drain_times_out_then_completes() {
    let h = slow_postgres(Duration::from_millis(400));

    h.engine.start_database(postgres_spec("main")).await.unwrap();
    let result = h.engine.drain(Duration::from_millis(20)).await;
    assert!(matches!(result, Err(DeployerError::ShutdownError(_))));

    h.engine.drain(Duration::from_secs(10)).await.unwrap();
    assert_eq!(h.engine.in_flight(), 0);
}

#[tokio::test]
async fn test_drain_without_tasks() {
    let h = Harness::new();
    h.engine.drain(Duration::from_millis(1)).await.unwrap();
}

#[tokio::test]
async fn test_pipeline_panic_fails_the_task() {
    let h = Harness::new();
    *h.builder.panic.lock().unwrap() = true;

    let task_id = h.engine.start_app(app_spec("web")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.starts_with("engine crashed"), "error: {}", task.error);
    let failed: Vec<&str> = task
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(failed, vec!["build"]);
    assert!(task.logs.unwrap().contains("ERROR: engine crashed"));
    assert!(!h.scm.last_destination().unwrap().exists());

    // the target lock was released
    *h.builder.panic.lock().unwrap() = false;
    let retry = h.engine.start_app(app_spec("web")).await.unwrap();
    let retry = h.engine.wait(&retry).await.unwrap();
    assert_eq!(retry.status, TaskStatus::Success, "error: {}", retry.error);
}

#[tokio::test]
async fn test_panic_after_create_removes_container() {
    let h = Harness::new();
    *h.runtime.panic_on_start.lock().unwrap() = true;

    let task_id = h.engine.start_app(app_spec("web")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.starts_with("engine crashed"), "error: {}", task.error);
    let failed: Vec<&str> = task
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(failed, vec!["deploy"]);

    assert!(h.journal.contains("create app-web"));
    assert!(h.journal.contains("remove container-1 force=true"));
    assert_eq!(h.runtime.count(), 0);
    assert!(h.registry_app("web").await.is_none());
    assert!(!h.scm.last_destination().unwrap().exists());

    *h.runtime.panic_on_start.lock().unwrap() = false;
    let retry = h.engine.start_app(app_spec("web")).await.unwrap();
    let retry = h.engine.wait(&retry).await.unwrap();
    assert_eq!(retry.status, TaskStatus::Success, "error: {}", retry.error);
}
