//! Database provisioning pipeline tests

use serde_json::json;

use deployd::models::spec::{DatabaseEngine, DatabaseSpec};
use deployd::models::task::{StepStatus, TaskStatus};

use crate::support::{postgres_spec, redis_spec, Harness};

#[tokio::test]
async fn test_postgres_provisioning() {
    let h = Harness::new();

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "error: {}", task.error);
    assert_eq!(task.progress, 100);
    assert!(task.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(task.image.as_deref(), Some("postgres:16"));
    assert!(h.journal.contains("pull postgres:16"));

    let server_id = task.result_ref.clone().unwrap();
    let server = h.registry_server(&server_id).await.unwrap();
    assert_eq!(server.engine, DatabaseEngine::Postgres);
    assert_eq!(server.username, "postgres");
    assert_eq!(server.host, "127.0.0.1");
    assert!((42000..=42999).contains(&server.port));

    let container = h.runtime.container(&server.container_id).unwrap();
    assert!(container.running);
    assert_eq!(container.spec.name, "db-main");
    assert_eq!(
        container.spec.env.get("POSTGRES_PASSWORD").map(String::as_str),
        Some("s3cret")
    );
    assert_eq!(
        container.spec.volumes,
        vec!["db-main-data:/var/lib/postgresql/data".to_string()]
    );
    assert!(container.spec.command.is_empty());
    assert_eq!(container.spec.ports[0].container_port, 5432);
    assert_eq!(container.spec.ports[0].host_port, server.port);
}

#[tokio::test]
async fn test_readiness_wait_reports_sub_progress() {
    let h = Harness::new();

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    h.engine.wait(&task_id).await.unwrap();

    let waiting: Vec<u8> = h
        .tasks
        .history(&task_id)
        .iter()
        .filter(|t| t.status == TaskStatus::Waiting)
        .map(|t| t.progress)
        .collect();
    assert!(waiting.iter().any(|p| *p > 55 && *p < 90), "{:?}", waiting);
    assert!(waiting.iter().all(|p| *p >= 55 && *p <= 90));
}

#[tokio::test]
async fn test_password_is_not_persisted() {
    let h = Harness::new();

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    let record = serde_json::to_string(&task).unwrap();
    assert!(!record.contains("s3cret"));
    let server = h.registry_server(task.result_ref.as_ref().unwrap()).await.unwrap();
    assert!(!serde_json::to_string(&server).unwrap().contains("s3cret"));
}

#[tokio::test]
async fn test_redis_without_password() {
    let h = Harness::new();

    let task_id = h.engine.start_database(redis_spec("cache")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "error: {}", task.error);
    let server = h.registry_server(task.result_ref.as_ref().unwrap()).await.unwrap();
    assert_eq!(server.username, "default");

    let container = h.runtime.container(&server.container_id).unwrap();
    assert!(container.spec.env.is_empty());
    assert!(container.spec.command.is_empty());
    assert_eq!(container.spec.image, "redis:latest");
}

#[tokio::test]
async fn test_missing_password_is_rejected() {
    let h = Harness::new();
    let spec: DatabaseSpec = serde_json::from_value(json!({
        "name": "main",
        "engine": "mysql",
    }))
    .unwrap();

    let result = h.engine.start_database(spec).await;
    assert!(result.unwrap_err().is_validation());
    assert!(h.engine.list_tasks(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fixed_host_port() {
    let h = Harness::new();
    let spec: DatabaseSpec = serde_json::from_value(json!({
        "name": "main",
        "engine": "mariadb",
        "root_password": "pw",
        "host_port": 13306,
    }))
    .unwrap();

    let task_id = h.engine.start_database(spec).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "error: {}", task.error);
    let server = h.registry_server(task.result_ref.as_ref().unwrap()).await.unwrap();
    assert_eq!(server.port, 13306);
    let container = h.runtime.container(&server.container_id).unwrap();
    assert_eq!(container.spec.ports[0].container_port, 3306);
    assert_eq!(
        container.spec.env.get("MARIADB_ROOT_PASSWORD").map(String::as_str),
        Some("pw")
    );
}

#[tokio::test]
async fn test_container_exits_during_readiness_wait() {
    let h = Harness::new();
    *h.runtime.exit_after_start.lock().unwrap() = true;

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.contains("exited"), "error: {}", task.error);
    let failed: Vec<&str> = task
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(failed, vec!["verify"]);
    assert!(task.result_ref.is_none());
    assert_eq!(h.runtime.count(), 0);
    assert!(h.journal.contains("remove container-1 force=true"));
}

#[tokio::test]
async fn test_pull_failure() {
    let h = Harness::new();
    *h.runtime.fail_pull.lock().unwrap() = true;

    let task_id = h.engine.start_database(postgres_spec("main")).await.unwrap();
    let task = h.engine.wait(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.contains("manifest for postgres:16 not found"));
    assert!(task.progress < 30);
    assert!(!h.journal.contains("create"));
    assert!(task.logs.unwrap().contains("ERROR:"));
}
