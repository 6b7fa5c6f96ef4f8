//! Mock collaborators and an engine harness

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::SecretString;
use serde_json::json;

use deployd::deploy::collaborators::{
    BuildEvent, BuildRequest, Checkout, Collaborators, ContainerRuntime, ContainerSpec,
    ContainerState, ImageBuilder, ReverseProxy, SourceControl,
};
use deployd::deploy::engine::{DeploymentEngine, EngineSettings};
use deployd::deploy::log_store::InMemoryLogStore;
use deployd::deploy::ports::PortAllocator;
use deployd::errors::DeployerError;
use deployd::models::resources::{AppRecord, DatabaseServer};
use deployd::models::spec::{AppSpec, DatabaseEngine, DatabaseSpec};
use deployd::models::task::{DeploymentTask, TaskFilter, TaskUpdate};
use deployd::store::{InMemoryRegistry, InMemoryTaskStore, ResourceRegistry, TaskStore};

/// Ordered record of collaborator calls shared by the mocks
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }
}

// ================================ SOURCE CONTROL ================================= //

pub struct MockScm {
    journal: Journal,
    clones: AtomicUsize,
    pub fail_with: Mutex<Option<String>>,
    pub destinations: Mutex<Vec<PathBuf>>,
}

impl MockScm {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            clones: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
            destinations: Mutex::new(Vec::new()),
        }
    }

    pub fn last_destination(&self) -> Option<PathBuf> {
        self.destinations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SourceControl for MockScm {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        _auth_token: Option<&SecretString>,
        dest: &Path,
    ) -> Result<Checkout, DeployerError> {
        self.journal.push(format!("clone {}@{}", url, branch));
        self.destinations.lock().unwrap().push(dest.to_path_buf());

        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(DeployerError::SourceControl(message));
        }

        let n = self.clones.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("Dockerfile"), "FROM scratch\n").await?;
        Ok(Checkout {
            path: dest.to_path_buf(),
            commit_hash: format!("{:07}deadbeefcafe", n),
            commit_message: format!("commit {}", n),
        })
    }
}

// ================================= IMAGE BUILDER ================================= //

pub struct MockBuilder {
    journal: Journal,
    pub fail_with: Mutex<Option<String>>,
    pub panic: Mutex<bool>,
    pub requests: Mutex<Vec<BuildRequest>>,
    /// Whether the build context existed when the build started
    pub context_existed: Mutex<Vec<bool>>,
}

impl MockBuilder {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_with: Mutex::new(None),
            panic: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
            context_existed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
    async fn build(
        &self,
        request: &BuildRequest,
    ) -> Result<BoxStream<'static, BuildEvent>, DeployerError> {
        self.journal.push(format!("build {}", request.tag));
        if *self.panic.lock().unwrap() {
            panic!("builder exploded");
        }
        self.requests.lock().unwrap().push(request.clone());
        self.context_existed
            .lock()
            .unwrap()
            .push(request.context.join(&request.dockerfile).exists());

        let mut events = vec![
            BuildEvent::Log("Step 1/2 : FROM scratch".to_string()),
            BuildEvent::Log("Step 2/2 : COPY . .".to_string()),
        ];
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            events.push(BuildEvent::Error(message));
            events.push(BuildEvent::Log("never reached".to_string()));
        }
        Ok(stream::iter(events).boxed())
    }
}

// =============================== CONTAINER RUNTIME =============================== //

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub spec: ContainerSpec,
    pub running: bool,
}

pub struct MockRuntime {
    journal: Journal,
    next_id: AtomicUsize,
    pub containers: Mutex<HashMap<String, MockContainer>>,
    pub removed_images: Mutex<Vec<String>>,
    pub fail_pull: Mutex<bool>,
    pub fail_create: Mutex<bool>,
    pub fail_start: Mutex<bool>,
    pub panic_on_start: Mutex<bool>,
    /// Containers stop running right after they start
    pub exit_after_start: Mutex<bool>,
}

impl MockRuntime {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            next_id: AtomicUsize::new(0),
            containers: Mutex::new(HashMap::new()),
            removed_images: Mutex::new(Vec::new()),
            fail_pull: Mutex::new(false),
            fail_create: Mutex::new(false),
            fail_start: Mutex::new(false),
            panic_on_start: Mutex::new(false),
            exit_after_start: Mutex::new(false),
        }
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    /// Add a container that was not created by the engine
    pub fn seed(&self, id: &str, spec: ContainerSpec) {
        self.containers.lock().unwrap().insert(
            id.to_string(),
            MockContainer {
                spec,
                running: true,
            },
        );
    }

    fn missing(id: &str) -> DeployerError {
        DeployerError::Container(format!("No such container: {}", id))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("pull {}", image));
        if *self.fail_pull.lock().unwrap() {
            return Err(DeployerError::Container(format!(
                "manifest for {} not found",
                image
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, DeployerError> {
        self.journal.push(format!("create {}", spec.name));
        if *self.fail_create.lock().unwrap() {
            return Err(DeployerError::Container("create failed".to_string()));
        }

        let mut containers = self.containers.lock().unwrap();
        if containers.values().any(|c| c.spec.name == spec.name) {
            return Err(DeployerError::Container(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let id = format!("container-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("start {}", container_id));
        if *self.panic_on_start.lock().unwrap() {
            panic!("runtime exploded");
        }
        if *self.fail_start.lock().unwrap() {
            return Err(DeployerError::Container("port is already allocated".to_string()));
        }
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| Self::missing(container_id))?;
        container.running = !*self.exit_after_start.lock().unwrap();
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("stop {}", container_id));
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| Self::missing(container_id))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<(), DeployerError> {
        self.journal
            .push(format!("remove {} force={}", container_id, force));
        let mut containers = self.containers.lock().unwrap();
        match containers.get(container_id) {
            Some(c) if c.running && !force => Err(DeployerError::Container(
                "cannot remove a running container".to_string(),
            )),
            Some(_) => {
                containers.remove(container_id);
                Ok(())
            }
            None => Err(Self::missing(container_id)),
        }
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, DeployerError> {
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(container_id)
            .ok_or_else(|| Self::missing(container_id))?;
        Ok(ContainerState {
            status: if container.running { "running" } else { "exited" }.to_string(),
            running: container.running,
        })
    }

    async fn remove_image(&self, image: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("rmi {}", image));
        self.removed_images.lock().unwrap().push(image.to_string());
        Ok(())
    }
}

// ================================= REVERSE PROXY ================================= //

pub struct MockProxy {
    journal: Journal,
    pub fail: Mutex<bool>,
}

impl MockProxy {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: Mutex::new(false),
        }
    }

    fn check(&self) -> Result<(), DeployerError> {
        if *self.fail.lock().unwrap() {
            return Err(DeployerError::Proxy("admin API unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReverseProxy for MockProxy {
    async fn bind(&self, domain: &str, upstream: &str) -> Result<String, DeployerError> {
        self.journal.push(format!("bind {} {}", domain, upstream));
        self.check()?;
        Ok(format!("site-{}", domain.replace('.', "-")))
    }

    async fn update(&self, site_id: &str, upstream: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("update {} {}", site_id, upstream));
        self.check()
    }

    async fn unbind(&self, site_id: &str) -> Result<(), DeployerError> {
        self.journal.push(format!("unbind {}", site_id));
        self.check()
    }
}

// ================================ RECORDING STORE ================================ //

/// Task store that keeps every record state it produced
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryTaskStore,
    history: Mutex<Vec<DeploymentTask>>,
}

impl RecordingStore {
    pub fn history(&self, task_id: &str) -> Vec<DeploymentTask> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn insert(&self, task: DeploymentTask) -> Result<(), DeployerError> {
        self.history.lock().unwrap().push(task.clone());
        self.inner.insert(task).await
    }

    async fn get(&self, task_id: &str) -> Result<Option<DeploymentTask>, DeployerError> {
        self.inner.get(task_id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<DeploymentTask>, DeployerError> {
        self.inner.list(filter).await
    }

    async fn apply(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<DeploymentTask, DeployerError> {
        let task = self.inner.apply(task_id, update).await?;
        self.history.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn delete(&self, task_id: &str) -> Result<bool, DeployerError> {
        self.inner.delete(task_id).await
    }
}

// ==================================== HARNESS ==================================== //

pub struct Harness {
    pub engine: DeploymentEngine,
    pub journal: Journal,
    pub scm: Arc<MockScm>,
    pub builder: Arc<MockBuilder>,
    pub runtime: Arc<MockRuntime>,
    pub proxy: Arc<MockProxy>,
    pub tasks: Arc<RecordingStore>,
    pub registry: Arc<InMemoryRegistry>,
    pub settings: EngineSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_settings(), PortAllocator::new("127.0.0.1", 42000, 42999))
    }

    pub fn with(settings: EngineSettings, ports: PortAllocator) -> Self {
        let journal = Journal::default();
        let scm = Arc::new(MockScm::new(journal.clone()));
        let builder = Arc::new(MockBuilder::new(journal.clone()));
        let runtime = Arc::new(MockRuntime::new(journal.clone()));
        let proxy = Arc::new(MockProxy::new(journal.clone()));
        let tasks = Arc::new(RecordingStore::default());
        let registry = Arc::new(InMemoryRegistry::new());

        let engine = DeploymentEngine::new(
            Collaborators {
                scm: scm.clone(),
                builder: builder.clone(),
                runtime: runtime.clone(),
                proxy: proxy.clone(),
            },
            tasks.clone(),
            registry.clone(),
            Arc::new(InMemoryLogStore::new()),
            ports,
            settings.clone(),
        );

        Self {
            engine,
            journal,
            scm,
            builder,
            runtime,
            proxy,
            tasks,
            registry,
            settings,
        }
    }

    pub async fn registry_app(&self, name: &str) -> Option<AppRecord> {
        self.registry.get_app(name).await.unwrap()
    }

    pub async fn registry_server(&self, server_id: &str) -> Option<DatabaseServer> {
        self.registry.get_server(server_id).await.unwrap()
    }
}

/// Engine settings with short readiness waits and a private checkout root
pub fn test_settings() -> EngineSettings {
    let mut readiness_delays = HashMap::new();
    for engine in [
        DatabaseEngine::Mysql,
        DatabaseEngine::Mariadb,
        DatabaseEngine::Postgres,
        DatabaseEngine::Redis,
        DatabaseEngine::Mongodb,
    ] {
        readiness_delays.insert(engine, Duration::from_millis(20));
    }
    EngineSettings {
        serialize_targets: true,
        checkout_root: std::env::temp_dir()
            .join(format!("deployd-test-{}", uuid::Uuid::new_v4())),
        publish_host: "127.0.0.1".to_string(),
        upstream_host: "127.0.0.1".to_string(),
        readiness_delays,
        readiness_ticks: 4,
    }
}

pub fn app_spec(name: &str) -> AppSpec {
    serde_json::from_value(json!({
        "name": name,
        "repo_url": "https://example.com/a.git",
        "branch": "main",
        "dockerfile": "Dockerfile",
        "container_port": 3000,
    }))
    .unwrap()
}

pub fn app_spec_with_domain(name: &str, domain: &str) -> AppSpec {
    serde_json::from_value(json!({
        "name": name,
        "repo_url": "https://example.com/a.git",
        "container_port": 3000,
        "domain": domain,
    }))
    .unwrap()
}

pub fn postgres_spec(name: &str) -> DatabaseSpec {
    serde_json::from_value(json!({
        "name": name,
        "engine": "postgres",
        "version": "16",
        "root_password": "s3cret",
    }))
    .unwrap()
}

pub fn redis_spec(name: &str) -> DatabaseSpec {
    serde_json::from_value(json!({
        "name": name,
        "engine": "redis",
    }))
    .unwrap()
}
