//! Deployment request models

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Request to deploy an application from a Git repository
#[derive(Debug, Deserialize)]
pub struct AppSpec {
    /// App identity, also used for container and image names
    pub name: String,

    pub repo_url: String,

    #[serde(default)]
    pub branch: Option<String>,

    /// Token injected into the clone URL for private repositories
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub auth_token: Option<SecretString>,

    /// Dockerfile path relative to the repository root
    #[serde(default)]
    pub dockerfile: Option<String>,

    /// Port the application listens on inside the container
    pub container_port: u16,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl AppSpec {
    /// Check required fields and fill in defaults
    pub fn validate(mut self) -> Result<Self, DeployerError> {
        validate_name(&self.name)?;

        let repo_url = self.repo_url.trim();
        let known_scheme = ["https://", "http://", "ssh://", "git@"]
            .iter()
            .any(|prefix| repo_url.starts_with(prefix));
        if !known_scheme {
            return Err(DeployerError::Validation(format!(
                "unsupported repository URL: {:?}",
                self.repo_url
            )));
        }
        self.repo_url = repo_url.to_string();

        if self.container_port == 0 {
            return Err(DeployerError::Validation(
                "container_port must be greater than zero".to_string(),
            ));
        }

        self.branch = Some(non_empty_or(self.branch.take(), "main"));
        let dockerfile = non_empty_or(self.dockerfile.take(), "Dockerfile");
        let escapes = std::path::Path::new(&dockerfile)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir));
        if escapes {
            return Err(DeployerError::Validation(format!(
                "dockerfile {:?} must be a relative path inside the repository",
                dockerfile
            )));
        }
        self.dockerfile = Some(dockerfile);
        self.domain = self
            .domain
            .take()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty());
        Ok(self)
    }

    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or("main")
    }

    pub fn dockerfile(&self) -> &str {
        self.dockerfile.as_deref().unwrap_or("Dockerfile")
    }

    pub fn container_name(&self) -> String {
        format!("app-{}", self.name)
    }
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Mariadb,
    Postgres,
    Redis,
    Mongodb,
}

impl DatabaseEngine {
    pub fn image(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Mariadb => "mariadb",
            DatabaseEngine::Postgres => "postgres",
            DatabaseEngine::Redis => "redis",
            DatabaseEngine::Mongodb => "mongo",
        }
    }

    pub fn internal_port(&self) -> u16 {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => 3306,
            DatabaseEngine::Postgres => 5432,
            DatabaseEngine::Redis => 6379,
            DatabaseEngine::Mongodb => 27017,
        }
    }

    pub fn data_dir(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => "/var/lib/mysql",
            DatabaseEngine::Postgres => "/var/lib/postgresql/data",
            DatabaseEngine::Redis => "/data",
            DatabaseEngine::Mongodb => "/data/db",
        }
    }

    pub fn default_username(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgres => "postgres",
            DatabaseEngine::Redis => "default",
            _ => "root",
        }
    }

    pub fn requires_password(&self) -> bool {
        !matches!(self, DatabaseEngine::Redis)
    }

    /// Time the engine typically needs before accepting connections
    pub fn readiness_delay(&self) -> Duration {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => Duration::from_secs(15),
            DatabaseEngine::Postgres => Duration::from_secs(5),
            DatabaseEngine::Mongodb => Duration::from_secs(10),
            DatabaseEngine::Redis => Duration::from_secs(2),
        }
    }

    /// Container environment carrying the root credentials
    pub fn credential_env(&self, password: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        match self {
            DatabaseEngine::Mysql => {
                env.insert("MYSQL_ROOT_PASSWORD".to_string(), password.to_string());
            }
            DatabaseEngine::Mariadb => {
                env.insert("MARIADB_ROOT_PASSWORD".to_string(), password.to_string());
            }
            DatabaseEngine::Postgres => {
                env.insert("POSTGRES_PASSWORD".to_string(), password.to_string());
            }
            DatabaseEngine::Mongodb => {
                env.insert("MONGO_INITDB_ROOT_USERNAME".to_string(), "root".to_string());
                env.insert("MONGO_INITDB_ROOT_PASSWORD".to_string(), password.to_string());
            }
            DatabaseEngine::Redis => {}
        }
        env
    }

    /// Extra container arguments, used by redis to require a password
    pub fn command(&self, password: &str) -> Vec<String> {
        match self {
            DatabaseEngine::Redis if !password.is_empty() => vec![
                "redis-server".to_string(),
                "--requirepass".to_string(),
                password.to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Mariadb => "mariadb",
            DatabaseEngine::Postgres => "postgres",
            DatabaseEngine::Redis => "redis",
            DatabaseEngine::Mongodb => "mongodb",
        };
        write!(f, "{}", name)
    }
}

/// Request to provision a local database engine
#[derive(Debug, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,

    pub engine: DatabaseEngine,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub root_password: Option<SecretString>,

    /// Fixed host port, allocated from the port range when absent
    #[serde(default)]
    pub host_port: Option<u16>,
}

impl DatabaseSpec {
    /// Check required fields and fill in defaults
    pub fn validate(mut self) -> Result<Self, DeployerError> {
        use secrecy::ExposeSecret;

        validate_name(&self.name)?;

        let has_password = self
            .root_password
            .as_ref()
            .is_some_and(|p| !p.expose_secret().is_empty());
        if self.engine.requires_password() && !has_password {
            return Err(DeployerError::Validation(format!(
                "root_password is required for {}",
                self.engine
            )));
        }
        if self.host_port == Some(0) {
            return Err(DeployerError::Validation(
                "host_port must be greater than zero".to_string(),
            ));
        }

        self.version = Some(non_empty_or(self.version.take(), "latest"));
        Ok(self)
    }

    pub fn image(&self) -> String {
        format!(
            "{}:{}",
            self.engine.image(),
            self.version.as_deref().unwrap_or("latest")
        )
    }

    pub fn container_name(&self) -> String {
        format!("db-{}", self.name)
    }

    pub fn volume_name(&self) -> String {
        format!("{}-data", self.container_name())
    }
}

fn validate_name(name: &str) -> Result<(), DeployerError> {
    if name.is_empty() || name.len() > 63 {
        return Err(DeployerError::Validation(
            "name must be between 1 and 63 characters".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid || name.starts_with('-') {
        return Err(DeployerError::Validation(format!(
            "name {:?} may only contain lowercase letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|v| SecretString::new(v.into_boxed_str())))
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
