//! Records of resources produced by successful tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::spec::DatabaseEngine;

/// The container currently serving a deployed app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    pub container_id: String,
    pub image: String,
    pub host_port: u16,

    /// Domain the site routes, if any
    #[serde(default)]
    pub domain: Option<String>,

    /// Reverse-proxy site bound to the app, if any
    #[serde(default)]
    pub site_id: Option<String>,

    /// Task that produced the current container
    pub task_id: String,

    pub deployed_at: DateTime<Utc>,
}

/// Connection record of a provisioned database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseServer {
    pub id: String,
    pub name: String,
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
}
