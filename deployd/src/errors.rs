//! Error types for the deployment daemon

use thiserror::Error;

/// Main error type for the deployment daemon
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Target busy: {0}")]
    TargetBusy(String),

    #[error("No free port in range [{start}, {end})")]
    NoFreePort { start: u16, end: u16 },

    #[error("Source control error: {0}")]
    SourceControl(String),

    #[error("Image build error: {0}")]
    Build(String),

    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("Reverse proxy error: {0}")]
    Proxy(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Errors raised before a task record exists
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeployerError::Validation(_) | DeployerError::TargetBusy(_)
        )
    }
}
