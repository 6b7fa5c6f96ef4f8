//! Git source control client

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::deploy::collaborators::{Checkout, SourceControl};
use crate::errors::DeployerError;

/// Source control client backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, DeployerError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                DeployerError::SourceControl(format!(
                    "git {} timed out after {:?}",
                    args.first().unwrap_or(&""),
                    self.timeout
                ))
            })?
            .map_err(|e| DeployerError::SourceControl(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployerError::SourceControl(format!(
                "git {} failed ({}): {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        auth_token: Option<&SecretString>,
        dest: &Path,
    ) -> Result<Checkout, DeployerError> {
        info!("Cloning {} (branch: {}) to {}", url, branch, dest.display());

        let clone_url = authenticated_url(url, auth_token)?;
        let dest_str = dest.to_string_lossy();
        let cloned = self
            .git(
                None,
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    branch,
                    clone_url.as_str(),
                    &*dest_str,
                ],
            )
            .await;

        if let Err(e) = cloned {
            let _ = tokio::fs::remove_dir_all(dest).await;
            let message = match e {
                DeployerError::SourceControl(message) => message,
                other => other.to_string(),
            };
            let message = match auth_token {
                Some(token) => redact(&message, token.expose_secret()),
                None => message,
            };
            return Err(DeployerError::SourceControl(message));
        }

        let commit_hash = self.git(Some(dest), &["rev-parse", "HEAD"]).await?;
        let commit_message = self
            .git(Some(dest), &["log", "-1", "--pretty=%s"])
            .await?;
        debug!("Checked out {} at {}", url, commit_hash);

        Ok(Checkout {
            path: dest.to_path_buf(),
            commit_hash,
            commit_message,
        })
    }
}

/// Inject a token into the userinfo of an http(s) remote
pub fn authenticated_url(
    url: &str,
    auth_token: Option<&SecretString>,
) -> Result<String, DeployerError> {
    let token = match auth_token {
        Some(token) if !token.expose_secret().is_empty() => token,
        _ => return Ok(url.to_string()),
    };
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Ok(url.to_string());
    }

    let mut parsed = Url::parse(url)?;
    let invalid = |_| DeployerError::Validation(format!("cannot add credentials to {}", url));
    if parsed.username().is_empty() {
        parsed.set_username("oauth2").map_err(invalid)?;
    }
    parsed
        .set_password(Some(token.expose_secret()))
        .map_err(invalid)?;
    Ok(parsed.to_string())
}

/// Mask `secret` in `message`, both raw and in the percent-encoded form it
/// takes inside a remote URL
fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        return message.to_string();
    }
    let mut redacted = message.replace(secret, "***");
    if let Some(encoded) = encoded_password(secret) {
        if encoded != secret {
            redacted = redacted.replace(&encoded, "***");
        }
    }
    redacted
}

fn encoded_password(secret: &str) -> Option<String> {
    let mut url = Url::parse("https://oauth2@localhost").ok()?;
    url.set_password(Some(secret)).ok()?;
    url.password().map(str::to_string)
}
