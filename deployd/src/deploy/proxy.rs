//! Reverse-proxy configurators

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::deploy::collaborators::ReverseProxy;
use crate::errors::DeployerError;

/// Configures sites through the Caddy admin API
#[derive(Debug, Clone)]
pub struct CaddyProxy {
    client: reqwest::Client,
    admin_url: String,
    server_name: String,
}

impl CaddyProxy {
    pub fn new(admin_url: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_url: admin_url.into().trim_end_matches('/').to_string(),
            server_name: server_name.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<(), DeployerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeployerError::Proxy(format!(
            "admin API returned {}: {}",
            status,
            body.trim()
        )))
    }
}

/// Stable site ID derived from the domain
pub fn site_id_for(domain: &str) -> String {
    let slug: String = domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("site-{}", slug)
}

#[async_trait]
impl ReverseProxy for CaddyProxy {
    async fn bind(&self, domain: &str, upstream: &str) -> Result<String, DeployerError> {
        let site_id = site_id_for(domain);
        info!("Binding {} to {} ({})", domain, upstream, site_id);

        let route = json!({
            "@id": site_id,
            "match": [{ "host": [domain] }],
            "handle": [{
                "handler": "reverse_proxy",
                "upstreams": [{ "dial": upstream }],
            }],
        });
        let url = format!(
            "{}/config/apps/http/servers/{}/routes",
            self.admin_url, self.server_name
        );
        let response = self.client.post(url).json(&route).send().await?;
        Self::check(response).await?;
        Ok(site_id)
    }

    async fn update(&self, site_id: &str, upstream: &str) -> Result<(), DeployerError> {
        info!("Pointing {} at {}", site_id, upstream);
        let url = format!("{}/id/{}/handle/0/upstreams", self.admin_url, site_id);
        let response = self
            .client
            .patch(url)
            .json(&json!([{ "dial": upstream }]))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn unbind(&self, site_id: &str) -> Result<(), DeployerError> {
        let url = format!("{}/id/{}", self.admin_url, site_id);
        let response = self.client.delete(url).send().await?;
        Self::check(response).await
    }
}

/// Used when no reverse proxy is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledProxy;

#[async_trait]
impl ReverseProxy for DisabledProxy {
    async fn bind(&self, domain: &str, _upstream: &str) -> Result<String, DeployerError> {
        Err(DeployerError::Proxy(format!(
            "no reverse proxy configured, cannot bind {}",
            domain
        )))
    }

    async fn update(&self, site_id: &str, _upstream: &str) -> Result<(), DeployerError> {
        Err(DeployerError::Proxy(format!(
            "no reverse proxy configured, cannot update {}",
            site_id
        )))
    }

    async fn unbind(&self, site_id: &str) -> Result<(), DeployerError> {
        Err(DeployerError::Proxy(format!(
            "no reverse proxy configured, cannot unbind {}",
            site_id
        )))
    }
}
