//! Routing key registration and backend UP polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use wb_core::retry::{BackoffPolicy, retry_async};
use wb_settings::ProxySettings;

use crate::errors::{ProxyError, Result};
use crate::store::KeyValueStore;
use crate::template::HostTemplate;

/// Provider suffix of services defined through the key/value store.
const PROVIDER: &str = "redis";

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    #[serde(rename = "serverStatus", default)]
    server_status: BTreeMap<String, String>,
}

/// Publishes container ports through the reverse proxy.
pub struct ProxyRegistrar {
    store: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
    api_url: String,
    template: HostTemplate,
    scheme: String,
    middlewares: String,
    up_policy: BackoffPolicy,
    settle: Duration,
}

impl ProxyRegistrar {
    /// Registrar writing to `store` and polling the proxy API from settings.
    pub fn from_settings(store: Arc<dyn KeyValueStore>, settings: &ProxySettings) -> Result<Self> {
        Ok(Self {
            store,
            http: reqwest::Client::new(),
            api_url: settings.traefik_api_url.trim_end_matches('/').to_string(),
            template: HostTemplate::new(&settings.host_template)?,
            scheme: settings.scheme.clone(),
            middlewares: settings.middlewares.clone(),
            up_policy: BackoffPolicy::new(settings.up_attempts, settings.up_max_delay_ms),
            settle: Duration::from_millis(settings.settle_ms),
        })
    }

    /// Public URL for service `name`.
    pub fn url_for(&self, name: &str) -> String {
        format!("{}://{}", self.scheme, self.template.render(name))
    }

    /// Hostname template in use.
    pub fn template(&self) -> &HostTemplate {
        &self.template
    }

    fn service_entries(&self, name: &str, ip: &str, port: u16) -> Vec<(String, String)> {
        vec![
            (
                format!("traefik/http/services/{name}/loadbalancer/servers/0/url"),
                format!("http://{ip}:{port}"),
            ),
            (
                format!("traefik/http/routers/{name}/rule"),
                format!("Host(`{}`)", self.template.render(name)),
            ),
            (format!("traefik/http/routers/{name}/service"), name.to_string()),
            (format!("traefik/http/routers/{name}/middlewares"), self.middlewares.clone()),
        ]
    }

    fn service_keys(name: &str) -> Vec<String> {
        vec![
            format!("traefik/http/services/{name}/loadbalancer/servers/0/url"),
            format!("traefik/http/routers/{name}/rule"),
            format!("traefik/http/routers/{name}/service"),
            format!("traefik/http/routers/{name}/middlewares"),
        ]
    }

    /// Route `name` to `ip:port` and wait for the proxy to report it UP.
    ///
    /// Returns the public URL, or `None` when the backend never came up.
    #[instrument(skip(self), fields(service = %name))]
    pub async fn new_service(&self, name: &str, ip: &str, port: u16) -> Result<Option<String>> {
        info!(endpoint = %format!("{ip}:{port}"), "proxying new service");
        self.store.set_many(&self.service_entries(name, ip, port)).await?;
        counter!("proxy_registrations_total").increment(1);

        if self.wait_up(name).await {
            Ok(Some(self.url_for(name)))
        } else {
            warn!("service never reported UP");
            Ok(None)
        }
    }

    /// Delete the routing keys of `name`. Idempotent.
    #[instrument(skip(self), fields(service = %name))]
    pub async fn remove_service(&self, name: &str) -> Result<()> {
        let removed = self.store.delete(&Self::service_keys(name)).await?;
        debug!(removed, "removed proxy keys");
        Ok(())
    }

    /// Poll until every server of `name` is UP, then wait the settle delay.
    pub async fn wait_up(&self, name: &str) -> bool {
        let service = format!("{name}@{PROVIDER}");
        let result = retry_async(&self.up_policy, ProxyError::is_transient, || self.check_up(&service)).await;
        match result {
            Ok(()) => {
                tokio::time::sleep(self.settle).await;
                true
            }
            Err(e) => {
                debug!(service, error = %e, "service not up");
                false
            }
        }
    }

    async fn check_up(&self, service: &str) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/api/http/services/{service}", self.api_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ProxyError::NotUp {
                status: resp.status().as_u16(),
            });
        }
        let status: ServiceStatus = resp.json().await?;
        if status.server_status.values().all(|s| s == "UP") {
            Ok(())
        } else {
            Err(ProxyError::Starting)
        }
    }
}
