//! Reverse-proxy settings.

use serde::{Deserialize, Serialize};

/// Reverse-proxy registration and forward-auth settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    /// Public hostname pattern. `{hash}` is replaced by the service hash.
    pub host_template: String,
    /// Scheme of the public URL.
    pub scheme: String,
    /// Base URL of the proxy's HTTP API used for UP polling.
    pub traefik_api_url: String,
    /// Middleware chain attached to every router.
    pub middlewares: String,
    /// UP polling attempt budget.
    pub up_attempts: u32,
    /// UP polling delay cap in ms.
    pub up_max_delay_ms: u64,
    /// Wait after the backend reports UP before handing out the URL.
    pub settle_ms: u64,
    /// Salt mixed into every proxy hash. Empty means random per process.
    pub hash_salt: String,
    /// Forward-auth cache entry lifetime.
    pub auth_cache_ttl_secs: u64,
    /// First auto-proxied port (inclusive).
    pub port_range_start: u16,
    /// End of the auto-proxied band (exclusive).
    pub port_range_end: u16,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host_template: "{hash}.app.localhost".to_string(),
            scheme: "http".to_string(),
            traefik_api_url: "http://traefik:8080".to_string(),
            middlewares: "apps-middleware@file, proxy-auth@file".to_string(),
            up_attempts: 7,
            up_max_delay_ms: 5000,
            settle_ms: 2000,
            hash_salt: String::new(),
            auth_cache_ttl_secs: 7200,
            port_range_start: 8000,
            port_range_end: 9000,
        }
    }
}

impl ProxySettings {
    /// Whether `port` falls in the auto-proxied band.
    pub fn watches_port(&self, port: u16) -> bool {
        (self.port_range_start..self.port_range_end).contains(&port)
    }
}
