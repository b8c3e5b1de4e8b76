//! Container runtime, sidecar, redis and repository settings.

use serde::{Deserialize, Serialize};

/// Container runtime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerSettings {
    /// Network every managed container joins; also the proxy's backend network.
    pub network: String,
    /// Image used for editor containers.
    pub editor_image: String,
    /// Subnet routed through `route_gateway` inside each container.
    pub route_subnet: String,
    /// Gateway for `route_subnet`. Empty disables host routing.
    pub route_gateway: String,
    /// Grace period before a stopped container is killed.
    pub stop_timeout_secs: i64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            network: "apps-network".to_string(),
            editor_image: "editor-container:latest".to_string(),
            route_subnet: "192.168.200.0/24".to_string(),
            route_gateway: "10.20.22.1".to_string(),
            stop_timeout_secs: 10,
        }
    }
}

/// In-container process manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SidecarSettings {
    /// Port the process manager listens on inside the container.
    pub port: u16,
    /// Readiness probe attempt budget.
    pub ready_attempts: u32,
    /// Readiness probe delay cap in ms.
    pub ready_max_delay_ms: u64,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            ready_attempts: 15,
            ready_max_delay_ms: 5000,
        }
    }
}

/// Control-plane key/value store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSettings {
    /// Connection URL.
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://redis-broker:6379".to_string(),
        }
    }
}

/// Repository storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositorySettings {
    /// Root directory; repositories live at `{root}/{owner}/{id}`.
    pub root: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            root: "/var/lib/workbench/repos".to_string(),
        }
    }
}
