//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Every struct is `#[serde(default)]`
//! so a partial JSON file only needs the keys it changes.

mod infra;
mod proxy;
mod server;

pub use infra::*;
pub use proxy::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the workbench orchestrator.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "proxy": { "hostTemplate": "{hash}.apps.example.org" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkbenchSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
    /// Container runtime settings.
    pub docker: DockerSettings,
    /// In-container process manager.
    pub sidecar: SidecarSettings,
    /// Reverse-proxy registration and forward-auth.
    pub proxy: ProxySettings,
    /// Control-plane key/value store.
    pub redis: RedisSettings,
    /// Repository storage.
    pub repositories: RepositorySettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(WorkbenchSettings::default()).unwrap();
        assert!(json["server"]["maxMessageSize"].is_number());
        assert!(json["docker"]["editorImage"].is_string());
        assert!(json["proxy"]["authCacheTtlSecs"].is_number());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: WorkbenchSettings =
            serde_json::from_str(r#"{"sidecar": {"port": 3100}}"#).unwrap();
        assert_eq!(settings.sidecar.port, 3100);
        assert_eq!(settings.sidecar.ready_attempts, 15);
        assert_eq!(settings.server, ServerSettings::default());
    }
}
