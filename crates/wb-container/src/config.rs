//! Container launch description and its content hash.
//!
//! The serialized shape follows the engine's create-container body
//! (`Image`, `HostConfig.Binds`, `NetworkingConfig.EndpointsConfig`, ...).
//! [`ContainerConfig::hash`] digests a canonical JSON rendering with sorted
//! keys, so two configs hash equal exactly when their contents are equal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Bind mount access mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Read only.
    Ro,
    /// Read write.
    Rw,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ro => "ro",
            Self::Rw => "rw",
        })
    }
}

/// Host-side options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostSpec {
    /// Network the container joins at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    /// `local:container:mode` bind mounts, in insertion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
}

/// Per-network endpoint options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSpec {
    /// DNS aliases on that network.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Network attachments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkingSpec {
    /// Endpoint options keyed by network name.
    #[serde(default)]
    pub endpoints_config: BTreeMap<String, EndpointSpec>,
}

/// Everything needed to create a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// Image reference.
    pub image: String,
    /// Container hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Initial working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// `KEY=VALUE` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Container labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// User the entrypoint runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Entrypoint override; empty clears the image's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// Allocate a terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<bool>,
    /// Host-side options.
    #[serde(default)]
    pub host_config: HostSpec,
    /// Network attachments.
    #[serde(default)]
    pub networking_config: NetworkingSpec,
}

impl ContainerConfig {
    /// Config for `image` with nothing else set.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Set the hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run as `user`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Override the entrypoint.
    #[must_use]
    pub fn entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    /// Override the command.
    #[must_use]
    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Allocate a terminal.
    #[must_use]
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = Some(tty);
        self
    }

    /// Join `network` at creation, reachable under `aliases`.
    #[must_use]
    pub fn network(mut self, network: impl Into<String>, aliases: Vec<String>) -> Self {
        let network = network.into();
        self.host_config.network_mode = Some(network.clone());
        let _ = self
            .networking_config
            .endpoints_config
            .insert(network, EndpointSpec { aliases });
        self
    }

    /// Add or replace a bind mount keyed by its local side.
    ///
    /// An existing read-write bind of the same source is never downgraded.
    #[must_use]
    pub fn volume(mut self, local: &str, container: &str, access: Access) -> Self {
        let prefix = format!("{local}:");
        match self.host_config.binds.iter().position(|b| b.starts_with(&prefix)) {
            Some(i) => {
                let keep_rw = self.host_config.binds[i].ends_with(":rw");
                let access = if keep_rw { Access::Rw } else { access };
                self.host_config.binds[i] = format!("{local}:{container}:{access}");
            }
            None => self.host_config.binds.push(format!("{local}:{container}:{access}")),
        }
        self
    }

    /// Set an environment variable, replacing an earlier value for `key`.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        let prefix = format!("{key}=");
        self.env.retain(|e| !e.starts_with(&prefix));
        self.env.push(format!("{key}={value}"));
        self
    }

    /// Set a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    /// Value of an environment variable, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.env.iter().find_map(|e| e.strip_prefix(prefix.as_str()))
    }

    /// Canonical JSON: object keys sorted at every depth, no whitespace.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        canonicalize(&value).to_string()
    }

    /// Lowercase hex SHA-256 of [`Self::canonical_json`].
    pub fn hash(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
