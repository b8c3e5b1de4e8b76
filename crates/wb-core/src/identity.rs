//! Authenticated caller identity and permission checks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission that grants root inside containers and the docker socket.
pub const GOD: &str = "god";

/// Who is driving a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Login name; also names the user's data volume.
    pub username: String,
    /// Email address; used for git identity and forward-auth matching.
    pub email: String,
    /// Granted permission strings, e.g. `network-access:db` or `read:shared-files`.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Principal {
    /// Principal with no permissions.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            permissions: BTreeSet::new(),
        }
    }

    /// Add a permission.
    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        let _ = self.permissions.insert(permission.into());
        self
    }

    /// Whether `permission` was granted.
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Whether the caller holds [`GOD`].
    pub fn is_god(&self) -> bool {
        self.has(GOD)
    }

    /// Whether the caller may attach containers to network `network_id`.
    pub fn can_access_network(&self, network_id: &str) -> bool {
        self.has(&format!("network-access:{network_id}"))
    }

    /// Default user for commands executed in the caller's containers.
    pub fn exec_user(&self) -> &'static str {
        if self.is_god() { "root" } else { "runner" }
    }
}
