//! Labels stamped on managed containers and the resources they belong to.

use serde::{Deserialize, Serialize};

/// Marks an editing container.
pub const IS_EDIT_CONTAINER: &str = "net.flowide.workbench.edit";
/// Marks an app container.
pub const IS_APP_CONTAINER: &str = "net.flowide.workbench.app";
/// Marks a service container.
pub const IS_SERVICE_CONTAINER: &str = "net.flowide.workbench.service";
/// Id of the owning resource.
pub const RESOURCE_ID: &str = "net.flowide.workbench.resource.id";
/// Hash of the launch config the container was created from.
pub const CONFIG_HASH: &str = "net.flowide.workbench.config.hash";
/// Session that launched the container.
pub const SESSION_ID: &str = "net.flowide.workbench.session.id";
/// Whether the workbench UI lists the container.
pub const SHOW_IN_WORKBENCH: &str = "net.flowide.workbench.show_in_workbench";

/// What kind of resource a container runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Repository opened for editing.
    Repository,
    /// Published app.
    App,
    /// Background service.
    Service,
}

impl ResourceKind {
    /// Label flagging containers of this kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Repository => IS_EDIT_CONTAINER,
            Self::App => IS_APP_CONTAINER,
            Self::Service => IS_SERVICE_CONTAINER,
        }
    }

    /// Suffix of the deterministic container name.
    pub fn name_suffix(self) -> &'static str {
        match self {
            Self::Repository => "editor",
            Self::App | Self::Service => "runner",
        }
    }
}

/// The resource a container is launched for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Stable id.
    pub id: String,
    /// Short name; used in container, host and volume names.
    pub name: String,
    /// Username of the owner.
    pub owner: String,
    /// Resource kind.
    pub kind: ResourceKind,
}

impl ResourceRef {
    /// Deterministic container name, `{owner}-{name}-editor` or `...-runner`.
    pub fn container_name(&self) -> String {
        format!("{}-{}-{}", self.owner, self.name, self.kind.name_suffix())
    }
}
