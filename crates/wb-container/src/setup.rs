//! Per-principal volume, environment and label setup for launch configs.

use std::collections::BTreeMap;

use wb_core::identity::{GOD, Principal};

use crate::config::{Access, ContainerConfig};
use crate::labels::{self, ResourceRef};

/// One permission-gated mount: holding `permission` mounts `source` at
/// `target` with `access`.
struct Grant {
    source: &'static str,
    permission: &'static str,
    target: &'static str,
    access: Access,
}

const PERMISSION_VOLUMES: &[Grant] = &[
    Grant { source: "shared_files", permission: "read:shared-files", target: "/data/shared_files", access: Access::Ro },
    Grant { source: "shared_files", permission: "write:shared-files", target: "/data/shared_files", access: Access::Rw },
    Grant { source: "public_http", permission: "read:public-http", target: "/data/public_http", access: Access::Ro },
    Grant { source: "public_http", permission: "write:public-http", target: "/data/public_http", access: Access::Rw },
    Grant { source: "private_http", permission: "read:private-http", target: "/data/private_http", access: Access::Ro },
    Grant { source: "private_http", permission: "write:private-http", target: "/data/private_http", access: Access::Rw },
    Grant { source: "/var/run/docker.sock", permission: GOD, target: "/var/run/docker.sock", access: Access::Rw },
];

/// Host environment variables forwarded into every container.
pub const FORWARDED_ENV: &[&str] = &["SERVER", "DOMAIN", "HTTP_PROXY", "HTTPS_PROXY"];

/// Snapshot [`FORWARDED_ENV`] from the current process environment.
pub fn host_env() -> BTreeMap<String, String> {
    FORWARDED_ENV
        .iter()
        .filter_map(|k| std::env::var(k).ok().map(|v| ((*k).to_string(), v)))
        .collect()
}

/// Personal and per-resource data volumes plus every mount the principal's
/// permissions grant.
pub fn setup_volumes(config: ContainerConfig, principal: &Principal, resource: &ResourceRef) -> ContainerConfig {
    let user = principal.username.as_str();
    let mut config = config
        .volume(user, "/home/runner/MyData", Access::Rw)
        .volume(&format!("{user}.{}.data", resource.name), "/home/runner/AppData", Access::Rw);

    for grant in PERMISSION_VOLUMES {
        if principal.has(grant.permission) {
            config = config.volume(grant.source, grant.target, grant.access);
        }
    }
    config
}

/// Identity and git variables, forwarded host variables, and root execution
/// for god principals.
pub fn setup_environ(
    config: ContainerConfig,
    principal: &Principal,
    host_env: &BTreeMap<String, String>,
) -> ContainerConfig {
    let user = principal.username.as_str();
    let email = principal.email.as_str();
    let mut config = config.env("WORKBENCH_USER", user);
    for key in FORWARDED_ENV {
        config = config.env(key, host_env.get(*key).map_or("", String::as_str));
    }
    config = config
        .env("GIT_AUTHOR_NAME", user)
        .env("GIT_AUTHOR_EMAIL", email)
        .env("GIT_COMMITTER_NAME", user)
        .env("GIT_COMMITTER_EMAIL", email);

    if principal.is_god() {
        config = config.user("root").entrypoint(Vec::new());
    }
    config
}

/// Resource id and kind labels.
pub fn setup_labels(config: ContainerConfig, resource: &ResourceRef) -> ContainerConfig {
    config
        .label(labels::RESOURCE_ID, resource.id.clone())
        .label(resource.kind.label(), "1")
}
