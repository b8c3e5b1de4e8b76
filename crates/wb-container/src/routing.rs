//! Route installation inside a container's network namespace.
//!
//! Runs `nsenter --target <pid> --net ip route add <subnet> via <gateway>` on
//! the host. Failures are logged and never abort the caller.

use tokio::process::Command;
use tracing::{debug, error};
use wb_settings::DockerSettings;

use crate::runtime::ContainerRuntime;

/// Extra route every managed container gets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRouting {
    /// Destination subnet.
    pub subnet: String,
    /// Next hop.
    pub gateway: String,
}

impl HostRouting {
    /// Routing from settings; `None` when no gateway is configured.
    pub fn from_settings(docker: &DockerSettings) -> Option<Self> {
        if docker.route_gateway.is_empty() || docker.route_subnet.is_empty() {
            return None;
        }
        Some(Self {
            subnet: docker.route_subnet.clone(),
            gateway: docker.route_gateway.clone(),
        })
    }

    /// Host command installing the route for the process `pid`.
    pub fn command(&self, pid: i64) -> Vec<String> {
        let pid = pid.to_string();
        [
            "nsenter",
            "--target",
            pid.as_str(),
            "--net",
            "ip",
            "route",
            "add",
            self.subnet.as_str(),
            "via",
            self.gateway.as_str(),
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }
}

/// What [`setup_container_routing`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Container missing, stopped, or without a pid.
    Skipped,
    /// Route command exited successfully.
    Installed,
    /// Route command could not run or exited non-zero.
    Failed,
}

/// Install `routing` inside `container` if it is running.
pub async fn setup_container_routing(
    runtime: &dyn ContainerRuntime,
    container: &str,
    routing: &HostRouting,
) -> RouteOutcome {
    let info = match runtime.inspect(container).await {
        Ok(Some(info)) => info,
        Ok(None) => return RouteOutcome::Skipped,
        Err(e) => {
            error!(container, error = %e, "container routing setup error");
            return RouteOutcome::Failed;
        }
    };
    let Some(pid) = info.pid.filter(|_| info.running) else {
        return RouteOutcome::Skipped;
    };

    let argv = routing.command(pid);
    let output = Command::new(&argv[0]).args(&argv[1..]).output().await;
    match output {
        Ok(out) if out.status.success() => {
            debug!(container, pid, subnet = %routing.subnet, "route installed");
            RouteOutcome::Installed
        }
        Ok(out) => {
            error!(
                container,
                pid,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "container routing setup error"
            );
            RouteOutcome::Failed
        }
        Err(e) => {
            error!(container, pid, error = %e, "container routing setup error");
            RouteOutcome::Failed
        }
    }
}
