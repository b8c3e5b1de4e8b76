//! The per-repository editing container.
//!
//! [`EditorContainer::start`] builds the launch config, compares its hash
//! with the label on any existing container of the same name, and reuses the
//! container when they match. Otherwise the old container is replaced. Once
//! running, the in-container process manager is probed until it answers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};
use wb_core::identity::Principal;
use wb_core::retry::BackoffPolicy;
use wb_settings::{DockerSettings, SidecarSettings};
use wb_sidecar::ProcessManager;

use crate::config::{Access, ContainerConfig};
use crate::errors::{ContainerError, Result};
use crate::labels::{self, ResourceRef};
use crate::routing::{HostRouting, setup_container_routing};
use crate::runtime::{self, ContainerRuntime, ExecOutput, ExecSpec, ExecStream};
use crate::setup::{self, setup_environ, setup_labels, setup_volumes};

/// Launch and connectivity parameters for editor containers.
#[derive(Clone, Debug)]
pub struct EditorOptions {
    /// Image to run.
    pub image: String,
    /// Managed network; never disconnected.
    pub network: String,
    /// Process manager port inside the container.
    pub sidecar_port: u16,
    /// Readiness probe budget.
    pub ready_policy: BackoffPolicy,
    /// Stop grace period.
    pub stop_timeout_secs: i64,
    /// Route installed after start and after each network attach.
    pub routing: Option<HostRouting>,
    /// Forwarded host variables.
    pub host_env: BTreeMap<String, String>,
}

impl EditorOptions {
    /// Options from settings, capturing the forwarded host environment.
    pub fn from_settings(docker: &DockerSettings, sidecar: &SidecarSettings) -> Self {
        Self {
            image: docker.editor_image.clone(),
            network: docker.network.clone(),
            sidecar_port: sidecar.port,
            ready_policy: BackoffPolicy::new(sidecar.ready_attempts, sidecar.ready_max_delay_ms),
            stop_timeout_secs: docker.stop_timeout_secs,
            routing: HostRouting::from_settings(docker),
            host_env: setup::host_env(),
        }
    }
}

struct Running {
    id: String,
    ip: String,
    process_manager: ProcessManager,
}

/// Editing container for one repository and one principal.
pub struct EditorContainer {
    runtime: Arc<dyn ContainerRuntime>,
    options: EditorOptions,
    principal: Principal,
    resource: ResourceRef,
    repo_path: String,
    name: String,
    using_existing: AtomicBool,
    running: RwLock<Option<Running>>,
}

impl EditorContainer {
    /// Editor for `resource`, mounting the checkout at `repo_path`.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        options: EditorOptions,
        principal: Principal,
        resource: ResourceRef,
        repo_path: impl Into<String>,
    ) -> Self {
        let name = resource.container_name();
        Self {
            runtime,
            options,
            principal,
            resource,
            repo_path: repo_path.into(),
            name,
            using_existing: AtomicBool::new(false),
            running: RwLock::new(None),
        }
    }

    /// Deterministic container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory of the checkout inside the container.
    pub fn workdir(&self) -> String {
        format!("/home/runner/{}", self.resource.name)
    }

    /// Whether the last [`Self::start`] reused an existing container.
    pub fn using_existing(&self) -> bool {
        self.using_existing.load(Ordering::SeqCst)
    }

    /// Engine id once started.
    pub fn id(&self) -> Option<String> {
        self.running.read().as_ref().map(|r| r.id.clone())
    }

    /// Address on the managed network once started.
    pub fn ip(&self) -> Option<String> {
        self.running.read().as_ref().map(|r| r.ip.clone())
    }

    /// Client for the in-container process manager.
    pub fn process_manager(&self) -> Result<ProcessManager> {
        self.running
            .read()
            .as_ref()
            .map(|r| r.process_manager.clone())
            .ok_or(ContainerError::NotStarted)
    }

    /// Launch config for this editor, without the hash label.
    pub fn config(&self) -> ContainerConfig {
        let repo = &self.resource.name;
        let alias = format!("{}.{repo}.editor", self.principal.username);
        let workdir = self.workdir();
        let config = ContainerConfig::new(self.options.image.clone())
            .hostname(format!("{repo}-editor"))
            .network(self.options.network.clone(), vec![alias])
            .working_dir(workdir.clone())
            .volume(&self.repo_path, &workdir, Access::Rw);
        let config = setup_volumes(config, &self.principal, &self.resource);
        let config = setup_environ(config, &self.principal, &self.options.host_env);
        setup_labels(config, &self.resource)
    }

    /// Reuse or recreate the container, start it and wait for the process
    /// manager.
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn start(&self) -> Result<()> {
        let config = self.config();
        let hash = config.hash();

        let existing = match self.runtime.inspect(&self.name).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "inspect failed, recreating");
                None
            }
        };
        let reuse = existing
            .as_ref()
            .and_then(|c| c.labels.get(labels::CONFIG_HASH))
            .is_some_and(|h| *h == hash);

        if reuse {
            info!("reusing container with matching config");
        } else {
            let config = config.label(labels::CONFIG_HASH, hash);
            let _ = self.runtime.create_or_replace(&self.name, &config).await?;
            info!("created container");
        }
        self.using_existing.store(reuse, Ordering::SeqCst);
        counter!("container_starts_total", "reused" => reuse.to_string()).increment(1);

        self.runtime.start(&self.name).await?;
        let info = self
            .runtime
            .inspect(&self.name)
            .await?
            .ok_or_else(|| ContainerError::NotFound { name: self.name.clone() })?;
        let ip = info
            .ip_on(&self.options.network)
            .ok_or_else(|| ContainerError::NoAddress {
                name: self.name.clone(),
                network: self.options.network.clone(),
            })?
            .to_string();

        let process_manager = ProcessManager::new(ip.clone(), self.options.sidecar_port, self.options.ready_policy);
        if !process_manager.ready().await {
            return Err(ContainerError::Unreachable { name: self.name.clone() });
        }

        if let Some(routing) = &self.options.routing {
            let _ = setup_container_routing(self.runtime.as_ref(), &self.name, routing).await;
        }

        *self.running.write() = Some(Running {
            id: info.id,
            ip,
            process_manager,
        });
        Ok(())
    }

    /// Restart and wait for the process manager again.
    pub async fn restart(&self) -> Result<()> {
        let pm = self.process_manager()?;
        self.runtime.restart(&self.name).await?;
        if pm.ready().await {
            Ok(())
        } else {
            Err(ContainerError::Unreachable { name: self.name.clone() })
        }
    }

    /// Force-remove the container.
    pub async fn remove(&self) -> Result<()> {
        self.runtime.remove(&self.name).await?;
        *self.running.write() = None;
        Ok(())
    }

    /// Stop the process manager client, then the container. Errors are
    /// logged.
    pub async fn close(&self) {
        let pm = self.running.read().as_ref().map(|r| r.process_manager.clone());
        if let Some(pm) = pm {
            pm.close().await;
        }
        if let Err(e) = self.runtime.stop(&self.name, self.options.stop_timeout_secs).await {
            error!(container = %self.name, error = %e, "container stop failed");
        }
    }

    // ── Networks ────────────────────────────────────────────────────

    /// Attach to `network` if the principal may access it.
    ///
    /// Returns `false` on denial or failure.
    pub async fn connect_to_network(&self, network: &str) -> bool {
        if !self.principal.can_access_network(network) {
            warn!(container = %self.name, network, "network access denied");
            return false;
        }
        if let Err(e) = self.runtime.connect_network(network, &self.name).await {
            error!(container = %self.name, network, error = %e, "container network connect error");
            return false;
        }
        if let Some(routing) = &self.options.routing {
            let _ = setup_container_routing(self.runtime.as_ref(), &self.name, routing).await;
        }
        true
    }

    /// Detach from `network`. The managed network is never detached.
    pub async fn disconnect_from_network(&self, network: &str) -> bool {
        if network == self.options.network {
            return false;
        }
        match self.runtime.disconnect_network(network, &self.name).await {
            Ok(()) => true,
            Err(e) => {
                error!(container = %self.name, network, error = %e, "container network disconnect error");
                false
            }
        }
    }

    /// Names of the attached networks, freshly inspected.
    pub async fn get_networks(&self) -> Vec<String> {
        match self.runtime.inspect(&self.name).await {
            Ok(Some(info)) => info.networks.into_keys().collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(container = %self.name, error = %e, "container inspect failed");
                Vec::new()
            }
        }
    }

    /// Address on `network`, freshly inspected.
    pub async fn get_network_ip(&self, network: &str) -> Option<String> {
        match self.runtime.inspect(&self.name).await {
            Ok(info) => info.and_then(|i| i.ip_on(network).map(str::to_string)),
            Err(e) => {
                error!(container = %self.name, error = %e, "container inspect failed");
                None
            }
        }
    }

    // ── Exec ────────────────────────────────────────────────────────

    fn exec_spec(&self, cmd: Vec<String>, user: Option<&str>) -> ExecSpec {
        ExecSpec {
            cmd,
            user: Some(user.unwrap_or_else(|| self.principal.exec_user()).to_string()),
            working_dir: None,
            env: Vec::new(),
            tty: false,
        }
    }

    /// Run `cmd` to completion. `user` defaults to the principal's exec user.
    pub async fn exec_output(&self, cmd: Vec<String>, user: Option<&str>) -> Result<ExecOutput> {
        runtime::exec_output(self.runtime.as_ref(), &self.name, &self.exec_spec(cmd, user)).await
    }

    /// Start `cmd` and stream its output.
    pub async fn exec_stream(&self, cmd: Vec<String>, user: Option<&str>, tty: bool) -> Result<ExecStream> {
        let spec = self.exec_spec(cmd, user).tty(tty);
        self.runtime.exec(&self.name, &spec).await
    }

    /// Exit code of a finished exec.
    pub async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        self.runtime.exec_exit_code(exec_id).await
    }

    /// Resize the terminal of a running exec.
    pub async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.runtime.resize_exec(exec_id, cols, rows).await
    }
}
