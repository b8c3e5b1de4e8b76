//! [`ContainerRuntime`] backed by the Docker engine API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, NetworkingConfig,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::models::{ContainerInspectResponse, EndpointSettings, HostConfig};
use bollard::network::{ConnectNetworkOptions, DisconnectNetworkOptions};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::ContainerConfig;
use crate::errors::{ContainerError, Result};
use crate::runtime::{ContainerInfo, ContainerRuntime, ExecChunk, ExecSpec, ExecStream};

/// Docker engine client.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the local socket.
    pub fn connect() -> Result<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Ping the engine.
    pub async fn ping(&self) -> Result<()> {
        let _ = self.docker.ping().await?;
        Ok(())
    }
}

fn has_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code)
}

fn engine_config(config: &ContainerConfig) -> Config<String> {
    let endpoints: HashMap<String, EndpointSettings> = config
        .networking_config
        .endpoints_config
        .iter()
        .map(|(name, ep)| {
            let settings = EndpointSettings {
                aliases: (!ep.aliases.is_empty()).then(|| ep.aliases.clone()),
                ..Default::default()
            };
            (name.clone(), settings)
        })
        .collect();

    Config {
        image: Some(config.image.clone()),
        hostname: config.hostname.clone(),
        working_dir: config.working_dir.clone(),
        env: (!config.env.is_empty()).then(|| config.env.clone()),
        labels: Some(config.labels.clone().into_iter().collect()),
        user: config.user.clone(),
        entrypoint: config.entrypoint.clone(),
        cmd: config.cmd.clone(),
        tty: config.tty,
        host_config: Some(HostConfig {
            network_mode: config.host_config.network_mode.clone(),
            binds: (!config.host_config.binds.is_empty()).then(|| config.host_config.binds.clone()),
            ..Default::default()
        }),
        networking_config: (!endpoints.is_empty()).then(|| NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    }
}

fn container_info(resp: ContainerInspectResponse) -> ContainerInfo {
    let state = resp.state.unwrap_or_default();
    let networks = resp
        .network_settings
        .and_then(|n| n.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, ep)| (name, ep.ip_address.filter(|ip| !ip.is_empty())))
        .collect();
    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        labels: resp
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default()
            .into_iter()
            .collect(),
        running: state.running.unwrap_or(false),
        pid: state.pid.filter(|p| *p > 0),
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        match self.docker.inspect_container(name, None::<InspectContainerOptions>).await {
            Ok(resp) => Ok(Some(container_info(resp))),
            Err(e) if has_status(&e, 404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_or_replace(&self, name: &str, config: &ContainerConfig) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        match self.docker.create_container(Some(options.clone()), engine_config(config)).await {
            Ok(resp) => Ok(resp.id),
            Err(e) if has_status(&e, 409) => {
                debug!(container = name, "replacing existing container");
                self.remove(name).await?;
                let resp = self.docker.create_container(Some(options), engine_config(config)).await?;
                Ok(resp.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self.docker.start_container(name, None::<StartContainerOptions<String>>).await {
            Err(e) if !has_status(&e, 304) => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn stop(&self, name: &str, timeout_secs: i64) -> Result<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: timeout_secs }))
            .await
        {
            Err(e) if !has_status(&e, 304) && !has_status(&e, 404) => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Err(e) if !has_status(&e, 404) => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings::default(),
        };
        self.docker.connect_network(network, options).await?;
        Ok(())
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        let options = DisconnectNetworkOptions {
            container: container.to_string(),
            force: false,
        };
        self.docker.disconnect_network(network, options).await?;
        Ok(())
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            ..Default::default()
        };
        let created = self.docker.create_exec(container, options).await?;
        match self.docker.start_exec(&created.id, None).await? {
            StartExecResults::Attached { output, .. } => {
                let output = output
                    .filter_map(|item| async move {
                        match item {
                            Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                                Some(Ok(ExecChunk::Stdout(message)))
                            }
                            Ok(LogOutput::StdErr { message }) => Some(Ok(ExecChunk::Stderr(message))),
                            Ok(LogOutput::StdIn { .. }) => None,
                            Err(e) => Some(Err(ContainerError::from(e))),
                        }
                    })
                    .boxed();
                Ok(ExecStream { id: created.id, output })
            }
            StartExecResults::Detached => {
                warn!(exec = %created.id, "exec started detached");
                Ok(ExecStream {
                    id: created.id,
                    output: futures::stream::empty().boxed(),
                })
            }
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        match self.docker.inspect_exec(exec_id).await {
            Ok(resp) => Ok(resp.exit_code),
            Err(e) if has_status(&e, 404) => Err(ContainerError::ExecNotFound { id: exec_id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        let options = ResizeExecOptions {
            height: rows,
            width: cols,
        };
        match self.docker.resize_exec(exec_id, options).await {
            Ok(()) => Ok(()),
            Err(e) if has_status(&e, 404) => Err(ContainerError::ExecNotFound { id: exec_id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Access;

    #[test]
    fn engine_config_carries_everything() {
        let config = ContainerConfig::new("editor:latest")
            .hostname("blog-editor")
            .network("apps-network", vec!["ada.blog.editor".into()])
            .volume("ada", "/home/runner/MyData", Access::Rw)
            .env("A", "1")
            .label("k", "v");
        let engine = engine_config(&config);
        assert_eq!(engine.image.as_deref(), Some("editor:latest"));
        assert_eq!(engine.env, Some(vec!["A=1".to_string()]));
        let host = engine.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("apps-network"));
        assert_eq!(host.binds.unwrap(), vec!["ada:/home/runner/MyData:rw".to_string()]);
        let endpoints = engine.networking_config.unwrap().endpoints_config;
        assert_eq!(
            endpoints["apps-network"].aliases,
            Some(vec!["ada.blog.editor".to_string()])
        );
        assert_eq!(engine.labels.unwrap()["k"], "v");
    }

    #[test]
    fn inspect_response_maps_state_and_networks() {
        let raw = serde_json::json!({
            "Id": "abc",
            "Config": {"Labels": {"net.flowide.workbench.config.hash": "h"}},
            "State": {"Running": true, "Pid": 4242, "Status": "running"},
            "NetworkSettings": {"Networks": {
                "apps-network": {"IPAddress": "172.18.0.3"},
                "db": {"IPAddress": ""}
            }}
        });
        let resp: ContainerInspectResponse = serde_json::from_value(raw).unwrap();
        let info = container_info(resp);
        assert_eq!(info.id, "abc");
        assert!(info.running);
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.ip_on("apps-network"), Some("172.18.0.3"));
        assert_eq!(info.ip_on("db"), None);
        assert!(info.networks.contains_key("db"));
        assert_eq!(info.labels["net.flowide.workbench.config.hash"], "h");
    }
}
