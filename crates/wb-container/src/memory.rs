//! In-process [`ContainerRuntime`] used by tests and local development.
//!
//! Every network attachment gets the same configured address, so a process
//! manager stub listening there answers for any container.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};

use crate::config::ContainerConfig;
use crate::errors::{ContainerError, Result};
use crate::runtime::{ContainerInfo, ContainerRuntime, ExecChunk, ExecSpec, ExecStream};

/// Produces the output and exit code for an exec.
pub type ExecScript = Arc<dyn Fn(&ExecSpec) -> (Vec<ExecChunk>, i64) + Send + Sync>;

struct MemContainer {
    id: String,
    config: ContainerConfig,
    running: bool,
    pid: i64,
    networks: BTreeMap<String, Option<String>>,
}

struct MemExec {
    spec: ExecSpec,
    exit_code: i64,
}

#[derive(Default)]
struct State {
    next: u64,
    containers: HashMap<String, MemContainer>,
    execs: BTreeMap<String, MemExec>,
    resizes: Vec<(String, u16, u16)>,
    creates: usize,
    denied_networks: BTreeSet<String>,
}

/// Container runtime kept entirely in memory.
pub struct MemoryRuntime {
    ip: String,
    state: Mutex<State>,
    script: RwLock<Option<ExecScript>>,
}

impl MemoryRuntime {
    /// Runtime assigning `ip` on every network.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            state: Mutex::new(State::default()),
            script: RwLock::new(None),
        }
    }

    /// Script exec results. Without a script every exec succeeds silently.
    pub fn on_exec<F>(&self, f: F)
    where
        F: Fn(&ExecSpec) -> (Vec<ExecChunk>, i64) + Send + Sync + 'static,
    {
        *self.script.write() = Some(Arc::new(f));
    }

    /// Make connecting to `network` fail.
    pub fn deny_network(&self, network: impl Into<String>) {
        let _ = self.state.lock().denied_networks.insert(network.into());
    }

    /// Number of containers created so far.
    pub fn create_count(&self) -> usize {
        self.state.lock().creates
    }

    /// Config `name` was created from.
    pub fn config_of(&self, name: &str) -> Option<ContainerConfig> {
        self.state.lock().containers.get(name).map(|c| c.config.clone())
    }

    /// Whether `name` exists and runs.
    pub fn is_running(&self, name: &str) -> bool {
        self.state.lock().containers.get(name).is_some_and(|c| c.running)
    }

    /// Every exec started, in order.
    pub fn execs(&self) -> Vec<ExecSpec> {
        self.state.lock().execs.values().map(|e| e.spec.clone()).collect()
    }

    /// Every resize request as `(exec id, cols, rows)`.
    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.state.lock().resizes.clone()
    }

    fn not_found(name: &str) -> ContainerError {
        ContainerError::NotFound { name: name.to_string() }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let state = self.state.lock();
        Ok(state.containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            labels: c.config.labels.clone(),
            running: c.running,
            pid: c.running.then_some(c.pid),
            networks: c.networks.clone(),
        }))
    }

    async fn create_or_replace(&self, name: &str, config: &ContainerConfig) -> Result<String> {
        let mut state = self.state.lock();
        state.next += 1;
        state.creates += 1;
        let id = format!("mem-{:012}", state.next);
        let mut networks: BTreeMap<String, Option<String>> = config
            .networking_config
            .endpoints_config
            .keys()
            .map(|n| (n.clone(), Some(self.ip.clone())))
            .collect();
        if let Some(mode) = &config.host_config.network_mode {
            let _ = networks.entry(mode.clone()).or_insert_with(|| Some(self.ip.clone()));
        }
        let pid = 1000 + i64::try_from(state.next).unwrap_or(0);
        let _ = state.containers.insert(
            name.to_string(),
            MemContainer {
                id: id.clone(),
                config: config.clone(),
                running: false,
                pid,
                networks,
            },
        );
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let c = state.containers.get_mut(name).ok_or_else(|| Self::not_found(name))?;
        c.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str, _timeout_secs: i64) -> Result<()> {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.running = false;
        }
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let c = state.containers.get_mut(name).ok_or_else(|| Self::not_found(name))?;
        c.running = true;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let _ = self.state.lock().containers.remove(name);
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.denied_networks.contains(network) {
            return Err(Self::not_found(network));
        }
        let c = state.containers.get_mut(container).ok_or_else(|| Self::not_found(container))?;
        let _ = c.networks.insert(network.to_string(), Some(self.ip.clone()));
        Ok(())
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.state.lock();
        let c = state.containers.get_mut(container).ok_or_else(|| Self::not_found(container))?;
        match c.networks.remove(network) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(network)),
        }
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream> {
        let script = self.script.read().clone();
        let (chunks, exit_code) = script.map_or_else(|| (Vec::new(), 0), |f| f(spec));
        let mut state = self.state.lock();
        if !state.containers.get(container).is_some_and(|c| c.running) {
            return Err(Self::not_found(container));
        }
        state.next += 1;
        let id = format!("exec-{:06}", state.next);
        let _ = state.execs.insert(id.clone(), MemExec { spec: spec.clone(), exit_code });
        Ok(ExecStream {
            id,
            output: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        self.state
            .lock()
            .execs
            .get(exec_id)
            .map(|e| Some(e.exit_code))
            .ok_or_else(|| ContainerError::ExecNotFound { id: exec_id.to_string() })
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        let mut state = self.state.lock();
        if !state.execs.contains_key(exec_id) {
            return Err(ContainerError::ExecNotFound { id: exec_id.to_string() });
        }
        state.resizes.push((exec_id.to_string(), cols, rows));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::exec_output;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    fn config() -> ContainerConfig {
        ContainerConfig::new("img").network("apps-network", vec![])
    }

    #[tokio::test]
    async fn create_start_inspect() {
        let rt = MemoryRuntime::new("10.0.0.5");
        let id = rt.create_or_replace("c", &config()).await.unwrap();
        rt.start("c").await.unwrap();
        let info = rt.inspect("c").await.unwrap().unwrap();
        assert_eq!(info.id, id);
        assert!(info.running);
        assert!(info.pid.is_some());
        assert_eq!(info.ip_on("apps-network"), Some("10.0.0.5"));
        assert!(rt.inspect("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exec_collects_scripted_output() {
        let rt = MemoryRuntime::new("10.0.0.5");
        let _ = rt.create_or_replace("c", &config()).await.unwrap();
        rt.start("c").await.unwrap();
        rt.on_exec(|spec| {
            let out = format!("ran {}", spec.cmd.join(" "));
            (vec![ExecChunk::Stdout(Bytes::from(out)), ExecChunk::Stderr(Bytes::from_static(b"warn"))], 3)
        });
        let out = exec_output(&rt, "c", &ExecSpec::new(["ls", "-la"])).await.unwrap();
        assert_eq!(out.stdout, "ran ls -la");
        assert_eq!(out.stderr, "warn");
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn exec_requires_running_container() {
        let rt = MemoryRuntime::new("10.0.0.5");
        let _ = rt.create_or_replace("c", &config()).await.unwrap();
        assert_matches!(rt.exec("c", &ExecSpec::new(["true"])).await, Err(ContainerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn network_attach_and_detach() {
        let rt = MemoryRuntime::new("10.0.0.5");
        let _ = rt.create_or_replace("c", &config()).await.unwrap();
        rt.connect_network("db", "c").await.unwrap();
        assert!(rt.inspect("c").await.unwrap().unwrap().networks.contains_key("db"));
        rt.disconnect_network("db", "c").await.unwrap();
        assert!(rt.disconnect_network("db", "c").await.is_err());
        rt.deny_network("secret");
        assert!(rt.connect_network("secret", "c").await.is_err());
    }
}
