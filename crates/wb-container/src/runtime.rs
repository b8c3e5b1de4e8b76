//! The container engine operations the orchestrator relies on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::ContainerConfig;
use crate::errors::Result;

/// State of an existing container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Engine id.
    pub id: String,
    /// Labels recorded at creation.
    pub labels: BTreeMap<String, String>,
    /// Whether the container is running.
    pub running: bool,
    /// Host pid of the init process while running.
    pub pid: Option<i64>,
    /// Attached networks and the address on each.
    pub networks: BTreeMap<String, Option<String>>,
}

impl ContainerInfo {
    /// Address on `network`, if attached and assigned.
    pub fn ip_on(&self, network: &str) -> Option<&str> {
        self.networks.get(network).and_then(|ip| ip.as_deref())
    }
}

/// A command to execute inside a running container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecSpec {
    /// Argument vector.
    pub cmd: Vec<String>,
    /// User to run as.
    pub user: Option<String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Allocate a terminal.
    pub tty: bool,
}

impl ExecSpec {
    /// Spec running `cmd` with defaults.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Run as `user`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Allocate a terminal.
    #[must_use]
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// One chunk of exec output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecChunk {
    /// Standard output (or terminal output).
    Stdout(Bytes),
    /// Standard error.
    Stderr(Bytes),
}

impl ExecChunk {
    /// Raw bytes regardless of channel.
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Stdout(b) | Self::Stderr(b) => b,
        }
    }
}

/// A started exec session.
pub struct ExecStream {
    /// Exec id, used for resize and exit code lookups.
    pub id: String,
    /// Output until the command exits.
    pub output: BoxStream<'static, Result<ExecChunk>>,
}

impl std::fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStream").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Collected output of a finished exec.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
    /// Exit code, when the runtime reports one.
    pub exit_code: Option<i64>,
}

/// Container engine operations.
///
/// Lookups of absent containers return `Ok(None)`; stop and remove of absent
/// containers succeed.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspect `name`.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Create `name` from `config`, replacing any container of that name.
    /// Returns the engine id.
    async fn create_or_replace(&self, name: &str, config: &ContainerConfig) -> Result<String>;

    /// Start `name`; already running is not an error.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop `name`, killing it after `timeout_secs`.
    async fn stop(&self, name: &str, timeout_secs: i64) -> Result<()>;

    /// Restart `name`.
    async fn restart(&self, name: &str) -> Result<()>;

    /// Force-remove `name`.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Attach `container` to `network`.
    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;

    /// Detach `container` from `network`.
    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()>;

    /// Start `spec` inside `container` and stream its output.
    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream>;

    /// Exit code of a finished exec.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Resize the terminal of a running exec.
    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()>;
}

/// Run `spec` to completion and collect its output.
pub async fn exec_output(runtime: &dyn ContainerRuntime, container: &str, spec: &ExecSpec) -> Result<ExecOutput> {
    let ExecStream { id, mut output } = runtime.exec(container, spec).await?;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(chunk) = output.next().await {
        match chunk? {
            ExecChunk::Stdout(b) => stdout.extend_from_slice(&b),
            ExecChunk::Stderr(b) => stderr.extend_from_slice(&b),
        }
    }
    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: runtime.exec_exit_code(&id).await?,
    })
}
