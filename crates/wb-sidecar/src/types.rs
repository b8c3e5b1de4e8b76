//! Wire types shared with the process manager.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A process spawned by an inner process's subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProcess {
    /// Child pid.
    pub pid: u32,
    /// Parent pid.
    pub ppid: u32,
    /// Executable name.
    pub name: String,
    /// Listening ports.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// A top-level process started through the process manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// Process id.
    pub pid: u32,
    /// Display name.
    pub name: String,
    /// Command.
    pub cmd: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Listening ports.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Descendants keyed by pid.
    #[serde(default)]
    pub children: BTreeMap<u32, ChildProcess>,
}

/// Kind of event pushed on `/notifications`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// `data` is the new port list of `pid` (a process or a child).
    PortsChanged,
    /// `pid` exited.
    ProcessExited,
    /// `data` is a [`Process`].
    ProcessStarted,
    /// `data` is a [`ChildProcess`] under `pid`.
    ChildProcessStarted,
    /// `data.pid` under `pid` exited.
    ChildProcessExited,
    /// A process asked the editor to open a file.
    OpenFileRequest,
}

impl NotificationType {
    /// Wire name, used as the method when re-emitting to the client.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PortsChanged => "PORTS_CHANGED",
            Self::ProcessExited => "PROCESS_EXITED",
            Self::ProcessStarted => "PROCESS_STARTED",
            Self::ChildProcessStarted => "CHILD_PROCESS_STARTED",
            Self::ChildProcessExited => "CHILD_PROCESS_EXITED",
            Self::OpenFileRequest => "OPEN_FILE_REQUEST",
        }
    }
}

/// One event from the process manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Subject process.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Parent of the subject, for child events.
    #[serde(default)]
    pub ppid: Option<u32>,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Body of `POST /`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    /// Command to run.
    pub cmd: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Terminal width.
    pub cols: Option<u16>,
    /// Terminal height.
    pub rows: Option<u16>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Extra environment.
    pub env: Option<HashMap<String, String>>,
    /// Terminal type, sent as `name`.
    #[serde(rename = "name")]
    pub term_type: Option<String>,
}

impl RunRequest {
    /// Request for `cmd` with `args` and everything else defaulted.
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            ..Self::default()
        }
    }
}
