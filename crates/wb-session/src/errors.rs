//! Session error type.

use thiserror::Error;
use wb_container::ContainerError;
use wb_proxy::ProxyError;
use wb_repo::RepoError;
use wb_rpc::RpcError;
use wb_sidecar::SidecarError;

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Repository file operation failed.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Container operation failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Process manager call failed.
    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    /// Proxy or session registry call failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// File watcher could not be set up.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Called before the repository was opened.
    #[error("Repository is not open")]
    RepoNotOpen,

    /// No ports are tracked for `pid`.
    #[error("No such process with given PID: {pid}")]
    NoSuchProcess {
        /// Requested pid.
        pid: u32,
    },

    /// `pid` does not listen on `port`.
    #[error("Process {pid} has no open port {port}")]
    NoOpenPort {
        /// Process id.
        pid: u32,
        /// Requested port.
        port: u16,
    },

    /// No stdio stream is attached to `pid`.
    #[error("No such process")]
    NoStream {
        /// Requested pid.
        pid: u32,
    },

    /// Neither an app nor a service has this name.
    #[error("No app or service with name {name}")]
    UnknownApp {
        /// Requested name.
        name: String,
    },

    /// Language servers were never started.
    #[error("Language service is not running")]
    LspNotStarted,

    /// An in-container command wrote to stderr.
    #[error("{stderr}")]
    Exec {
        /// Captured stderr.
        stderr: String,
    },
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        RpcError::internal(err)
    }
}
