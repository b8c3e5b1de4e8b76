//! Repository error types.

use thiserror::Error;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Path does not exist.
    #[error("{path} doesn't exist")]
    NotFound {
        /// Requested path.
        path: String,
    },

    /// Path resolves outside the repository root.
    #[error("path {path} is outside the repository")]
    OutsideRoot {
        /// Requested path.
        path: String,
    },

    /// Content flagged as base64 did not decode.
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    /// `workbench.yml` did not parse or validate.
    #[error("invalid workbench config: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A git command exited non-zero.
    #[error("Git command failed: {command}\n{stderr}")]
    Git {
        /// Arguments passed to git.
        command: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;
