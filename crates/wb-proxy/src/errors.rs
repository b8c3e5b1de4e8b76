//! Proxy error types.

use thiserror::Error;

/// Errors from the control plane, the proxy API and the session registry.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Redis command failed.
    #[error("control plane error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Proxy API unreachable.
    #[error("proxy api request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Proxy API answered with an unexpected status.
    #[error("Service not up (status {status})")]
    NotUp {
        /// HTTP status.
        status: u16,
    },

    /// Backend registered but not every server is UP yet.
    #[error("Service is starting")]
    Starting,

    /// The store refused the write.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Stored session record could not be decoded.
    #[error("invalid session record: {0}")]
    Record(#[from] serde_json::Error),

    /// Hostname template could not be compiled.
    #[error("invalid host template {template:?}: {detail}")]
    Template {
        /// Offending template.
        template: String,
        /// Reason.
        detail: String,
    },
}

impl ProxyError {
    /// Whether UP polling should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::NotUp { .. } | Self::Starting)
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
