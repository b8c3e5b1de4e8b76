//! Process manager error types.

use thiserror::Error;

/// Errors raised by the process manager client and its streams.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Transport failure talking to the HTTP API.
    #[error("{operation} request failed: {source}")]
    Request {
        /// Operation name, e.g. `run`.
        operation: &'static str,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP API answered with an unexpected status.
    #[error("{operation} failed with status {status}")]
    Status {
        /// Operation name.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// `wait` gave up before the process exited.
    #[error("Timeout")]
    Timeout {
        /// Process that was waited on.
        pid: u32,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected {operation} response: {detail}")]
    Protocol {
        /// Operation name.
        operation: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// Requested language has no server in this container.
    #[error("{lang} is not available")]
    LspUnavailable {
        /// Language key.
        lang: String,
    },

    /// A channel for this language is already open.
    #[error("{lang} is already running")]
    LspAlreadyRunning {
        /// Language key.
        lang: String,
    },

    /// No channel for this language has been opened.
    #[error("{lang} is not running")]
    LspNotRunning {
        /// Language key.
        lang: String,
    },

    /// The stream has no live socket to write to.
    #[error("stream to {url} is not connected")]
    StreamClosed {
        /// Stream endpoint.
        url: String,
    },

    /// The stream did not connect within its readiness timeout.
    #[error("stream to {url} did not connect in time")]
    StreamTimeout {
        /// Stream endpoint.
        url: String,
    },

    /// WebSocket write failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl SidecarError {
    /// Whether the failure is a refused or failed connection, the only class
    /// the readiness probe retries.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Request { source, .. } if source.is_connect())
    }
}

/// Result type for process manager operations.
pub type Result<T> = std::result::Result<T, SidecarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_is_stable() {
        assert_eq!(SidecarError::Timeout { pid: 3 }.to_string(), "Timeout");
    }

    #[test]
    fn status_is_not_a_connect_error() {
        let err = SidecarError::Status { operation: "run", status: 500 };
        assert!(!err.is_connect());
        assert_eq!(err.to_string(), "run failed with status 500");
    }

    #[test]
    fn lsp_messages() {
        assert_eq!(
            SidecarError::LspUnavailable { lang: "rust".into() }.to_string(),
            "rust is not available"
        );
        assert_eq!(
            SidecarError::LspAlreadyRunning { lang: "python".into() }.to_string(),
            "python is already running"
        );
    }
}
