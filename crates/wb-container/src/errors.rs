//! Container error types.

use thiserror::Error;

/// Errors raised by container runtimes and the editor container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Docker engine API failure.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// No container under this name.
    #[error("container {name} not found")]
    NotFound {
        /// Container name.
        name: String,
    },

    /// The container is not attached to the expected network.
    #[error("container {name} has no address on network {network}")]
    NoAddress {
        /// Container name.
        name: String,
        /// Network that was expected.
        network: String,
    },

    /// The process manager inside the container never answered.
    #[error("Cannot access container")]
    Unreachable {
        /// Container name.
        name: String,
    },

    /// Operation requires a started container.
    #[error("container has not been started")]
    NotStarted,

    /// Exec session id is unknown to the runtime.
    #[error("exec {id} not found")]
    ExecNotFound {
        /// Exec id.
        id: String,
    },
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_message() {
        let err = ContainerError::Unreachable { name: "ada-repo-editor".into() };
        assert_eq!(err.to_string(), "Cannot access container");
    }

    #[test]
    fn no_address_names_network() {
        let err = ContainerError::NoAddress {
            name: "c".into(),
            network: "apps-network".into(),
        };
        assert!(err.to_string().contains("apps-network"));
    }
}
