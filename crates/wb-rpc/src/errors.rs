//! JSON-RPC error codes and the handler error type.

use serde_json::Value;

use crate::types::RpcErrorObject;

// ── Error code constants ────────────────────────────────────────────

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Error raised while executing the method.
pub const INTERNAL_ERROR: i64 = -32603;

/// Error produced while decoding or executing a call.
///
/// The [`Display`](std::fmt::Display) form becomes the `data` member of the
/// wire error; the `message` member is the fixed text for the code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Inbound text was not valid JSON.
    #[error("{detail}")]
    Parse {
        /// Parser diagnostic.
        detail: String,
    },

    /// Envelope failed validation.
    #[error("{detail}")]
    InvalidRequest {
        /// What was wrong with the envelope. Empty when unspecified.
        detail: String,
    },

    /// No handler registered under `method`.
    #[error("{method} not found")]
    MethodNotFound {
        /// Requested method name.
        method: String,
    },

    /// Parameters missing, of the wrong shape, or of the wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description.
        message: String,
    },

    /// Handler failed.
    #[error("{message}")]
    Internal {
        /// Display form of the underlying failure.
        message: String,
    },
}

impl RpcError {
    /// Wrap any displayable failure as an internal error.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }

    /// Shorthand for [`RpcError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Integer code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Fixed message text for this variant's code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "Parse Error",
            Self::InvalidRequest { .. } => "Invalid Request",
            Self::MethodNotFound { .. } => "Method not found",
            Self::InvalidParams { .. } => "Invalid params",
            Self::Internal { .. } => "Internal Error",
        }
    }

    /// Wire form of this error.
    pub fn to_error_object(&self) -> RpcErrorObject {
        let detail = self.to_string();
        RpcErrorObject {
            code: self.code(),
            message: self.message().to_owned(),
            data: (!detail.is_empty()).then_some(Value::String(detail)),
        }
    }
}
