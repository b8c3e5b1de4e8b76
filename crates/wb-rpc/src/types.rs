//! JSON-RPC 2.0 wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;

/// Protocol version every envelope carries.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Inbound call. A request without an `id` (or with `"id": null`) is a
/// client notification and gets no response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Must be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Positional array or named object. Absent means no arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// String or number correlating the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Decode one element of an inbound payload.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let request: Self = serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest {
            detail: e.to_string(),
        })?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::InvalidRequest {
                detail: "Version must be 2.0".into(),
            });
        }
        if let Some(id) = &request.id {
            if !(id.is_string() || id.is_number()) {
                return Err(RpcError::InvalidRequest {
                    detail: "id must be a string or a number".into(),
                });
            }
        }
        Ok(request)
    }

    /// Whether the client expects a response.
    pub fn expects_response(&self) -> bool {
        self.id.is_some()
    }
}

/// Error member of a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Standard JSON-RPC code.
    pub code: i64,
    /// Fixed text for the code.
    pub message: String,
    /// Call-specific detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outbound response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Echoed request id; `null` when the request could not be decoded.
    #[serde(default)]
    pub id: Value,
    /// Method return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Value, err: &RpcError) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: None,
            error: Some(err.to_error_object()),
        }
    }
}

/// Server-initiated event. Never carries an `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    /// Always `"2.0"`.
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Event name, e.g. `proxy_opened`.
    pub method: String,
    /// Positional array or named object.
    pub params: Value,
}

impl RpcNotification {
    /// Build a notification. Scalars are wrapped in a one-element array.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Array(_) | Value::Object(_) => params,
            Value::Null => Value::Array(Vec::new()),
            other => Value::Array(vec![other]),
        };
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
        }
    }
}

/// One frame written to the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Response to a single request.
    Response(RpcResponse),
    /// Responses to a batch, in input order.
    Batch(Vec<RpcResponse>),
    /// Server-pushed event.
    Notification(RpcNotification),
}

impl Outbound {
    /// Serialize to the text frame sent on the wire.
    pub fn to_text(&self) -> String {
        // Value-only enums cannot fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("null"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_minimal_request() {
        let req = RpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "get_cwd", "id": 1})).unwrap();
        assert_eq!(req.method, "get_cwd");
        assert_eq!(req.id, Some(json!(1)));
        assert!(req.params.is_none());
        assert!(req.expects_response());
    }

    #[test]
    fn null_id_is_a_client_notification() {
        let req = RpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "m", "id": null})).unwrap();
        assert!(!req.expects_response());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = RpcRequest::from_value(json!({"jsonrpc": "1.0", "method": "m", "id": 1})).unwrap_err();
        assert_eq!(err, RpcError::InvalidRequest { detail: "Version must be 2.0".into() });
    }

    #[test]
    fn missing_version_is_rejected() {
        assert_matches!(
            RpcRequest::from_value(json!({"method": "m", "id": 1})),
            Err(RpcError::InvalidRequest { .. })
        );
    }

    #[test]
    fn missing_method_is_rejected() {
        assert_matches!(
            RpcRequest::from_value(json!({"jsonrpc": "2.0", "id": 1})),
            Err(RpcError::InvalidRequest { detail }) if detail.contains("method")
        );
    }

    #[test]
    fn boolean_id_is_rejected() {
        assert_matches!(
            RpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "m", "id": true})),
            Err(RpcError::InvalidRequest { .. })
        );
    }

    #[test]
    fn success_response_omits_error() {
        let text = Outbound::Response(RpcResponse::success(json!(1), json!("/home/runner/repo"))).to_text();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"result":"/home/runner/repo"}"#);
    }

    #[test]
    fn error_response_shape() {
        let resp = RpcResponse::error(Value::Null, &RpcError::Parse { detail: "eof".into() });
        insta::assert_json_snapshot!(resp, @r#"
        {
          "jsonrpc": "2.0",
          "id": null,
          "error": {
            "code": -32700,
            "message": "Parse Error",
            "data": "eof"
          }
        }
        "#);
    }

    #[test]
    fn notification_has_no_id() {
        let text = Outbound::Notification(RpcNotification::new("status", json!({"status": "ready"}))).to_text();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["method"], "status");
        assert_eq!(v["params"]["status"], "ready");
        assert!(v.get("id").is_none());
    }

    #[test]
    fn scalar_notification_params_are_wrapped() {
        let n = RpcNotification::new("ping", json!(3));
        assert_eq!(n.params, json!([3]));
        assert_eq!(RpcNotification::new("ping", Value::Null).params, json!([]));
    }
}
