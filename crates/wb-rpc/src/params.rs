//! Parameter binding for positional or named calls.
//!
//! A handler declares each argument by position and name. Positional calls
//! (`"params": [..]`) bind by index, named calls (`"params": {..}`) by key.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::RpcError;

/// Call arguments in either JSON-RPC form.
#[derive(Clone, Debug, PartialEq)]
pub enum Params {
    /// `"params": [..]`, or absent.
    Positional(Vec<Value>),
    /// `"params": {..}`.
    Named(Map<String, Value>),
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl Params {
    /// Classify raw `params`. Anything but an array, object or absence is
    /// rejected.
    pub fn from_value(params: Option<Value>) -> Result<Self, RpcError> {
        match params {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Array(items)) => Ok(Self::Positional(items)),
            Some(Value::Object(map)) => Ok(Self::Named(map)),
            Some(_) => Err(RpcError::invalid_params("Params must be list or dict")),
        }
    }

    fn raw(&self, index: usize, name: &str) -> Option<&Value> {
        match self {
            Self::Positional(items) => items.get(index),
            Self::Named(map) => map.get(name),
        }
        .filter(|v| !v.is_null())
    }

    /// Required argument.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, RpcError> {
        self.get_opt(index, name)?
            .ok_or_else(|| RpcError::invalid_params(format!("missing required argument '{name}'")))
    }

    /// Optional argument; absent and `null` both yield `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<Option<T>, RpcError> {
        self.raw(index, name)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| RpcError::invalid_params(format!("argument '{name}': {e}")))
            })
            .transpose()
    }

    /// Optional argument falling back to `default`.
    pub fn get_or<T: DeserializeOwned>(&self, index: usize, name: &str, default: T) -> Result<T, RpcError> {
        Ok(self.get_opt(index, name)?.unwrap_or(default))
    }

    /// Number of supplied arguments.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(items) => items.len(),
            Self::Named(map) => map.len(),
        }
    }

    /// Whether no arguments were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
