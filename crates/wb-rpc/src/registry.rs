//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::RpcError;
use crate::params::Params;

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the bound params.
    async fn handle(&self, params: Params) -> Result<Value, RpcError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Params) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync,
{
    async fn handle(&self, params: Params) -> Result<Value, RpcError> {
        (self.0)(params).await
    }
}

/// Registry mapping method names to handlers.
///
/// Built once per connection and immutable afterwards.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    timeout: Option<Duration>,
}

impl MethodRegistry {
    /// Create an empty registry with no handler timeout.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: None,
        }
    }

    /// Fail calls that run longer than `timeout` with an internal error.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a handler for a method name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Register a closure returning a boxed future.
    pub fn register_fn<F>(&mut self, method: &str, f: F)
    where
        F: Fn(Params) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync + 'static,
    {
        self.register(method, FnHandler(f));
    }

    /// Run the handler registered under `method`.
    pub async fn call(&self, method: &str, params: Params) -> Result<Value, RpcError> {
        counter!("rpc_requests_total", "method" => method.to_owned()).increment(1);

        let Some(handler) = self.handlers.get(method) else {
            counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => "method_not_found").increment(1);
            return Err(RpcError::MethodNotFound {
                method: method.to_owned(),
            });
        };

        let start = Instant::now();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.handle(params)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    error!(method, "RPC handler timed out after {limit:?}");
                    Err(RpcError::Internal {
                        message: format!("Handler for '{method}' timed out"),
                    })
                }
            },
            None => handler.handle(params).await,
        };

        if let Err(err) = &result {
            counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => err.code().to_string()).increment(1);
        }

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.to_owned()).record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        result
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde_json::json;

    // ── Test handler implementations ────────────────────────────────

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, params: Params) -> Result<Value, RpcError> {
            params.get(0, "value")
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _params: Params) -> Result<Value, RpcError> {
            Err(RpcError::internal("boom"))
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_and_call() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);

        let out = reg.call("echo", Params::from_value(Some(json!(["hi"]))).unwrap()).await;
        assert_eq!(out, Ok(json!("hi")));
    }

    #[tokio::test]
    async fn unknown_method() {
        let reg = MethodRegistry::new();
        assert_matches!(
            reg.call("nope", Params::default()).await,
            Err(RpcError::MethodNotFound { method }) if method == "nope"
        );
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);
        assert_eq!(reg.call("fail", Params::default()).await, Err(RpcError::internal("boom")));
    }

    #[tokio::test]
    async fn closure_handlers() {
        let mut reg = MethodRegistry::new();
        reg.register_fn("add", |p| {
            async move {
                let a: i64 = p.get(0, "a")?;
                let b: i64 = p.get(1, "b")?;
                Ok(json!(a + b))
            }
            .boxed()
        });
        let out = reg.call("add", Params::from_value(Some(json!({"a": 2, "b": 3}))).unwrap()).await;
        assert_eq!(out, Ok(json!(5)));
    }

    #[tokio::test]
    async fn timeout_becomes_internal_error() {
        tokio::time::pause();
        let mut reg = MethodRegistry::new().with_timeout(Duration::from_secs(1));
        reg.register_fn("slow", |_| {
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            }
            .boxed()
        });
        assert_matches!(reg.call("slow", Params::default()).await, Err(RpcError::Internal { message }) if message.contains("timed out"));
    }

    #[test]
    fn methods_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("b", EchoHandler);
        reg.register("a", EchoHandler);
        assert_eq!(reg.methods(), vec!["a", "b"]);
        assert!(reg.has_method("a"));
        assert!(!reg.has_method("c"));
    }
}
