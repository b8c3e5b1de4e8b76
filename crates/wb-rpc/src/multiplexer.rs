//! Per-connection JSON-RPC engine.
//!
//! [`Multiplexer::dispatch`] decodes inbound text, runs the calls (batch
//! elements concurrently) and enqueues the responses. [`Notifier::notify`]
//! enqueues server-pushed events on the same queue, so a single consumer of
//! [`OutboundStream`] sees responses and notifications in enqueue order.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::errors::RpcError;
use crate::params::Params;
use crate::registry::MethodRegistry;
use crate::types::{Outbound, RpcNotification, RpcRequest, RpcResponse};

enum Envelope {
    Frame(Outbound),
    End,
}

/// Cloneable handle for enqueuing notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Notifier {
    /// Create a connected notifier/stream pair.
    pub fn channel() -> (Self, OutboundStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, OutboundStream { rx, ended: false })
    }

    /// Enqueue a server-initiated call. `params` is an object (named) or an
    /// array (positional); a scalar is sent as a one-element array.
    pub fn notify(&self, method: &str, params: Value) {
        self.send(Outbound::Notification(RpcNotification::new(method, params)));
    }

    /// Enqueue the terminal sentinel. The stream yields `None` once it reaches
    /// it; frames enqueued afterwards are never delivered.
    pub fn end(&self) {
        if self.tx.send(Envelope::End).is_err() {
            debug!("outbound stream already dropped");
        }
    }

    fn send(&self, frame: Outbound) {
        if self.tx.send(Envelope::Frame(frame)).is_err() {
            debug!("outbound stream dropped, discarding frame");
        }
    }
}

/// Single-consumer view of the outbound queue.
pub struct OutboundStream {
    rx: mpsc::UnboundedReceiver<Envelope>,
    ended: bool,
}

impl OutboundStream {
    /// Next frame, or `None` after [`Notifier::end`] or once every notifier
    /// is dropped.
    pub async fn next(&mut self) -> Option<Outbound> {
        if self.ended {
            return None;
        }
        match self.rx.recv().await {
            Some(Envelope::Frame(frame)) => Some(frame),
            Some(Envelope::End) | None => {
                self.ended = true;
                self.rx.close();
                None
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Outbound> {
        if self.ended {
            return None;
        }
        match self.rx.try_recv() {
            Ok(Envelope::Frame(frame)) => Some(frame),
            Ok(Envelope::End) => {
                self.ended = true;
                None
            }
            Err(_) => None,
        }
    }
}

/// Dispatches inbound payloads against a [`MethodRegistry`].
#[derive(Clone)]
pub struct Multiplexer {
    registry: Arc<MethodRegistry>,
    notifier: Notifier,
}

impl Multiplexer {
    /// Bind a registry to the queue behind `notifier`.
    pub fn new(registry: Arc<MethodRegistry>, notifier: Notifier) -> Self {
        Self { registry, notifier }
    }

    /// The notifier feeding this multiplexer's queue.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Shorthand for [`Notifier::notify`].
    pub fn notify(&self, method: &str, params: Value) {
        self.notifier.notify(method, params);
    }

    /// Shorthand for [`Notifier::end`].
    pub fn end(&self) {
        self.notifier.end();
    }

    /// Handle one inbound text frame and enqueue whatever it produces.
    pub async fn dispatch(&self, raw: &str) {
        if let Some(frame) = self.handle_text(raw).await {
            self.notifier.send(frame);
        }
    }

    /// Handle one inbound text frame without enqueuing.
    ///
    /// Returns `None` when nothing should be written back: a lone client
    /// notification, or a batch made only of client notifications.
    #[instrument(skip_all, fields(len = raw.len()))]
    pub async fn handle_text(&self, raw: &str) -> Option<Outbound> {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                let err = RpcError::Parse { detail: e.to_string() };
                return Some(Outbound::Response(RpcResponse::error(Value::Null, &err)));
            }
        };

        match parsed {
            Value::Object(_) => self.handle_value(parsed).await.map(Outbound::Response),
            Value::Array(items) if items.is_empty() => {
                let err = RpcError::InvalidRequest {
                    detail: "empty batch".into(),
                };
                Some(Outbound::Response(RpcResponse::error(Value::Null, &err)))
            }
            Value::Array(items) => {
                let responses: Vec<RpcResponse> = join_all(items.into_iter().map(|item| self.handle_value(item)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
                (!responses.is_empty()).then_some(Outbound::Batch(responses))
            }
            _ => {
                let err = RpcError::InvalidRequest { detail: String::new() };
                Some(Outbound::Response(RpcResponse::error(Value::Null, &err)))
            }
        }
    }

    async fn handle_value(&self, value: Value) -> Option<RpcResponse> {
        let request = match RpcRequest::from_value(value) {
            Ok(req) => req,
            Err(err) => return Some(RpcResponse::error(Value::Null, &err)),
        };

        // An unknown method is reported before its params are looked at.
        let params = if self.registry.has_method(&request.method) {
            Params::from_value(request.params)
        } else {
            Params::from_value(None)
        };
        let outcome = match params {
            Ok(params) => self.registry.call(&request.method, params).await,
            Err(err) => Err(err),
        };

        let id = request.id?;
        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(err) => RpcResponse::error(id, &err),
        })
    }
}
