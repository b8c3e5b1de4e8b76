//! # wb-rpc
//!
//! JSON-RPC 2.0 over a single bidirectional connection.
//!
//! - [`types`]: request, response and notification envelopes
//! - [`errors`]: standard error codes and the handler error type
//! - [`params`]: positional-or-named parameter binding
//! - [`registry`]: static method table built once per connection
//! - [`multiplexer`]: dispatches inbound text (single or batch) and merges
//!   responses with server-pushed notifications into one ordered stream

#![deny(unsafe_code)]

pub mod errors;
pub mod multiplexer;
pub mod params;
pub mod registry;
pub mod types;

pub use errors::RpcError;
pub use multiplexer::{Multiplexer, Notifier, OutboundStream};
pub use params::Params;
pub use registry::{MethodHandler, MethodRegistry};
pub use types::{Outbound, RpcErrorObject, RpcNotification, RpcRequest, RpcResponse};
