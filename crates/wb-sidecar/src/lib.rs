//! # wb-sidecar
//!
//! Typed client for the process manager running inside every workbench
//! container.
//!
//! - [`ProcessManager`]: run/resize/kill/pause/resume/clear/wait over HTTP,
//!   a readiness probe, and a local process mirror kept current by the
//!   `/notifications` WebSocket
//! - [`StreamHandler`]: one reconnecting WebSocket carrying a process's stdio
//!   or an LSP channel
//! - [`LspServiceHandler`]: at most one [`StreamHandler`] per language

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod lsp;
pub mod state;
pub mod stream;
pub mod types;

pub use client::ProcessManager;
pub use errors::{Result, SidecarError};
pub use lsp::LspServiceHandler;
pub use stream::{ReceiveFn, StreamFrame, StreamHandler};
pub use types::{ChildProcess, Notification, NotificationType, Process, RunRequest};
