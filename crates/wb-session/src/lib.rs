//! # wb-session
//!
//! One [`EditorSession`] per editor WebSocket connection.
//!
//! - [`session`]: init and teardown sequencing, repository file operations
//! - [`relay`]: applies process manager notifications to proxy registrations
//!   and forwards them to the client
//! - [`tasks`]: container exec tasks streamed as notifications
//! - [`processes`]: interactive processes, stdio streams, language servers
//! - [`reconfigure`]: workbench config hot reload and network reconciliation
//! - [`watcher`]: repository file watching
//! - [`handlers`]: the JSON-RPC method table

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod handlers;
pub mod processes;
pub mod reconfigure;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod tasks;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::SessionContext;
pub use errors::{Result, SessionError};
pub use handlers::register_all;
pub use session::EditorSession;
pub use supervisor::Supervisor;
pub use watcher::FileChange;
