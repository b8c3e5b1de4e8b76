//! # wb-server
//!
//! Axum HTTP + `WebSocket` front door of the workbench.
//!
//! - `GET /repo/{id}/edit`: editor `WebSocket`, one [`wb_session::EditorSession`]
//!   per connection
//! - `GET /webhooks/proxy_auth`: forward-auth callback for proxied hostnames
//! - `GET /health`, `GET /metrics`
//! - Graceful shutdown via `CancellationToken`; every open session is closed
//!   before the server returns

#![deny(unsafe_code)]

pub mod connection;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use identity::{HeaderIdentity, Identity, IdentityError, IdentityResolver};
pub use server::{AppState, WorkbenchServer};
pub use shutdown::ShutdownCoordinator;
