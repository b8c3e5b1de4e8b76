//! # wb-container
//!
//! Container lifecycle for workbench sessions.
//!
//! - [`config::ContainerConfig`]: launch description with a canonical content
//!   hash that decides reuse
//! - [`setup`]: permission-gated volumes, environment and resource labels
//! - [`runtime::ContainerRuntime`]: the operations the orchestrator needs from
//!   a container engine, implemented for Docker by [`docker::DockerRuntime`]
//!   and in memory by [`memory::MemoryRuntime`]
//! - [`editor::EditorContainer`]: reuse-or-recreate, start, readiness and
//!   network reconciliation for one editing container
//! - [`routing`]: best-effort route installation inside a container's
//!   network namespace

#![deny(unsafe_code)]

pub mod config;
pub mod docker;
pub mod editor;
pub mod errors;
pub mod labels;
pub mod memory;
pub mod routing;
pub mod runtime;
pub mod setup;

pub use config::ContainerConfig;
pub use editor::{EditorContainer, EditorOptions};
pub use errors::{ContainerError, Result};
pub use labels::{ResourceKind, ResourceRef};
pub use runtime::{ContainerInfo, ContainerRuntime, ExecChunk, ExecOutput, ExecSpec, ExecStream};
