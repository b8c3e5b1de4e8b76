//! # wb-repo
//!
//! The repository side of an editor session.
//!
//! - [`config`]: the `workbench.yml` model, YAML loading and the diff of
//!   reconfigurable areas
//! - [`lock`]: per-repository reader/writer file lock shared across processes
//! - [`editable`]: file CRUD, directory listing and git status confined to the
//!   repository root

#![deny(unsafe_code)]

pub mod config;
pub mod editable;
pub mod errors;
pub mod lock;

pub use config::{ConfigArea, WorkbenchConfig, changed_areas};
pub use editable::{EditableRepository, FileEntry};
pub use errors::{RepoError, Result};
pub use lock::RepoLock;
