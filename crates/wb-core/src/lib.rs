//! # wb-core
//!
//! Foundation types shared by every workbench crate.
//!
//! - **Event bus**: [`events::EventBus`], a typed publish/subscribe primitive with
//!   concurrent fan-out to sync or async listeners
//! - **Identity**: [`identity::Principal`], the caller and its permission grants
//! - **Ids**: [`ids::SessionId`] branded newtype and [`ids::short_id`] for task ids
//! - **Retry**: backoff math plus an async executor for bounded retries
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod events;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod retry;
