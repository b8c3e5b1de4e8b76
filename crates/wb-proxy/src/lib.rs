//! # wb-proxy
//!
//! Exposes ports opened inside session containers through the reverse proxy.
//!
//! - [`hash::ProxyHasher`]: salted, per-session hash naming each exposed port
//! - [`template::HostTemplate`]: public hostname pattern and hash extraction
//! - [`store::KeyValueStore`]: the proxy's key/value control plane, backed by
//!   Redis ([`store::RedisStore`]) or memory ([`store::MemoryStore`])
//! - [`registrar::ProxyRegistrar`]: writes and deletes routing keys, polls the
//!   proxy until the backend is UP
//! - [`sessions::SessionRegistry`]: which session owns which hashes
//! - [`auth::ForwardAuth`]: the forward-auth decision with a TTL cache

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod hash;
pub mod registrar;
pub mod sessions;
pub mod store;
pub mod template;

pub use auth::{AuthDecision, ForwardAuth};
pub use errors::{ProxyError, Result};
pub use hash::ProxyHasher;
pub use registrar::ProxyRegistrar;
pub use sessions::{SessionRecord, SessionRegistry};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use template::HostTemplate;
