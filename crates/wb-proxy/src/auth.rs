//! Forward-auth decisions for proxied hostnames.
//!
//! The reverse proxy authenticates the browser, then asks whether the
//! authenticated user may reach the requested host. A positive answer is
//! cached per hash for a fixed lifetime.

use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::sessions::SessionRegistry;
use crate::template::HostTemplate;

/// Outcome of a forward-auth check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// Let the request through.
    Allow,
    /// Host missing or not a proxied hostname.
    BadRequest,
    /// No authenticated user.
    Unauthorized,
    /// User does not own a live session for the hash.
    Forbidden,
}

impl AuthDecision {
    /// HTTP status code for the decision.
    pub fn status(self) -> u16 {
        match self {
            Self::Allow => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
        }
    }
}

struct CacheEntry {
    user: String,
    expires: Instant,
}

/// Forward-auth checker.
pub struct ForwardAuth {
    template: HostTemplate,
    sessions: SessionRegistry,
    ttl: Duration,
    cache: DashMap<String, CacheEntry>,
}

impl ForwardAuth {
    /// Checker resolving hashes through `sessions`.
    pub fn new(template: HostTemplate, sessions: SessionRegistry, ttl: Duration) -> Self {
        Self {
            template,
            sessions,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Decide whether `user` may reach `host`.
    pub async fn authorize(&self, host: Option<&str>, user: Option<&str>) -> AuthDecision {
        let decision = self.decide(host, user).await;
        counter!("proxy_auth_decisions_total", "status" => decision.status().to_string()).increment(1);
        decision
    }

    async fn decide(&self, host: Option<&str>, user: Option<&str>) -> AuthDecision {
        let Some(hash) = host.filter(|h| !h.is_empty()).and_then(|h| self.template.extract(h)) else {
            return AuthDecision::BadRequest;
        };
        let Some(user) = user.filter(|u| !u.is_empty()) else {
            return AuthDecision::Unauthorized;
        };

        if let Some(cached) = self.cached(hash) {
            return if cached == user {
                AuthDecision::Allow
            } else {
                AuthDecision::Forbidden
            };
        }

        let session = match self.sessions.session_by_proxy_hash(hash).await {
            Ok(Some(session)) => session,
            Ok(None) => return AuthDecision::Forbidden,
            Err(e) => {
                warn!(hash, error = %e, "session lookup failed");
                return AuthDecision::Forbidden;
            }
        };
        debug!(hash, session = %session.id, user, "forward-auth lookup");

        if session.user_email == user {
            let _ = self.cache.insert(
                hash.to_string(),
                CacheEntry {
                    user: user.to_string(),
                    expires: Instant::now() + self.ttl,
                },
            );
            AuthDecision::Allow
        } else {
            AuthDecision::Forbidden
        }
    }

    fn cached(&self, hash: &str) -> Option<String> {
        let entry = self.cache.get(hash)?;
        if entry.expires > Instant::now() {
            return Some(entry.user.clone());
        }
        drop(entry);
        let _ = self.cache.remove(hash);
        None
    }
}
