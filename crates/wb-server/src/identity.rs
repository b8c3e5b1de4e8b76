//! Who is opening an editor, and on what.
//!
//! Authentication happens in front of this server. The shipped resolver
//! trusts the identity headers the fronting auth proxy sets.

use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use axum::http::StatusCode;
use wb_container::{ResourceKind, ResourceRef};
use wb_core::identity::Principal;

/// Authenticated user name.
pub const USER_HEADER: &str = "x-forwarded-user";
/// Authenticated user's email. Falls back to the user name.
pub const EMAIL_HEADER: &str = "x-forwarded-email";
/// Comma separated permission grants.
pub const PERMISSIONS_HEADER: &str = "x-forwarded-permissions";

/// Everything a session needs to know about its caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated caller.
    pub principal: Principal,
    /// Repository being edited.
    pub resource: ResourceRef,
    /// Host path of the repository checkout.
    pub repo_path: PathBuf,
}

/// Why an editor connection was refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    /// No authenticated user on the request.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Repository id cannot name a checkout.
    #[error("invalid repository id '{0}'")]
    InvalidResource(String),

    /// Repository has no checkout.
    #[error("repository '{0}' not found")]
    NotFound(String),
}

impl IdentityError {
    /// HTTP status for the refusal.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidResource(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidResource(_) => "invalid_resource",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Resolves the caller and target of an editor connection.
pub trait IdentityResolver: Send + Sync {
    /// Identity for a request on repository `repo_id`.
    fn resolve(&self, headers: &HeaderMap, repo_id: &str) -> Result<Identity, IdentityError>;
}

/// Trusts `X-Forwarded-*` headers and maps repository `{id}` of user
/// `{owner}` to `{root}/{owner}/{id}`.
#[derive(Clone, Debug)]
pub struct HeaderIdentity {
    root: PathBuf,
}

impl HeaderIdentity {
    /// Resolver over checkouts under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Checkout root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap, repo_id: &str) -> Result<Identity, IdentityError> {
        let username = header(headers, USER_HEADER).ok_or(IdentityError::Unauthenticated)?;
        if !is_path_segment(username) {
            return Err(IdentityError::Unauthenticated);
        }
        if !is_path_segment(repo_id) {
            return Err(IdentityError::InvalidResource(repo_id.to_string()));
        }
        let email = header(headers, EMAIL_HEADER).unwrap_or(username);

        let mut principal = Principal::new(username, email);
        if let Some(grants) = header(headers, PERMISSIONS_HEADER) {
            for grant in grants.split(',').map(str::trim).filter(|g| !g.is_empty()) {
                principal = principal.with_permission(grant);
            }
        }

        let repo_path = self.root.join(username).join(repo_id);
        if !repo_path.is_dir() {
            return Err(IdentityError::NotFound(repo_id.to_string()));
        }
        Ok(Identity {
            principal,
            resource: ResourceRef {
                id: repo_id.to_string(),
                name: repo_id.to_string(),
                owner: username.to_string(),
                kind: ResourceKind::Repository,
            },
            repo_path,
        })
    }
}
