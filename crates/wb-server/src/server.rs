//! `WorkbenchServer`: Axum router and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wb_proxy::ForwardAuth;
use wb_session::SessionContext;
use wb_settings::WorkbenchSettings;

use crate::connection;
use crate::health::{self, HealthResponse};
use crate::identity::IdentityResolver;
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;

/// Host the reverse proxy was asked for.
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";
/// User the reverse proxy authenticated.
pub const FORWARDED_USER_HEADER: &str = "x-forwarded-user";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Services handed to every session.
    pub ctx: SessionContext,
    /// Forward-auth checker.
    pub auth: Arc<ForwardAuth>,
    /// Caller resolution for editor connections.
    pub identity: Arc<dyn IdentityResolver>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle; `/metrics` is empty without one.
    pub metrics: Option<PrometheusHandle>,
    /// Largest accepted inbound message.
    pub max_message_size: usize,
}

/// The workbench HTTP + `WebSocket` server.
pub struct WorkbenchServer {
    bind: String,
    state: AppState,
}

impl WorkbenchServer {
    /// Server over `ctx` configured from `settings`.
    pub fn new(
        settings: &WorkbenchSettings,
        ctx: SessionContext,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let auth = ForwardAuth::new(
            ctx.registrar.template().clone(),
            ctx.sessions.clone(),
            Duration::from_secs(settings.proxy.auth_cache_ttl_secs),
        );
        Self {
            bind: format!("{}:{}", settings.server.host, settings.server.port),
            state: AppState {
                ctx,
                auth: Arc::new(auth),
                identity,
                shutdown: ShutdownCoordinator::new(),
                start_time: Instant::now(),
                metrics: None,
                max_message_size: settings.server.max_message_size,
            },
        }
    }

    /// Render `handle` at `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/repo/{id}/edit", get(edit_handler))
            .route("/webhooks/proxy_auth", get(proxy_auth_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind and serve in the background until shutdown is signalled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();
        info!(%addr, "workbench server listening");

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.shutdown.open_connections()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.as_ref().map(PrometheusHandle::render).unwrap_or_default()
}

/// GET /repo/{id}/edit
///
/// The caller is resolved before the upgrade is looked at so refusals are
/// plain HTTP errors.
async fn edit_handler(
    Path(repo_id): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let identity = match state.identity.resolve(&headers, &repo_id) {
        Ok(identity) => identity,
        Err(e) => {
            counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => e.reason()).increment(1);
            warn!(repo = %repo_id, error = %e, "editor connection refused");
            return (e.status(), e.to_string()).into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    debug!(repo = %repo_id, user = %identity.principal.username, "upgrading editor connection");

    let AppState {
        ctx,
        shutdown,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size).on_upgrade(move |socket| {
        let tracked = shutdown.clone();
        tracked.track_connection(connection::serve(socket, ctx, identity, shutdown))
    })
}

/// GET /webhooks/proxy_auth
async fn proxy_auth_handler(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let decision = state
        .auth
        .authorize(header(FORWARDED_HOST_HEADER), header(FORWARDED_USER_HEADER))
        .await;
    StatusCode::from_u16(decision.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{HeaderIdentity, USER_HEADER};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wb_container::memory::MemoryRuntime;
    use wb_proxy::MemoryStore;

    fn make_server() -> (tempfile::TempDir, WorkbenchServer) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = WorkbenchSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings.proxy.host_template = "{hash}.apps.test".into();
        settings.proxy.hash_salt = "salt".into();
        let ctx = SessionContext::from_settings(
            Arc::new(MemoryRuntime::new("127.0.0.1")),
            Arc::new(MemoryStore::new()),
            &settings,
        )
        .unwrap();
        let server = WorkbenchServer::new(&settings, ctx, Arc::new(HeaderIdentity::new(dir.path())));
        (dir, server)
    }

    async fn get(server: &WorkbenchServer, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut req = Request::builder().uri(uri);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        server.router().oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_dir, server) = make_server();
        let resp = get(&server, "/health", &[]).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_empty() {
        let (_dir, server) = make_server();
        let resp = get(&server, "/metrics", &[]).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (_dir, server) = make_server();
        assert_eq!(get(&server, "/nonexistent", &[]).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_requires_identity() {
        let (_dir, server) = make_server();
        let resp = get(&server, "/repo/r1/edit", &[]).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn edit_of_missing_checkout_is_404() {
        let (_dir, server) = make_server();
        let resp = get(&server, "/repo/r1/edit", &[(USER_HEADER, "ada")]).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_without_upgrade_is_rejected() {
        let (dir, server) = make_server();
        std::fs::create_dir_all(dir.path().join("ada").join("r1")).unwrap();
        let resp = get(&server, "/repo/r1/edit", &[(USER_HEADER, "ada")]).await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn edit_refused_during_shutdown() {
        let (_dir, server) = make_server();
        server.shutdown().shutdown();
        let resp = get(&server, "/repo/r1/edit", &[(USER_HEADER, "ada")]).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn proxy_auth_decisions() {
        let (_dir, server) = make_server();
        let sessions = &server.state().ctx.sessions;
        let id = sessions.start_session("ada@example.org").await.unwrap();
        sessions.add_proxy_hash(id.as_str(), "abc123").await.unwrap();

        let check = |host: Option<&'static str>, user: Option<&'static str>| {
            let mut headers = Vec::new();
            if let Some(host) = host {
                headers.push((FORWARDED_HOST_HEADER, host));
            }
            if let Some(user) = user {
                headers.push((FORWARDED_USER_HEADER, user));
            }
            let server = &server;
            async move { get(server, "/webhooks/proxy_auth", &headers).await.status() }
        };

        assert_eq!(check(Some("abc123.apps.test"), Some("ada@example.org")).await, StatusCode::OK);
        assert_eq!(check(Some("abc123.apps.test"), Some("eve@example.org")).await, StatusCode::FORBIDDEN);
        assert_eq!(check(Some("zzz.apps.test"), Some("ada@example.org")).await, StatusCode::FORBIDDEN);
        assert_eq!(check(Some("abc123.apps.test"), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(check(None, Some("ada@example.org")).await, StatusCode::BAD_REQUEST);
        assert_eq!(check(Some("elsewhere.org"), Some("ada@example.org")).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let (_dir, server) = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        server.shutdown().shutdown();
        handle.await.unwrap();
    }
}
