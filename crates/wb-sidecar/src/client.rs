//! HTTP + notification client for the in-container process manager.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wb_core::events::{EventBus, ListenerHandle};
use wb_core::retry::{BackoffPolicy, calculate_backoff_delay, retry_async};

use crate::errors::{Result, SidecarError};
use crate::lsp::LspServiceHandler;
use crate::state::{ProcessTable, apply_notification};
use crate::types::{Notification, Process, RunRequest};

const RECONNECT_BASE_MS: u64 = 250;
const RECONNECT_MAX_MS: u64 = 5000;

#[derive(Deserialize)]
struct LspStarted {
    port: u16,
    lsps: Vec<String>,
}

struct Inner {
    ip: String,
    port: u16,
    base_url: String,
    http: reqwest::Client,
    ready_policy: BackoffPolicy,
    processes: RwLock<ProcessTable>,
    notifications: EventBus<Notification>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Typed client for one container's process manager.
///
/// Cheap to clone; clones share the process mirror and notification bus.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager").finish_non_exhaustive()
    }
}

impl ProcessManager {
    /// Client for the process manager at `ip:port`.
    ///
    /// The notification socket is not opened until
    /// [`start_notifications`](Self::start_notifications).
    pub fn new(ip: impl Into<String>, port: u16, ready_policy: BackoffPolicy) -> Self {
        let ip = ip.into();
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                base_url: format!("http://{ip}:{port}"),
                ip,
                port,
                http,
                ready_policy,
                processes: RwLock::new(ProcessTable::new()),
                notifications: EventBus::new(),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Container address.
    pub fn ip(&self) -> &str {
        &self.inner.ip
    }

    /// Process manager port.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Snapshot of every tracked process.
    pub fn processes(&self) -> BTreeMap<u32, Process> {
        self.inner.processes.read().clone()
    }

    /// Snapshot of one tracked process.
    pub fn process(&self, pid: u32) -> Option<Process> {
        self.inner.processes.read().get(&pid).cloned()
    }

    /// Bus republishing every notification after it has been applied to the
    /// process mirror.
    pub fn notifications(&self) -> &EventBus<Notification> {
        &self.inner.notifications
    }

    /// Register an async listener on [`notifications`](Self::notifications).
    pub fn on_notification<F, Fut>(&self, f: F) -> ListenerHandle<Notification>
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.notifications.listen_async(f)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Probe `GET /` until it answers, retrying connection failures only.
    pub async fn ready(&self) -> bool {
        let result = retry_async(&self.inner.ready_policy, SidecarError::is_connect, || async {
            let _ = self
                .inner
                .http
                .get(self.url("/"))
                .send()
                .await
                .map_err(|source| SidecarError::Request { operation: "ready", source })?;
            Ok::<(), SidecarError>(())
        })
        .await;
        if let Err(e) = &result {
            warn!(ip = %self.inner.ip, error = %e, "process manager not reachable");
        }
        result.is_ok()
    }

    /// Start a process and track it.
    #[instrument(skip(self, request), fields(cmd = %request.cmd))]
    pub async fn run(&self, request: &RunRequest) -> Result<Process> {
        let resp = self
            .inner
            .http
            .post(self.url("/"))
            .json(request)
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation: "run", source })?;
        if resp.status() != StatusCode::CREATED {
            return Err(SidecarError::Status {
                operation: "run",
                status: resp.status().as_u16(),
            });
        }
        let proc: Process = resp.json().await.map_err(|e| SidecarError::Protocol {
            operation: "run",
            detail: e.to_string(),
        })?;
        debug!(pid = proc.pid, "process started");
        let _ = self.inner.processes.write().insert(proc.pid, proc.clone());
        Ok(proc)
    }

    /// Resize a process's terminal.
    pub async fn resize(&self, pid: u32, cols: u16, rows: u16) -> Result<()> {
        let resp = self
            .inner
            .http
            .post(self.url(&format!("/{pid}/resize")))
            .json(&serde_json::json!({ "cols": cols, "rows": rows }))
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation: "resize", source })?;
        expect_ok("resize", resp.status())
    }

    /// Signal a process.
    pub async fn kill(&self, pid: u32, signal: &str) -> Result<Value> {
        let resp = self
            .inner
            .http
            .post(self.url(&format!("/{pid}/kill")))
            .query(&[("signal", signal)])
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation: "kill", source })?;
        expect_ok("kill", resp.status())?;
        // Some versions answer with an empty body
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    /// Suspend a process.
    pub async fn pause(&self, pid: u32) -> Result<()> {
        self.post_empty("pause", pid).await
    }

    /// Resume a suspended process.
    pub async fn resume(&self, pid: u32) -> Result<()> {
        self.post_empty("resume", pid).await
    }

    /// Clear a process's output buffer.
    pub async fn clear(&self, pid: u32) -> Result<()> {
        self.post_empty("clear", pid).await
    }

    /// Wait for a process to exit and return its exit code.
    ///
    /// Returns [`SidecarError::Timeout`] when `timeout` (seconds) elapses first.
    pub async fn wait(&self, pid: u32, timeout: Option<u64>) -> Result<i64> {
        let mut req = self.inner.http.get(self.url(&format!("/{pid}/wait")));
        if let Some(timeout) = timeout {
            req = req.query(&[("timeout", timeout)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation: "wait", source })?;
        expect_ok("wait", resp.status())?;
        let body: Value = resp.json().await.map_err(|e| SidecarError::Protocol {
            operation: "wait",
            detail: e.to_string(),
        })?;
        if let Some(code) = body.get("exitCode").and_then(Value::as_i64) {
            return Ok(code);
        }
        if body.get("detail").and_then(Value::as_str) == Some("Timeout") {
            return Err(SidecarError::Timeout { pid });
        }
        Err(SidecarError::Protocol {
            operation: "wait",
            detail: body.to_string(),
        })
    }

    /// Start the language server proxy with `{name: command}` entries.
    #[instrument(skip(self, servers), fields(count = servers.len()))]
    pub async fn start_lsp_service(&self, servers: &BTreeMap<String, String>) -> Result<LspServiceHandler> {
        let resp = self
            .inner
            .http
            .post(self.url("/startLsp"))
            .json(servers)
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation: "startLsp", source })?;
        expect_ok("startLsp", resp.status())?;
        let started: LspStarted = resp.json().await.map_err(|e| SidecarError::Protocol {
            operation: "startLsp",
            detail: e.to_string(),
        })?;
        info!(port = started.port, lsps = ?started.lsps, "language server proxy started");
        Ok(LspServiceHandler::new(
            self.inner.ip.clone(),
            started.port,
            started.lsps.into_iter().collect::<BTreeSet<_>>(),
        ))
    }

    /// WebSocket URL carrying `pid`'s stdio.
    pub fn attach_url(&self, pid: u32) -> String {
        format!("ws://{}:{}/{pid}/attach", self.inner.ip, self.inner.port)
    }

    // ── Notification loop ───────────────────────────────────────────

    /// Open the `/notifications` socket in the background. Idempotent.
    pub fn start_notifications(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(notification_loop(Arc::clone(&self.inner))));
    }

    /// Apply a notification to the mirror and republish it.
    ///
    /// Notifications that reference untracked processes are still
    /// republished; only the mirror update is skipped.
    pub async fn handle_notification(&self, notif: Notification) {
        handle_notification(&self.inner, notif).await;
    }

    /// Stop the notification loop and wait for it to exit.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    async fn post_empty(&self, operation: &'static str, pid: u32) -> Result<()> {
        let resp = self
            .inner
            .http
            .post(self.url(&format!("/{pid}/{operation}")))
            .send()
            .await
            .map_err(|source| SidecarError::Request { operation, source })?;
        expect_ok(operation, resp.status())
    }
}

fn expect_ok(operation: &'static str, status: StatusCode) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(SidecarError::Status {
            operation,
            status: status.as_u16(),
        })
    }
}

async fn handle_notification(inner: &Inner, notif: Notification) {
    let applied = apply_notification(&mut inner.processes.write(), &notif);
    if let Err(e) = applied {
        debug!(kind = notif.kind.as_str(), pid = ?notif.pid, error = %e, "notification not applied to mirror");
    }
    inner.notifications.fire(notif).await;
}

async fn notification_loop(inner: Arc<Inner>) {
    let url = format!("ws://{}:{}/notifications", inner.ip, inner.port);
    let mut attempt: u32 = 0;
    loop {
        let connected = tokio::select! {
            () = inner.cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                attempt = 0;
                debug!(%url, "notification socket connected");
                let (mut sink, mut stream) = ws.split();
                loop {
                    let message = tokio::select! {
                        () = inner.cancel.cancelled() => {
                            let _ = sink.close().await;
                            return;
                        }
                        message = stream.next() => message,
                    };
                    match message {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<Notification>(text.as_str()) {
                            Ok(notif) => handle_notification(&inner, notif).await,
                            Err(e) => warn!(error = %e, payload = %text.as_str(), "unhandled notification"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "notification socket read failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => debug!(%url, error = %e, "notification socket connect failed"),
        }

        let delay = calculate_backoff_delay(attempt, RECONNECT_BASE_MS, RECONNECT_MAX_MS);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_millis(delay)) => {}
        }
    }
    debug!(%url, "notification loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::types::NotificationType;

    fn client_for(server: &MockServer) -> ProcessManager {
        let addr = server.address();
        ProcessManager::new(addr.ip().to_string(), addr.port(), BackoffPolicy::new(3, 10))
    }

    fn process_json(pid: u32) -> Value {
        json!({"pid": pid, "name": "bash", "cmd": "bash", "args": ["-l"], "ports": [], "children": {}})
    }

    // ── HTTP commands ───────────────────────────────────────────────

    #[tokio::test]
    async fn run_tracks_process() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(process_json(42)))
            .mount(&server)
            .await;

        let pm = client_for(&server);
        let proc = pm.run(&RunRequest::new("bash", vec!["-l".into()])).await.unwrap();
        assert_eq!(proc.pid, 42);
        assert_eq!(pm.process(42), Some(proc));
    }

    #[tokio::test]
    async fn run_non_created_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(process_json(1)))
            .mount(&server)
            .await;

        let pm = client_for(&server);
        assert_matches!(
            pm.run(&RunRequest::new("bash", vec![])).await,
            Err(SidecarError::Status { operation: "run", status: 200 })
        );
        assert!(pm.processes().is_empty());
    }

    #[tokio::test]
    async fn resize_posts_dimensions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/7/resize"))
            .and(body_json(json!({"cols": 120, "rows": 40})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).resize(7, 120, 40).await.unwrap();
    }

    #[tokio::test]
    async fn kill_sends_signal_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/7/kill"))
            .and(query_param("signal", "SIGTERM"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"killed": true})))
            .mount(&server)
            .await;

        let out = client_for(&server).kill(7, "SIGTERM").await.unwrap();
        assert_eq!(out["killed"], true);
    }

    #[tokio::test]
    async fn pause_resume_clear_require_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/3/pause")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
        Mock::given(method("POST")).and(path("/3/resume")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        Mock::given(method("POST")).and(path("/3/clear")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let pm = client_for(&server);
        pm.pause(3).await.unwrap();
        assert_matches!(pm.resume(3).await, Err(SidecarError::Status { status: 404, .. }));
        pm.clear(3).await.unwrap();
    }

    #[tokio::test]
    async fn wait_returns_exit_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/9/wait"))
            .and(query_param("timeout", "30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exitCode": 3})))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).wait(9, Some(30)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn wait_timeout_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/9/wait"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "Timeout"})))
            .mount(&server)
            .await;

        assert_matches!(client_for(&server).wait(9, Some(1)).await, Err(SidecarError::Timeout { pid: 9 }));
    }

    #[tokio::test]
    async fn wait_other_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/9/wait"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "Nope"})))
            .mount(&server)
            .await;

        assert_matches!(client_for(&server).wait(9, None).await, Err(SidecarError::Protocol { .. }));
    }

    #[tokio::test]
    async fn start_lsp_service_returns_handler() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/startLsp"))
            .and(body_json(json!({"python": "pylsp"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"port": 3001, "lsps": ["python"]})))
            .mount(&server)
            .await;

        let pm = client_for(&server);
        let servers = BTreeMap::from([("python".to_owned(), "pylsp".to_owned())]);
        let lsp = pm.start_lsp_service(&servers).await.unwrap();
        assert_eq!(lsp.port(), 3001);
        assert!(lsp.available().contains("python"));
    }

    #[tokio::test]
    async fn ready_succeeds_against_live_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
        assert!(client_for(&server).ready().await);
    }

    #[tokio::test]
    async fn ready_gives_up_on_refused_connections() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pm = ProcessManager::new("127.0.0.1", port, BackoffPolicy::new(2, 10));
        assert!(!pm.ready().await);
    }

    #[test]
    fn attach_url_shape() {
        let pm = ProcessManager::new("10.1.2.3", 3000, BackoffPolicy::default());
        assert_eq!(pm.attach_url(55), "ws://10.1.2.3:3000/55/attach");
    }

    // ── Notifications ───────────────────────────────────────────────

    #[tokio::test]
    async fn notifications_update_mirror_then_fire() {
        let pm = ProcessManager::new("127.0.0.1", 1, BackoffPolicy::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let pm2 = pm.clone();
        let _h = pm.on_notification(move |n: Notification| {
            let f = f.clone();
            let pm2 = pm2.clone();
            async move {
                if n.kind == NotificationType::ProcessExited {
                    assert!(pm2.process(42).is_none());
                }
                let _ = f.fetch_add(1, Ordering::SeqCst);
            }
        });

        pm.handle_notification(serde_json::from_value(json!({"pid": 42, "type": "PROCESS_STARTED", "data": process_json(42)})).unwrap()).await;
        pm.handle_notification(serde_json::from_value(json!({"pid": 42, "type": "PORTS_CHANGED", "data": [8080]})).unwrap()).await;
        assert_eq!(pm.process(42).unwrap().ports, vec![8080]);
        pm.handle_notification(serde_json::from_value(json!({"pid": 42, "type": "PROCESS_EXITED", "data": null})).unwrap()).await;
        assert!(pm.processes().is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn notification_socket_feeds_mirror_and_survives_garbage() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"REBOOT"}"#.into())).await.unwrap();
            let started = json!({"pid": 5, "type": "PROCESS_STARTED", "data": process_json(5)}).to_string();
            ws.send(Message::Text(started.into())).await.unwrap();
            // hold the socket open until the client closes it
            while let Some(Ok(_)) = ws.next().await {}
        });

        let pm = ProcessManager::new("127.0.0.1", port, BackoffPolicy::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _h = pm.notifications().listen(move |n| {
            let _ = tx.send(n.kind);
        });
        pm.start_notifications();

        let kind = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(kind, NotificationType::ProcessStarted);
        assert!(pm.process(5).is_some());

        tokio::time::timeout(Duration::from_secs(5), pm.close()).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }
}
