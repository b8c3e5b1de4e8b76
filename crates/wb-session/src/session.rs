//! Per-connection session state machine.
//!
//! [`EditorSession::init`] opens the repository, boots the editor container
//! and starts the background loops. Any failure is reported once as a
//! `status` notification with `state: "error"`; the session stays connected.
//! [`EditorSession::close`] tears everything down step by step, logging and
//! continuing past failures.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};
use wb_container::{EditorContainer, ResourceRef};
use wb_core::events::ListenerHandle;
use wb_core::identity::Principal;
use wb_core::ids::SessionId;
use wb_repo::{EditableRepository, FileEntry, WorkbenchConfig};
use wb_rpc::Notifier;
use wb_sidecar::{LspServiceHandler, Notification, Process, ProcessManager, StreamHandler};

use crate::context::SessionContext;
use crate::errors::{Result, SessionError};
use crate::supervisor::Supervisor;

/// Python project marker that triggers dependency install on fresh boot.
const PYPROJECT: &str = "pyproject.toml";

/// State shared between RPC handlers and the notification relay.
#[derive(Default)]
pub(crate) struct Tracked {
    /// Attached stdio streams by pid.
    pub(crate) streams: HashMap<u32, Arc<StreamHandler>>,
    /// Last reported ports by pid (processes and children).
    pub(crate) ports: HashMap<u32, Vec<u16>>,
    /// Parent pid of every child process seen.
    pub(crate) parents: HashMap<u32, u32>,
    /// Process started for each app or service name.
    pub(crate) apps: HashMap<String, Process>,
    /// Running task execs: task id to exec id.
    pub(crate) task_execs: HashMap<String, String>,
    /// Proxy hashes registered by this session.
    pub(crate) proxies: BTreeSet<String>,
}

/// One editor WebSocket connection and everything it owns.
pub struct EditorSession {
    pub(crate) id: SessionId,
    pub(crate) principal: Principal,
    pub(crate) resource: ResourceRef,
    pub(crate) repo_path: PathBuf,
    pub(crate) ctx: SessionContext,
    pub(crate) notifier: Notifier,
    pub(crate) editor: EditorContainer,
    pub(crate) repo: RwLock<Option<Arc<EditableRepository>>>,
    pub(crate) tracked: Mutex<Tracked>,
    pub(crate) lsp: tokio::sync::Mutex<Option<Arc<LspServiceHandler>>>,
    pub(crate) supervisor: Supervisor,
    listener: Mutex<Option<ListenerHandle<Notification>>>,
    closed: AtomicBool,
}

impl EditorSession {
    /// Session `id` for `principal` editing `resource` checked out at
    /// `repo_path`. Notifications are enqueued on `notifier`.
    pub fn new(
        ctx: SessionContext,
        id: SessionId,
        principal: Principal,
        resource: ResourceRef,
        repo_path: impl Into<PathBuf>,
        notifier: Notifier,
    ) -> Arc<Self> {
        let repo_path = repo_path.into();
        let editor = EditorContainer::new(
            Arc::clone(&ctx.runtime),
            ctx.editor.clone(),
            principal.clone(),
            resource.clone(),
            repo_path.to_string_lossy().into_owned(),
        );
        Arc::new(Self {
            id,
            principal,
            resource,
            repo_path,
            ctx,
            notifier,
            editor,
            repo: RwLock::new(None),
            tracked: Mutex::new(Tracked::default()),
            lsp: tokio::sync::Mutex::new(None),
            supervisor: Supervisor::new(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Caller identity.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Editor container.
    pub fn editor(&self) -> &EditorContainer {
        &self.editor
    }

    /// Services this session was built with.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Enqueue a notification for the client.
    pub fn notify(&self, method: &str, params: Value) {
        self.notifier.notify(method, params);
    }

    pub(crate) fn status(&self, state: &str, message: Option<&str>) {
        let mut params = json!({ "state": state });
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        self.notify("status", params);
    }

    /// The opened repository.
    pub fn repo(&self) -> Result<Arc<EditableRepository>> {
        self.repo.read().clone().ok_or(SessionError::RepoNotOpen)
    }

    /// Current workbench configuration; the default before the repository
    /// is opened.
    pub fn workbench_config(&self) -> WorkbenchConfig {
        self.repo
            .read()
            .as_ref()
            .map_or_else(WorkbenchConfig::fallback, |r| r.workbench_config())
    }

    pub(crate) fn process_manager(&self) -> Result<ProcessManager> {
        Ok(self.editor.process_manager()?)
    }

    pub(crate) fn notify_config(&self, config: &WorkbenchConfig) {
        self.notify("workbench_config_changed", json!({ "config": to_json(config) }));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Bring the session up. Never fails; errors become a terminal `status`
    /// notification.
    #[instrument(skip(self), fields(session = %self.id, container = %self.editor.name()))]
    pub async fn init(self: &Arc<Self>) {
        self.status("starting", None);
        match self.try_init().await {
            Ok(()) => {
                info!("session ready");
                self.status("ready", None);
            }
            Err(e) => {
                error!(error = %e, "session init failed");
                self.notify("status", json!({ "state": "error", "error": e.to_string() }));
            }
        }
    }

    async fn try_init(self: &Arc<Self>) -> Result<()> {
        let repo = Arc::new(EditableRepository::open(&self.repo_path).await?);
        *self.repo.write() = Some(Arc::clone(&repo));

        self.status("starting", Some("Booting up container"));
        let config = repo.load_workbench_config().await;
        self.notify_config(&config);

        self.editor.start().await?;
        self.reconcile_networks().await;

        if self.editor.using_existing() {
            self.status("starting", Some("Using existing container"));
        } else {
            self.status("starting", Some("Setting up container"));
            let _ = self.install_extra_packages().await?;
            let _ = self.run_setup_script().await?;
            if repo.file_exists(PYPROJECT) {
                let _ = self
                    .run_task("poetry", vec!["poetry".into(), "install".into()], None, false)
                    .await?;
            }
        }

        self.status("starting", Some("Starting services"));
        crate::watcher::spawn(self)?;
        self.start_relay()?;
        self.start_language_service().await?;
        Ok(())
    }

    fn start_relay(self: &Arc<Self>) -> Result<()> {
        let pm = self.process_manager()?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = pm.on_notification(move |notif| {
            let weak = weak.clone();
            async move {
                if let Some(session) = weak.upgrade() {
                    session.on_notification(notif).await;
                }
            }
        });
        *self.listener.lock() = Some(handle);
        pm.start_notifications();
        Ok(())
    }

    /// Tear down in order: container, proxy registrations, stdio streams,
    /// language servers, background tasks, notification listener. Each step
    /// runs even if an earlier one failed. Later calls are no-ops.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.editor.close().await;
        self.sweep_proxies().await;

        let streams: Vec<Arc<StreamHandler>> = self.tracked.lock().streams.drain().map(|(_, s)| s).collect();
        for stream in streams {
            stream.shutdown().await;
        }

        if let Some(lsp) = self.lsp.lock().await.take() {
            lsp.stop().await;
        }

        self.supervisor.cancel();
        if let Some(listener) = self.listener.lock().take() {
            listener.dispose();
        }
        self.supervisor.shutdown().await;
        info!("session closed");
    }

    async fn sweep_proxies(&self) {
        let hashes: Vec<String> = std::mem::take(&mut self.tracked.lock().proxies).into_iter().collect();
        for hash in hashes {
            if let Err(e) = self.ctx.registrar.remove_service(&hash).await {
                warn!(hash, error = %e, "proxy removal failed");
            }
            if let Err(e) = self.ctx.sessions.remove_proxy_hash(self.id.as_str(), &hash).await {
                warn!(hash, error = %e, "session proxy hash removal failed");
            }
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Repository files ────────────────────────────────────────────

    /// Directory listing relative to the repository root.
    pub async fn list_dir(&self, dir: &str, show_hidden: bool) -> Result<Vec<FileEntry>> {
        Ok(self.repo()?.list_dir(dir, show_hidden).await?)
    }

    /// `git status` of the checkout.
    pub async fn git_status(&self) -> Result<std::collections::BTreeMap<String, String>> {
        Ok(self.repo()?.status().await?)
    }

    /// Create a file; returns the path actually created.
    pub async fn create_file(&self, path: &str, content: Option<&str>, base64: bool) -> Result<String> {
        Ok(self.repo()?.create_file(path, content, base64).await?)
    }

    /// Overwrite a file.
    pub async fn update_file(&self, path: &str, content: &str, base64: bool) -> Result<()> {
        Ok(self.repo()?.update_file(path, content, base64).await?)
    }

    /// Delete a file or directory tree.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        Ok(self.repo()?.delete(path).await?)
    }

    /// Move a file or directory.
    pub async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        Ok(self.repo()?.move_file(from, to).await?)
    }

    /// Copy a file or directory; returns the path of the copy.
    pub async fn copy_file(&self, path: &str, to: &str) -> Result<String> {
        Ok(self.repo()?.copy_file(path, to).await?)
    }

    /// Create a directory; returns the path created.
    pub async fn make_dir(&self, path: &str) -> Result<String> {
        Ok(self.repo()?.mkdir(path).await?)
    }

    // ── In-container reads ──────────────────────────────────────────

    async fn read_command(&self, cmd: Vec<String>) -> Result<String> {
        let out = self.editor.exec_output(cmd, None).await?;
        if !out.stderr.is_empty() {
            return Err(SessionError::Exec { stderr: out.stderr });
        }
        Ok(out.stdout)
    }

    /// File content as seen inside the container.
    pub async fn get_file_content(&self, path: &str) -> Result<String> {
        self.read_command(vec!["cat".into(), path.into()]).await
    }

    /// Base64 file content as seen inside the container.
    pub async fn get_base64_file_content(&self, path: &str) -> Result<String> {
        self.read_command(vec!["base64".into(), path.into()]).await
    }

    /// Working directory of the container, newlines stripped.
    pub async fn get_cwd(&self) -> Result<String> {
        let out = self.read_command(vec!["pwd".into()]).await?;
        Ok(out.replace('\n', ""))
    }

    /// Processes tracked by the process manager.
    pub fn get_processes(&self) -> Result<std::collections::BTreeMap<u32, Process>> {
        Ok(self.process_manager()?.processes())
    }

    pub(crate) fn log_dropped(&self, what: &str) {
        debug!(session = %self.id, what, "ignored after close");
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
