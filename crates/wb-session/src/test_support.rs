//! Fixtures: an in-memory container runtime, a mocked process manager and
//! proxy API, an in-memory control-plane store and a temporary checkout.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;
use wb_container::ResourceRef;
use wb_container::labels::ResourceKind;
use wb_container::memory::MemoryRuntime;
use wb_core::identity::Principal;
use wb_proxy::MemoryStore;
use wb_repo::EditableRepository;
use wb_rpc::{Notifier, OutboundStream};
use wb_settings::{ProxySettings, WorkbenchSettings};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::context::SessionContext;
use crate::session::EditorSession;

pub(crate) struct Harness {
    pub(crate) session: Arc<EditorSession>,
    pub(crate) runtime: Arc<MemoryRuntime>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) sidecar: Arc<MockServer>,
    traefik: Arc<MockServer>,
    pub(crate) ctx: SessionContext,
    pub(crate) out: parking_lot::Mutex<OutboundStream>,
    repo_path: PathBuf,
    _dir: Arc<TempDir>,
}

pub(crate) fn principal() -> Principal {
    Principal::new("ada", "ada@example.org")
}

pub(crate) fn resource() -> ResourceRef {
    ResourceRef {
        id: "r1".into(),
        name: "repo".into(),
        owner: "ada".into(),
        kind: ResourceKind::Repository,
    }
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        Self::build(Arc::new(dir), path, principal()).await
    }

    pub(crate) async fn with_principal(principal: Principal) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        Self::build(Arc::new(dir), path, principal).await
    }

    pub(crate) async fn with_repo_path(repo: &str) -> Self {
        let dir = TempDir::new().unwrap();
        Self::build(Arc::new(dir), PathBuf::from(repo), principal()).await
    }

    async fn build(dir: Arc<TempDir>, repo_path: PathBuf, principal: Principal) -> Self {
        let sidecar = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&sidecar)
            .await;

        let traefik = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/http/services/.+"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serverStatus": {"a": "UP"}
            })))
            .mount(&traefik)
            .await;

        let mut settings = WorkbenchSettings::default();
        settings.sidecar.port = sidecar.address().port();
        settings.sidecar.ready_attempts = 2;
        settings.sidecar.ready_max_delay_ms = 5;
        settings.docker.route_gateway = String::new();
        settings.proxy = ProxySettings {
            traefik_api_url: traefik.uri(),
            host_template: "{hash}.apps.test".into(),
            up_attempts: 2,
            up_max_delay_ms: 5,
            settle_ms: 0,
            hash_salt: "salt".into(),
            ..ProxySettings::default()
        };

        let runtime = Arc::new(MemoryRuntime::new("127.0.0.1"));
        let store = Arc::new(MemoryStore::new());
        let mut ctx = SessionContext::from_settings(runtime.clone(), store.clone(), &settings).unwrap();
        ctx.editor.routing = None;
        ctx.editor.host_env.clear();
        ctx.stream_ready_timeout = std::time::Duration::from_millis(50);

        let (notifier, out) = Notifier::channel();
        let id = ctx.sessions.start_session("ada@example.org").await.unwrap();
        let session = EditorSession::new(ctx.clone(), id, principal, resource(), repo_path.clone(), notifier);
        Self {
            session,
            runtime,
            store,
            sidecar: Arc::new(sidecar),
            traefik: Arc::new(traefik),
            ctx,
            out: parking_lot::Mutex::new(out),
            repo_path,
            _dir: dir,
        }
    }

    /// A second session over the same runtime, store and checkout.
    pub(crate) fn reopen(&self) -> Self {
        let (notifier, out) = Notifier::channel();
        let session = EditorSession::new(
            self.ctx.clone(),
            wb_core::ids::SessionId::new(),
            self.session.principal().clone(),
            resource(),
            self.repo_path.clone(),
            notifier,
        );
        Self {
            session,
            runtime: Arc::clone(&self.runtime),
            store: Arc::clone(&self.store),
            sidecar: Arc::clone(&self.sidecar),
            traefik: Arc::clone(&self.traefik),
            ctx: self.ctx.clone(),
            out: parking_lot::Mutex::new(out),
            repo_path: self.repo_path.clone(),
            _dir: Arc::clone(&self._dir),
        }
    }

    /// Open the checkout and start the container without the file watcher,
    /// so config reloads happen only when a test asks for them.
    pub(crate) async fn boot_unwatched(&self) {
        let repo = EditableRepository::open(self.repo_path.clone()).await.unwrap();
        let _ = repo.load_workbench_config().await;
        *self.session.repo.write() = Some(Arc::new(repo));
        self.session.editor().start().await.unwrap();
    }

    /// Replace `rel` atomically so watchers never see a partial file.
    pub(crate) fn write_file(&self, rel: &str, content: &str) {
        let path = self.repo_path.join(rel);
        let parent = path.parent().unwrap();
        std::fs::create_dir_all(parent).unwrap();
        let tmp = parent.join(".write.tmp");
        std::fs::write(&tmp, content).unwrap();
        std::fs::rename(tmp, path).unwrap();
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        &self.repo_path
    }

    /// Every frame enqueued so far, as JSON.
    pub(crate) fn drain(&self) -> Vec<Value> {
        let mut out = self.out.lock();
        let mut frames = Vec::new();
        while let Some(frame) = out.try_next() {
            frames.push(serde_json::from_str(&frame.to_text()).unwrap());
        }
        frames
    }

    /// Notifications with `method` enqueued so far.
    pub(crate) fn notifications(&self, name: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| method_of(f) == name)
            .map(|f| f["params"].clone())
            .collect()
    }

    /// Wait until a notification named `name` arrives, collecting everything
    /// seen on the way.
    pub(crate) async fn wait_for(&self, name: &str) -> Vec<Value> {
        frames_until(&self.out, name).await
    }
}

pub(crate) fn method_of(frame: &Value) -> &str {
    frame["method"].as_str().unwrap_or_default()
}

async fn frames_until(out: &parking_lot::Mutex<OutboundStream>, name: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let next = out.lock().try_next();
        match next {
            Some(frame) => {
                let value: Value = serde_json::from_str(&frame.to_text()).unwrap();
                let done = method_of(&value) == name;
                seen.push(value);
                if done {
                    return seen;
                }
            }
            None => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
        }
    }
    panic!("no {name} notification; saw {seen:?}");
}

/// Process JSON as the process manager returns it.
pub(crate) fn process_json(pid: u32, cmd: &str) -> Value {
    json!({"pid": pid, "name": cmd, "cmd": cmd, "args": [], "ports": [], "children": {}})
}
