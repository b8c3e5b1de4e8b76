//! Repository file watching.
//!
//! Raw filesystem events are batched over a short window, mapped to
//! [`FileChange`]s relative to the repository root and handed to the session:
//! a change to `workbench.yml` reloads the config, a path matching the build
//! watch patterns starts a build, and the batch is forwarded to the client as
//! `file_changes`.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use globset::{Glob, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wb_repo::WorkbenchConfig;
use wb_repo::config::CONFIG_FILE;

use crate::errors::Result;
use crate::session::{EditorSession, to_json};

const DEBOUNCE: Duration = Duration::from_millis(50);

/// Directories whose contents never produce change events.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    ".mypy_cache",
    ".pytest_cache",
    ".hg",
    ".svn",
];

/// What happened to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Created or moved in.
    Added,
    /// Content or metadata changed.
    Modified,
    /// Removed or moved out.
    Deleted,
}

/// One entry of a `file_changes` notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Kind of change.
    pub change: ChangeKind,
    /// Path relative to the repository root.
    pub path: String,
    /// Final path component.
    pub name: String,
    /// Whether the path is a directory now.
    pub is_directory: bool,
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    let ignored = rel.components().any(|c| match c {
        Component::Normal(part) => part.to_str().is_some_and(|p| IGNORED_DIRS.contains(&p)),
        _ => false,
    });
    if ignored {
        return None;
    }
    Some(rel.to_string_lossy().into_owned())
}

fn change(root: &Path, path: &Path, kind: ChangeKind) -> Option<FileChange> {
    let rel = relative(root, path)?;
    Some(FileChange {
        change: kind,
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: rel,
        is_directory: path.is_dir(),
    })
}

/// Map one raw event to changes under `root`.
pub fn changes_from_event(root: &Path, event: &Event) -> Vec<FileChange> {
    let paths = &event.paths;
    let each = |kind: ChangeKind| -> Vec<FileChange> { paths.iter().filter_map(|p| change(root, p, kind)).collect() };
    match event.kind {
        EventKind::Create(_) => each(ChangeKind::Added),
        EventKind::Remove(_) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let from = paths.first().and_then(|p| change(root, p, ChangeKind::Deleted));
            let to = paths.get(1).and_then(|p| change(root, p, ChangeKind::Added));
            from.into_iter().chain(to).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .filter_map(|p| {
                let kind = if p.exists() { ChangeKind::Added } else { ChangeKind::Deleted };
                change(root, p, kind)
            })
            .collect(),
        EventKind::Modify(_) => each(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn batch_changes(root: &Path, events: Vec<notify::Result<Event>>) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    for event in events {
        match event {
            Ok(event) => {
                for c in changes_from_event(root, &event) {
                    if !changes.contains(&c) {
                        changes.push(c);
                    }
                }
            }
            Err(e) => warn!(error = %e, "file watch error"),
        }
    }
    changes
}

/// Whether `path` should trigger a build under `config`.
pub fn is_build_watched(config: &WorkbenchConfig, path: &str) -> bool {
    let Some(build) = &config.build else { return false };
    if build.watch != Some(true) {
        return false;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in build.patterns() {
        match Glob::new(pattern) {
            Ok(glob) => {
                let _ = builder.add(glob);
            }
            Err(e) => debug!(pattern, error = %e, "invalid build pattern"),
        }
    }
    builder.build().is_ok_and(|set| set.is_match(path))
}

/// Start watching the session's repository in a supervised task.
pub(crate) fn spawn(session: &Arc<EditorSession>) -> Result<()> {
    let root = session.repo()?.root().to_path_buf();
    let root = root.canonicalize().unwrap_or(root);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let _ = tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "file watcher started");

    let weak = Arc::downgrade(session);
    session.supervisor.spawn("file_watcher", watch_loop(watcher, root, rx, weak));
    Ok(())
}

async fn watch_loop(
    watcher: notify::RecommendedWatcher,
    root: PathBuf,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    session: Weak<EditorSession>,
) {
    // dropping the watcher stops event delivery
    let _watcher = watcher;
    while let Some(first) = rx.recv().await {
        tokio::time::sleep(DEBOUNCE).await;
        let mut events = vec![first];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let changes = batch_changes(&root, events);
        if changes.is_empty() {
            continue;
        }
        let Some(session) = session.upgrade() else { break };
        session.handle_file_changes(changes).await;
    }
    debug!("file watcher stopped");
}

impl EditorSession {
    /// React to a batch of repository changes and forward it to the client.
    pub async fn handle_file_changes(self: &Arc<Self>, changes: Vec<FileChange>) {
        if changes.iter().any(|c| c.path == CONFIG_FILE) {
            if let Err(e) = self.on_workbench_config_changed().await {
                error!(error = %e, "workbench config reload failed");
            }
        }

        let config = self.workbench_config();
        if changes.iter().any(|c| is_build_watched(&config, &c.path)) {
            info!("build watched files changed, running build");
            let session = Arc::clone(self);
            self.supervisor.spawn("build", async move {
                if let Err(e) = session.run_build().await {
                    error!(error = %e, "watched build failed");
                }
            });
        }

        self.notify("file_changes", json!([to_json(&changes)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    fn ev(kind: EventKind, paths: &[&Path]) -> Event {
        paths.iter().fold(Event::new(kind), |e, p| e.add_path(p.to_path_buf()))
    }

    #[test]
    fn create_and_remove_map_to_added_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("src")).unwrap();

        let added = changes_from_event(root, &ev(EventKind::Create(CreateKind::Folder), &[&root.join("src")]));
        assert_eq!(
            added,
            vec![FileChange {
                change: ChangeKind::Added,
                path: "src".into(),
                name: "src".into(),
                is_directory: true,
            }]
        );

        let gone = root.join("src/old.py");
        let deleted = changes_from_event(root, &ev(EventKind::Remove(RemoveKind::File), &[&gone]));
        assert_eq!(deleted[0].change, ChangeKind::Deleted);
        assert_eq!(deleted[0].path, "src/old.py");
        assert_eq!(deleted[0].name, "old.py");
        assert!(!deleted[0].is_directory);
    }

    #[test]
    fn rename_both_yields_delete_then_add() {
        let root = Path::new("/repo");
        let event = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[Path::new("/repo/a.txt"), Path::new("/repo/b.txt")],
        );
        let kinds: Vec<_> = changes_from_event(root, &event)
            .into_iter()
            .map(|c| (c.change, c.path))
            .collect();
        assert_eq!(kinds, vec![(ChangeKind::Deleted, "a.txt".into()), (ChangeKind::Added, "b.txt".into())]);
    }

    #[test]
    fn data_change_is_modified_access_is_ignored() {
        let root = Path::new("/repo");
        let path = Path::new("/repo/app.py");
        let modified = changes_from_event(root, &ev(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[path]));
        assert_eq!(modified[0].change, ChangeKind::Modified);
        assert!(changes_from_event(root, &ev(EventKind::Access(AccessKind::Any), &[path])).is_empty());
    }

    #[test]
    fn ignored_dirs_and_root_produce_nothing() {
        let root = Path::new("/repo");
        let create = EventKind::Create(CreateKind::File);
        assert!(changes_from_event(root, &ev(create, &[Path::new("/repo/.git/index")])).is_empty());
        assert!(changes_from_event(root, &ev(create, &[Path::new("/repo/a/node_modules/x.js")])).is_empty());
        assert!(changes_from_event(root, &ev(create, &[Path::new("/repo")])).is_empty());
        assert!(changes_from_event(root, &ev(create, &[Path::new("/elsewhere/x")])).is_empty());
    }

    #[test]
    fn batches_are_deduplicated() {
        let root = Path::new("/repo");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Any));
        let events = vec![
            Ok(ev(modify, &[Path::new("/repo/a.py")])),
            Ok(ev(modify, &[Path::new("/repo/a.py")])),
            Ok(ev(modify, &[Path::new("/repo/b.py")])),
        ];
        let paths: Vec<_> = batch_changes(root, events).into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn build_watch_requires_flag_and_pattern() {
        let mut config = WorkbenchConfig::from_yaml("build:\n  cmd: make\n  filePatterns: \"*.c\\nsrc/**/*.h\"\n").unwrap();
        assert!(!is_build_watched(&config, "main.c"));

        if let Some(build) = config.build.as_mut() {
            build.watch = Some(true);
        }
        assert!(is_build_watched(&config, "main.c"));
        assert!(is_build_watched(&config, "lib/main.c"));
        assert!(is_build_watched(&config, "src/x/y.h"));
        assert!(!is_build_watched(&config, "README.md"));
        assert!(!is_build_watched(&WorkbenchConfig::fallback(), "main.c"));
    }

    #[test]
    fn change_serializes_camel_case() {
        let c = FileChange {
            change: ChangeKind::Modified,
            path: "a/b.py".into(),
            name: "b.py".into(),
            is_directory: false,
        };
        assert_eq!(
            to_json(&c),
            json!({"change": "modified", "path": "a/b.py", "name": "b.py", "isDirectory": false})
        );
    }

    #[tokio::test]
    async fn edits_are_reported_to_client() {
        let h = Harness::new().await;
        h.session.init().await;
        let _ = h.drain();

        std::fs::write(h.path().join("notes.txt"), "hello").unwrap();
        let frames = h.wait_for("file_changes").await;
        let batch = &frames.last().unwrap()["params"][0];
        assert!(
            batch
                .as_array()
                .unwrap()
                .iter()
                .any(|c| c["path"] == "notes.txt" && c["name"] == "notes.txt")
        );
        h.session.close().await;
    }

    #[tokio::test]
    async fn watched_build_runs_on_matching_change() {
        let h = Harness::new().await;
        h.write_file("workbench.yml", "build:\n  cmd: make\n  watch: true\n  filePatterns: \"*.c\"\n");
        h.session.init().await;
        let _ = h.drain();

        let changes = vec![FileChange {
            change: ChangeKind::Modified,
            path: "main.c".into(),
            name: "main.c".into(),
            is_directory: false,
        }];
        h.session.handle_file_changes(changes).await;
        let frames = h.wait_for("task_finished").await;
        assert!(frames.iter().any(|f| f["method"] == "task_started" && f["params"]["name"] == "build"));
        assert!(h.runtime.execs().iter().any(|e| e.cmd == ["bash", "-c", "make"]));
        h.session.close().await;
    }
}
