//! A repository checkout opened for editing.
//!
//! Every path argument is relative to the repository root. Paths that would
//! resolve outside the root are rejected. Mutations take the repository's
//! writer lock, reads its reader lock.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::config::{CONFIG_FILE, WorkbenchConfig};
use crate::errors::{RepoError, Result};
use crate::lock::RepoLock;

/// One directory listing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Absolute path on the host.
    pub absolute_path: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Guessed MIME type; `None` for directories.
    pub mime_type: Option<String>,
}

/// Repository checkout with file operations and its workbench config.
pub struct EditableRepository {
    root: PathBuf,
    lock: RepoLock,
    config: RwLock<WorkbenchConfig>,
}

impl EditableRepository {
    /// Open the checkout at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !tokio::fs::try_exists(&root).await? {
            return Err(RepoError::NotFound {
                path: root.display().to_string(),
            });
        }
        let lock = RepoLock::for_repo(&root);
        Ok(Self::with_lock(root, lock))
    }

    /// Checkout at `root` guarded by `lock`.
    pub fn with_lock(root: PathBuf, lock: RepoLock) -> Self {
        Self {
            root,
            lock,
            config: RwLock::new(WorkbenchConfig::fallback()),
        }
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Workbench config ────────────────────────────────────────────

    /// Current configuration.
    pub fn workbench_config(&self) -> WorkbenchConfig {
        self.config.read().clone()
    }

    /// Reload `workbench.yml`.
    ///
    /// A missing file keeps the current configuration. A file that fails to
    /// parse resets it to [`WorkbenchConfig::fallback`].
    pub async fn load_workbench_config(&self) -> WorkbenchConfig {
        let path = self.root.join(CONFIG_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.workbench_config(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read workbench.yml");
                return self.workbench_config();
            }
        };
        let config = WorkbenchConfig::from_yaml(&text).unwrap_or_else(|e| {
            error!(error = %e, "failed to parse workbench.yml");
            WorkbenchConfig::fallback()
        });
        *self.config.write() = config.clone();
        config
    }

    // ── Paths ───────────────────────────────────────────────────────

    /// Absolute path for `rel`, rejecting anything outside the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(RepoError::OutsideRoot { path: rel.to_string() });
                    }
                }
            }
        }
        Ok(parts.iter().fold(self.root.clone(), |acc, p| acc.join(p)))
    }

    /// `path` relative to the root.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Whether `rel` exists.
    pub fn file_exists(&self, rel: &str) -> bool {
        self.resolve(rel).is_ok_and(|p| p.exists())
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Create a file, numbering the name if it is taken. Returns the
    /// relative path actually created.
    pub async fn create_file(&self, rel: &str, content: Option<&str>, base64: bool) -> Result<String> {
        let _guard = self.lock.write().await?;
        let path = numbered_path(&self.resolve(rel)?);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match content.filter(|c| !c.is_empty()) {
            Some(content) => tokio::fs::write(&path, decode(content, base64)?).await?,
            None => drop(tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?),
        }
        debug!(path = %path.display(), "created file");
        Ok(self.relative(&path))
    }

    /// Overwrite a file.
    pub async fn update_file(&self, rel: &str, content: &str, base64: bool) -> Result<()> {
        let _guard = self.lock.write().await?;
        let path = self.resolve(rel)?;
        tokio::fs::write(&path, decode(content, base64)?).await?;
        Ok(())
    }

    /// Delete a file or a whole directory tree.
    pub async fn delete(&self, rel: &str) -> Result<()> {
        let _guard = self.lock.write().await?;
        let path = self.resolve(rel)?;
        if path == self.root {
            return Err(RepoError::OutsideRoot { path: rel.to_string() });
        }
        if tokio::fs::metadata(&path).await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Move `from` to `to`, creating missing parents.
    pub async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let _guard = self.lock.write().await?;
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from, &to).await?;
        Ok(())
    }

    /// Copy `rel` to `to`. Copying onto a directory copies into it; taken
    /// names are numbered. Returns the relative path of the copy.
    pub async fn copy_file(&self, rel: &str, to: &str) -> Result<String> {
        let _guard = self.lock.write().await?;
        let from = self.resolve(rel)?;
        let mut target = self.resolve(to)?;
        if target.is_dir() {
            if let Some(name) = from.file_name() {
                target = target.join(name);
            }
        }
        let target = numbered_path(&target);
        let (src, dst) = (from.clone(), target.clone());
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(std::io::Error::other)??;
        Ok(self.relative(&target))
    }

    /// Create a directory, numbering the name if it is taken. Returns the
    /// relative path created.
    pub async fn mkdir(&self, rel: &str) -> Result<String> {
        let _guard = self.lock.write().await?;
        let path = numbered_path(&self.resolve(rel)?);
        tokio::fs::create_dir_all(&path).await?;
        Ok(self.relative(&path))
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Text content of a file.
    pub async fn get_file_content(&self, rel: &str) -> Result<String> {
        let _guard = self.lock.read().await?;
        let path = self.resolve(rel)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RepoError::NotFound {
                path: path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Entries of `dir`, sorted by name. Unless `show_hidden`, entries whose
    /// relative path matches a `development.ignore` pattern are left out.
    pub async fn list_dir(&self, dir: &str, show_hidden: bool) -> Result<Vec<FileEntry>> {
        let _guard = self.lock.read().await?;
        let ignore = if show_hidden {
            GlobSet::empty()
        } else {
            ignore_set(&self.workbench_config().development.ignore_patterns())
        };
        let absolute = self.resolve(dir)?;

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&absolute).await?;
        while let Some(entry) = reader.next_entry().await? {
            let full = entry.path();
            let rel = self.relative(&full);
            if ignore.is_match(&rel) {
                continue;
            }
            let is_directory = entry.file_type().await?.is_dir();
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: rel,
                absolute_path: full.to_string_lossy().into_owned(),
                is_directory,
                mime_type: (!is_directory).then(|| mime_guess::from_path(&full).first_or_octet_stream().to_string()),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// `git status --porcelain` as path → status code.
    pub async fn status(&self) -> Result<BTreeMap<String, String>> {
        let output = self.git(&["status", "--porcelain"]).await?;
        Ok(parse_porcelain(&output))
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git").args(args).current_dir(&self.root).output().await?;
        if !out.status.success() {
            return Err(RepoError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

fn decode(content: &str, base64: bool) -> Result<Vec<u8>> {
    if base64 {
        Ok(STANDARD.decode(content.trim())?)
    } else {
        Ok(content.as_bytes().to_vec())
    }
}

/// `path`, or `stem (n).ext` with the smallest free `n`.
fn numbered_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    (1..)
        .map(|i| parent.join(format!("{stem} ({i}){ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

fn ignore_set(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                let _ = builder.add(glob);
            }
            Err(e) => warn!(pattern, error = %e, "ignoring invalid pattern"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

fn parse_porcelain(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter(|l| l.len() > 3)
        .map(|line| {
            let code = line[..2].trim().to_string();
            let path = &line[3..];
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            (path.trim_matches('"').to_string(), code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn repo() -> (TempDir, EditableRepository) {
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join(".locks");
        std::fs::create_dir_all(&locks).unwrap();
        let root = dir.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        let lock = RepoLock::in_dir(&locks, &root);
        (dir, EditableRepository::with_lock(root, lock))
    }

    #[test]
    fn resolve_rejects_escape() {
        let (_d, repo) = repo();
        assert_eq!(repo.resolve("a/../b.txt").unwrap(), repo.root().join("b.txt"));
        assert_eq!(repo.resolve("/etc/passwd").unwrap(), repo.root().join("etc/passwd"));
        assert_matches!(repo.resolve("../outside"), Err(RepoError::OutsideRoot { .. }));
        assert_matches!(repo.resolve("a/../../x"), Err(RepoError::OutsideRoot { .. }));
    }

    #[tokio::test]
    async fn create_numbers_taken_names() {
        let (_d, repo) = repo();
        assert_eq!(repo.create_file("src/main.py", Some("print(1)"), false).await.unwrap(), "src/main.py");
        assert_eq!(repo.create_file("src/main.py", None, false).await.unwrap(), "src/main (1).py");
        assert_eq!(repo.create_file("src/main.py", None, false).await.unwrap(), "src/main (2).py");
        assert_eq!(repo.get_file_content("src/main.py").await.unwrap(), "print(1)");
        assert_eq!(repo.get_file_content("src/main (1).py").await.unwrap(), "");
    }

    #[tokio::test]
    async fn update_decodes_base64() {
        let (_d, repo) = repo();
        let _ = repo.create_file("a.bin", None, false).await.unwrap();
        repo.update_file("a.bin", "aGVsbG8=", true).await.unwrap();
        assert_eq!(repo.get_file_content("a.bin").await.unwrap(), "hello");
        assert_matches!(repo.update_file("a.bin", "***", true).await, Err(RepoError::Base64(_)));
    }

    #[tokio::test]
    async fn move_copy_delete() {
        let (_d, repo) = repo();
        let _ = repo.create_file("a.txt", Some("x"), false).await.unwrap();
        repo.move_file("a.txt", "deep/dir/b.txt").await.unwrap();
        assert!(!repo.file_exists("a.txt"));
        assert!(repo.file_exists("deep/dir/b.txt"));

        assert_eq!(repo.copy_file("deep/dir/b.txt", "deep").await.unwrap(), "deep/b.txt");
        assert_eq!(repo.copy_file("deep/dir/b.txt", "deep").await.unwrap(), "deep/b (1).txt");
        assert_eq!(repo.copy_file("deep/dir", "deep/dir2").await.unwrap(), "deep/dir2");
        assert!(repo.file_exists("deep/dir2/b.txt"));

        repo.delete("deep/dir").await.unwrap();
        repo.delete("deep/b.txt").await.unwrap();
        assert!(!repo.file_exists("deep/dir"));
        assert!(!repo.file_exists("deep/b.txt"));
        assert_matches!(repo.delete("").await, Err(RepoError::OutsideRoot { .. }));
    }

    #[tokio::test]
    async fn mkdir_numbers_taken_names() {
        let (_d, repo) = repo();
        assert_eq!(repo.mkdir("data").await.unwrap(), "data");
        assert_eq!(repo.mkdir("data").await.unwrap(), "data (1)");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_d, repo) = repo();
        assert_matches!(repo.get_file_content("nope.txt").await, Err(RepoError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_dir_applies_ignore_patterns() {
        let (_d, repo) = repo();
        std::fs::write(repo.root().join(CONFIG_FILE), "development:\n  ignore: |\n    *.pyc\n    build\n").unwrap();
        let _ = repo.load_workbench_config().await;
        for f in ["main.py", "main.pyc", "README.md"] {
            let _ = repo.create_file(f, None, false).await.unwrap();
        }
        let _ = repo.mkdir("build").await.unwrap();

        let names: Vec<_> = repo.list_dir("", false).await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["README.md", "main.py", "workbench.yml"]);

        let all = repo.list_dir("", true).await.unwrap();
        assert_eq!(all.len(), 6);
        let build = all.iter().find(|e| e.name == "build").unwrap();
        assert!(build.is_directory);
        assert_eq!(build.mime_type, None);
        let py = all.iter().find(|e| e.name == "main.py").unwrap();
        assert_eq!(py.path, "main.py");
        assert!(py.mime_type.is_some());
    }

    #[tokio::test]
    async fn config_reload_rules() {
        let (_d, repo) = repo();
        assert_eq!(repo.load_workbench_config().await, WorkbenchConfig::fallback());

        std::fs::write(repo.root().join(CONFIG_FILE), "networks: [db]\n").unwrap();
        let loaded = repo.load_workbench_config().await;
        assert_eq!(loaded.desired_networks(), ["db".to_string()]);

        std::fs::write(repo.root().join(CONFIG_FILE), "networks: {{{").unwrap();
        assert_eq!(repo.load_workbench_config().await, WorkbenchConfig::fallback());

        std::fs::remove_file(repo.root().join(CONFIG_FILE)).unwrap();
        assert_eq!(repo.load_workbench_config().await, WorkbenchConfig::fallback());
    }

    #[test]
    fn porcelain_parsing() {
        let out = " M src/lib.rs\n?? new.txt\nR  old.rs -> renamed.rs\nA  \"with space.txt\"\n";
        let status = parse_porcelain(out);
        assert_eq!(status["src/lib.rs"], "M");
        assert_eq!(status["new.txt"], "??");
        assert_eq!(status["renamed.rs"], "R");
        assert_eq!(status["with space.txt"], "A");
    }
}
