//! Interactive processes, their stdio streams, and language server channels.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use wb_sidecar::{Process, ReceiveFn, RunRequest, StreamFrame, StreamHandler};

use crate::errors::{Result, SessionError};
use crate::session::EditorSession;

/// Signal sent by `kill` when the caller names none.
pub const DEFAULT_SIGNAL: &str = "SIGKILL";

/// Options for [`EditorSession::run`] beyond the command line.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Terminal width.
    pub cols: Option<u16>,
    /// Terminal height.
    pub rows: Option<u16>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Extra environment.
    pub env: Option<HashMap<String, String>>,
    /// Terminal type.
    pub term_type: Option<String>,
}

fn frame_from(data: &Value) -> StreamFrame {
    match data {
        Value::String(s) => StreamFrame::Text(s.clone()),
        other => StreamFrame::Text(other.to_string()),
    }
}

impl EditorSession {
    /// Start `path` through the process manager's runner and attach its stdio.
    ///
    /// A `path` containing spaces is split; the tail is prepended to `args`.
    #[instrument(skip(self, args, opts), fields(session = %self.id))]
    pub async fn run(&self, path: &str, args: Option<Vec<String>>, opts: RunOptions) -> Result<Process> {
        let mut words = path.split(' ');
        let program = words.next().unwrap_or_default().to_string();
        let mut argv: Vec<String> = std::iter::once(program).chain(words.map(str::to_string)).collect();
        argv.extend(args.unwrap_or_default());

        let pm = self.process_manager()?;
        let request = RunRequest {
            cols: opts.cols,
            rows: opts.rows,
            cwd: opts.cwd,
            env: opts.env,
            term_type: opts.term_type,
            ..RunRequest::new("run", argv)
        };
        let proc = pm.run(&request).await?;

        let notifier = self.notifier.clone();
        let pid = proc.pid;
        let on_receive: ReceiveFn = Arc::new(move |frame: StreamFrame| {
            notifier.notify("on_stream", json!({ "pid": pid, "data": frame.into_text() }));
            async {}.boxed()
        });
        let stream = Arc::new(
            StreamHandler::new(pm.attach_url(pid), on_receive).with_ready_timeout(self.ctx.stream_ready_timeout),
        );
        stream.start();
        if let Err(e) = stream.ready_within(self.ctx.stream_ready_timeout).await {
            warn!(pid, error = %e, "stdio stream not connected yet");
        }
        let _ = self.tracked.lock().streams.insert(pid, stream);
        Ok(proc)
    }

    /// Write to the stdio of `pid`.
    pub async fn stream_write(&self, pid: u32, data: &Value) -> Result<()> {
        let stream = self
            .tracked
            .lock()
            .streams
            .get(&pid)
            .cloned()
            .ok_or(SessionError::NoStream { pid })?;
        stream.send(frame_from(data)).await?;
        Ok(())
    }

    /// Signal `pid`; defaults to [`DEFAULT_SIGNAL`].
    pub async fn kill(&self, pid: u32, signal: Option<&str>) -> Result<Value> {
        let pm = self.process_manager()?;
        Ok(pm.kill(pid, signal.unwrap_or(DEFAULT_SIGNAL)).await?)
    }

    /// Resize the terminal of a task (by task id) or a process (by pid).
    ///
    /// Best effort: failures and unknown ids are logged.
    pub async fn resize(&self, id: &Value, cols: u16, rows: u16) {
        let key = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let exec_id = self.tracked.lock().task_execs.get(&key).cloned();
        let result = match exec_id {
            Some(exec_id) => self.editor.resize_exec(&exec_id, cols, rows).await.map_err(SessionError::from),
            None => match key.parse::<u32>() {
                Ok(pid) => match self.process_manager() {
                    Ok(pm) => pm.resize(pid, cols, rows).await.map_err(SessionError::from),
                    Err(e) => Err(e),
                },
                Err(_) => {
                    warn!(id = %key, "resize target unknown");
                    return;
                }
            },
        };
        if let Err(e) = result {
            warn!(id = %key, error = %e, "resize failed");
        }
    }

    // ── Language servers ────────────────────────────────────────────

    /// Open the channel for `lang`; its output arrives as `on_lsp_stream`.
    pub async fn connect_to_lsp(&self, lang: &str) -> Result<()> {
        let lsp = self.lsp.lock().await.clone().ok_or(SessionError::LspNotStarted)?;
        let notifier = self.notifier.clone();
        let name = lang.to_string();
        let on_receive: ReceiveFn = Arc::new(move |frame: StreamFrame| {
            notifier.notify("on_lsp_stream", json!({ "lang": name, "data": frame.into_text() }));
            async {}.boxed()
        });
        lsp.connect(lang, on_receive).await?;
        Ok(())
    }

    /// Write to the open channel for `lang`.
    pub async fn lsp_write(&self, lang: &str, data: &Value) -> Result<()> {
        let lsp = self.lsp.lock().await.clone().ok_or(SessionError::LspNotStarted)?;
        lsp.send(lang, frame_from(data)).await?;
        Ok(())
    }

    // ── Apps and services ───────────────────────────────────────────

    /// (Re)start the app or service `name` from the workbench config.
    ///
    /// A process already tracked under `name` is killed first. With
    /// `build.runBeforeApps` the build runs first and a failing build returns
    /// `None` without starting anything.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn run_app_or_service(&self, name: &str) -> Result<Option<Process>> {
        let previous = self.tracked.lock().apps.remove(name);
        if let Some(previous) = previous {
            info!(pid = previous.pid, "stopping previous instance");
            if let Err(e) = self.kill(previous.pid, None).await {
                warn!(pid = previous.pid, error = %e, "previous instance kill failed");
            }
        }

        let config = self.workbench_config();
        let app = config
            .app_or_service(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownApp { name: name.to_string() })?;

        if config.build.as_ref().and_then(|b| b.run_before_apps).unwrap_or(false) {
            if let Some(code) = self.run_build().await? {
                if code != 0 {
                    warn!(exit_code = code, "build failed, not starting");
                    return Ok(None);
                }
            }
        }

        let opts = RunOptions {
            env: app.env.clone().map(|env| env.into_iter().collect()),
            ..RunOptions::default()
        };
        let proc = self.run(&app.run, Some(app.args()), opts).await?;
        let _ = self.tracked.lock().apps.insert(name.to_string(), proc.clone());
        Ok(Some(proc))
    }
}
