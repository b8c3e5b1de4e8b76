//! Commands executed directly in the editor container, streamed to the
//! client as `task_started` / `on_task_stream` / `task_finished`.

use futures::StreamExt;
use serde_json::json;
use tracing::{info, instrument, warn};
use wb_core::ids::short_id;

use crate::errors::Result;
use crate::session::EditorSession;

impl EditorSession {
    /// Run `cmd` as a task named `name` and return its exit code.
    ///
    /// The exec is tracked under the task id while it runs so `resize` can
    /// reach it. Output stops being relayed once the session shuts down.
    #[instrument(skip(self, cmd), fields(session = %self.id))]
    pub async fn run_task(&self, name: &str, cmd: Vec<String>, user: Option<&str>, tty: bool) -> Result<i64> {
        let id = short_id();
        self.notify("task_started", json!({ "id": id, "name": name }));

        let exec = self.editor.exec_stream(cmd, user, tty).await?;
        let _ = self.tracked.lock().task_execs.insert(id.clone(), exec.id.clone());

        let mut output = exec.output;
        loop {
            let chunk = tokio::select! {
                () = self.supervisor.cancelled() => break,
                chunk = output.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    let data = String::from_utf8_lossy(chunk.data()).into_owned();
                    self.notify("on_task_stream", json!({ "id": id, "name": name, "data": data }));
                }
                Some(Err(e)) => {
                    warn!(task = %id, error = %e, "task output read failed");
                    break;
                }
                None => break,
            }
        }

        let _ = self.tracked.lock().task_execs.remove(&id);
        let exit_code = self.editor.exec_exit_code(&exec.id).await?.unwrap_or(-1);
        self.notify("task_finished", json!({ "id": id, "name": name, "exit_code": exit_code }));
        Ok(exit_code)
    }

    /// Run the configured build command. `None` when no build is configured.
    pub async fn run_build(&self) -> Result<Option<i64>> {
        let config = self.workbench_config();
        let Some(cmd) = config.build_cmd() else {
            return Ok(None);
        };
        let code = self
            .run_task("build", vec!["bash".into(), "-c".into(), cmd.to_string()], None, true)
            .await?;
        Ok(Some(code))
    }

    /// Install `setup.packages` with apt as root. `None` when the list is
    /// empty; otherwise the exit code of the install step.
    pub async fn install_extra_packages(&self) -> Result<Option<i64>> {
        let config = self.workbench_config();
        let packages = config.packages();
        if packages.is_empty() {
            return Ok(None);
        }
        info!(count = packages.len(), "running package install");
        let _ = self
            .run_task("package_install", apt(["update"]), Some("root"), true)
            .await?;
        let mut install = apt(["install"]);
        install.extend(packages.iter().cloned());
        let code = self.run_task("package_install", install, Some("root"), true).await?;
        info!(exit_code = code, "package install finished");
        Ok(Some(code))
    }

    /// Run `setup.setupScript` with bash. `None` when there is none.
    pub async fn run_setup_script(&self) -> Result<Option<i64>> {
        let config = self.workbench_config();
        let Some(script) = config.setup_script() else {
            return Ok(None);
        };
        info!("running setup script");
        let code = self
            .run_task("setup_script", vec!["bash".into(), "-c".into(), script.to_string()], None, true)
            .await?;
        info!(exit_code = code, "setup script finished");
        Ok(Some(code))
    }
}

fn apt<const N: usize>(sub: [&str; N]) -> Vec<String> {
    ["apt-get", "-y"].into_iter().chain(sub).map(str::to_string).collect()
}
