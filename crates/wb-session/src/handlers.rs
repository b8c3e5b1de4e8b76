//! The editor's JSON-RPC method table.
//!
//! Every method takes its arguments by position or by name; the names below
//! are the ones editors send.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use wb_rpc::{MethodRegistry, Params, RpcError};

use crate::processes::RunOptions;
use crate::session::EditorSession;

type RpcResult = Result<Value, RpcError>;

fn ok<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(RpcError::internal)
}

fn register<F, Fut>(registry: &mut MethodRegistry, session: &Arc<EditorSession>, name: &'static str, f: F)
where
    F: Fn(Arc<EditorSession>, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult> + Send + 'static,
{
    let session = Arc::clone(session);
    registry.register_fn(name, move |params| {
        debug!(method = name, "rpc call");
        f(Arc::clone(&session), params).boxed()
    });
}

/// Register every editor method for `session`.
pub fn register_all(registry: &mut MethodRegistry, session: &Arc<EditorSession>) {
    register(registry, session, "run_build", run_build);
    register(registry, session, "install_extra_packages", install_extra_packages);
    register(registry, session, "run_setup_script", run_setup_script);
    register(registry, session, "open_proxy", open_proxy);
    register(registry, session, "list_dir", list_dir);
    register(registry, session, "get_processes", get_processes);
    register(registry, session, "get_git_status", get_git_status);
    register(registry, session, "get_file_content", get_file_content);
    register(registry, session, "get_base64_file_content", get_base64_file_content);
    register(registry, session, "get_cwd", get_cwd);
    register(registry, session, "create_file", create_file);
    register(registry, session, "update_file", update_file);
    register(registry, session, "delete_file", delete_file);
    register(registry, session, "move_file", move_file);
    register(registry, session, "copy_file", copy_file);
    register(registry, session, "make_dir", make_dir);
    register(registry, session, "run", run);
    register(registry, session, "stream_write", stream_write);
    register(registry, session, "kill", kill);
    register(registry, session, "resize", resize);
    register(registry, session, "connect_to_lsp", connect_to_lsp);
    register(registry, session, "lsp_write", lsp_write);
    register(registry, session, "run_app_or_service", run_app_or_service);
}

// ── Tasks ───────────────────────────────────────────────────────────

async fn run_build(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.run_build().await?)
}

async fn install_extra_packages(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.install_extra_packages().await?)
}

async fn run_setup_script(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.run_setup_script().await?)
}

async fn open_proxy(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let pid: u32 = p.get(0, "pid")?;
    let port: u16 = p.get(1, "port")?;
    ok(s.open_proxy(pid, port).await?)
}

// ── Files ───────────────────────────────────────────────────────────

async fn list_dir(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let dir: String = p.get_or(0, "dir", String::new())?;
    let show_hidden: bool = p.get_or(1, "show_hidden", false)?;
    ok(s.list_dir(&dir, show_hidden).await?)
}

async fn get_git_status(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.git_status().await?)
}

async fn get_file_content(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    ok(s.get_file_content(&path).await?)
}

async fn get_base64_file_content(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    ok(s.get_base64_file_content(&path).await?)
}

async fn get_cwd(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.get_cwd().await?)
}

async fn create_file(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let file: String = p.get(0, "file")?;
    let content: Option<String> = p.get_opt(1, "content")?;
    let base64: bool = p.get_or(2, "base64encoded", false)?;
    ok(s.create_file(&file, content.as_deref(), base64).await?)
}

async fn update_file(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let file: String = p.get(0, "file")?;
    let content: String = p.get_or(1, "content", String::new())?;
    let base64: bool = p.get_or(2, "base64encoded", false)?;
    s.update_file(&file, &content, base64).await?;
    Ok(Value::Null)
}

async fn delete_file(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    s.delete_file(&path).await?;
    Ok(Value::Null)
}

async fn move_file(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let from: String = p.get(0, "from_path")?;
    let to: String = p.get(1, "to_path")?;
    s.move_file(&from, &to).await?;
    Ok(Value::Null)
}

async fn copy_file(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    let to: String = p.get(1, "to_path")?;
    ok(s.copy_file(&path, &to).await?)
}

async fn make_dir(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    ok(s.make_dir(&path).await?)
}

// ── Processes ───────────────────────────────────────────────────────

async fn get_processes(s: Arc<EditorSession>, _: Params) -> RpcResult {
    ok(s.get_processes()?)
}

async fn run(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let path: String = p.get(0, "path")?;
    let args: Option<Vec<String>> = p.get_opt(1, "args")?;
    let opts = RunOptions {
        cols: p.get_opt(2, "cols")?,
        rows: p.get_opt(3, "rows")?,
        cwd: p.get_opt(4, "cwd")?,
        env: p.get_opt::<HashMap<String, String>>(5, "env")?,
        term_type: p.get_opt(6, "term_type")?,
    };
    ok(s.run(&path, args, opts).await?)
}

async fn stream_write(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let pid: u32 = p.get(0, "pid")?;
    let data: Value = p.get(1, "data")?;
    s.stream_write(pid, &data).await?;
    Ok(Value::Null)
}

async fn kill(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let pid: u32 = p.get(0, "pid")?;
    let signal: Option<String> = p.get_opt(1, "signal")?;
    Ok(s.kill(pid, signal.as_deref()).await?)
}

async fn resize(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let id: Value = p.get(0, "id")?;
    let cols: u16 = p.get(1, "cols")?;
    let rows: u16 = p.get(2, "rows")?;
    s.resize(&id, cols, rows).await;
    Ok(Value::Null)
}

async fn connect_to_lsp(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let lang: String = p.get(0, "lang")?;
    s.connect_to_lsp(&lang).await?;
    Ok(Value::Null)
}

async fn lsp_write(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let lang: String = p.get(0, "lang")?;
    let data: Value = p.get(1, "data")?;
    s.lsp_write(&lang, &data).await?;
    Ok(Value::Null)
}

async fn run_app_or_service(s: Arc<EditorSession>, p: Params) -> RpcResult {
    let name: String = p.get(0, "name")?;
    ok(s.run_app_or_service(&name).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use serde_json::json;
    use wb_container::ExecChunk;
    use wb_rpc::{Multiplexer, Notifier};

    const METHODS: &[&str] = &[
        "run_build",
        "install_extra_packages",
        "run_setup_script",
        "open_proxy",
        "list_dir",
        "get_processes",
        "get_git_status",
        "get_file_content",
        "get_base64_file_content",
        "get_cwd",
        "create_file",
        "update_file",
        "delete_file",
        "move_file",
        "copy_file",
        "make_dir",
        "run",
        "stream_write",
        "kill",
        "resize",
        "connect_to_lsp",
        "lsp_write",
        "run_app_or_service",
    ];

    fn mux_for(h: &Harness) -> Multiplexer {
        let mut registry = MethodRegistry::new();
        register_all(&mut registry, &h.session);
        let (notifier, _out) = Notifier::channel();
        Multiplexer::new(Arc::new(registry), notifier)
    }

    async fn call(mux: &Multiplexer, request: Value) -> Value {
        let out = mux.handle_text(&request.to_string()).await.unwrap();
        serde_json::from_str(&out.to_text()).unwrap()
    }

    #[tokio::test]
    async fn every_method_is_registered() {
        let h = Harness::new().await;
        let mut registry = MethodRegistry::new();
        register_all(&mut registry, &h.session);
        let mut methods = registry.methods();
        methods.sort();
        let mut expected: Vec<String> = METHODS.iter().map(|m| (*m).to_string()).collect();
        expected.sort();
        assert_eq!(methods, expected);
    }

    #[tokio::test]
    async fn get_cwd_round_trip() {
        let h = Harness::new().await;
        h.runtime.on_exec(|_| (vec![ExecChunk::Stdout("/home/runner/repo\n".into())], 0));
        h.session.init().await;
        let mux = mux_for(&h);

        let resp = call(&mux, json!({"jsonrpc": "2.0", "method": "get_cwd", "id": 1})).await;
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": "/home/runner/repo"}));
        h.session.close().await;
    }

    #[tokio::test]
    async fn file_methods_accept_named_and_positional() {
        let h = Harness::new().await;
        h.session.init().await;
        let mux = mux_for(&h);

        let created = call(
            &mux,
            json!({"jsonrpc": "2.0", "method": "create_file", "params": {"file": "a.txt", "content": "hi"}, "id": 1}),
        )
        .await;
        assert_eq!(created["result"], "a.txt");

        let copied = call(
            &mux,
            json!({"jsonrpc": "2.0", "method": "copy_file", "params": ["a.txt", ""], "id": 2}),
        )
        .await;
        assert_eq!(copied["result"], "a (1).txt");

        let listed = call(&mux, json!({"jsonrpc": "2.0", "method": "list_dir", "id": 3})).await;
        let names: Vec<&str> = listed["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"a (1).txt"));
        h.session.close().await;
    }

    #[tokio::test]
    async fn domain_errors_are_internal_errors() {
        let h = Harness::new().await;
        h.session.init().await;
        let mux = mux_for(&h);

        let resp = call(
            &mux,
            json!({"jsonrpc": "2.0", "method": "open_proxy", "params": [42, 8080], "id": 7}),
        )
        .await;
        assert_eq!(resp["error"]["code"], -32603);
        assert_eq!(resp["error"]["data"], "No such process with given PID: 42");

        let missing = call(&mux, json!({"jsonrpc": "2.0", "method": "get_file_content", "id": 8})).await;
        assert_eq!(missing["error"]["code"], -32602);
        h.session.close().await;
    }

    #[tokio::test]
    async fn resize_never_fails() {
        let h = Harness::new().await;
        h.session.init().await;
        let mux = mux_for(&h);
        let resp = call(
            &mux,
            json!({"jsonrpc": "2.0", "method": "resize", "params": {"id": "nope", "cols": 80, "rows": 24}, "id": 1}),
        )
        .await;
        assert_eq!(resp["result"], Value::Null);
        h.session.close().await;
    }
}
