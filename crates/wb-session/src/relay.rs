//! Process manager notifications → proxy registrations → client.
//!
//! Every notification is applied to the session's port bookkeeping first and
//! then forwarded to the client under its wire name. Ports in the watched
//! band are exposed through the reverse proxy when they appear and withdrawn
//! when they disappear or their process (or its parent) exits.

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use wb_sidecar::{Notification, NotificationType};

use crate::errors::{Result, SessionError};
use crate::session::{EditorSession, to_json};

impl EditorSession {
    /// Handle one notification. Proxy failures are logged per port; the
    /// notification is always forwarded.
    #[instrument(skip(self, notif), fields(session = %self.id, kind = notif.kind.as_str(), pid = ?notif.pid))]
    pub async fn on_notification(&self, notif: Notification) {
        if self.is_closed() {
            self.log_dropped(notif.kind.as_str());
            return;
        }
        debug!("process manager notification");
        self.apply_notification(&notif).await;
        self.notify(notif.kind.as_str(), to_json(&notif));
    }

    async fn apply_notification(&self, notif: &Notification) {
        match notif.kind {
            NotificationType::ProcessExited => {
                let Some(pid) = notif.pid else { return };
                let stream = {
                    let mut tracked = self.tracked.lock();
                    tracked.apps.retain(|_, p| p.pid != pid);
                    tracked.streams.remove(&pid)
                };
                if let Some(stream) = stream {
                    stream.stop();
                }
                let withdrawn: Vec<(u32, Vec<u16>)> = {
                    let mut tracked = self.tracked.lock();
                    let children: Vec<u32> =
                        tracked.parents.iter().filter(|(_, parent)| **parent == pid).map(|(child, _)| *child).collect();
                    let mut withdrawn = Vec::with_capacity(children.len() + 1);
                    for cpid in children {
                        let _ = tracked.parents.remove(&cpid);
                        withdrawn.push((cpid, tracked.ports.remove(&cpid).unwrap_or_default()));
                    }
                    withdrawn.push((pid, tracked.ports.remove(&pid).unwrap_or_default()));
                    withdrawn
                };
                for (owner, ports) in withdrawn {
                    self.close_proxies(owner, &ports).await;
                }
            }
            NotificationType::ChildProcessStarted => {
                if let (Some(parent), Some(cpid)) = (notif.pid, child_pid(notif)) {
                    let _ = self.tracked.lock().parents.insert(cpid, parent);
                }
            }
            NotificationType::ChildProcessExited => {
                let Some(cpid) = child_pid(notif) else { return };
                let ports = {
                    let mut tracked = self.tracked.lock();
                    let _ = tracked.parents.remove(&cpid);
                    tracked.ports.remove(&cpid).unwrap_or_default()
                };
                self.close_proxies(cpid, &ports).await;
            }
            NotificationType::PortsChanged => {
                let Some(pid) = notif.pid else { return };
                let ports: Vec<u16> = serde_json::from_value(notif.data.clone()).unwrap_or_else(|e| {
                    warn!(error = %e, "malformed port list");
                    Vec::new()
                });
                let previous = self
                    .tracked
                    .lock()
                    .ports
                    .insert(pid, ports.clone())
                    .unwrap_or_default();

                self.remember_parent(pid);

                let closed: Vec<u16> = previous.iter().copied().filter(|p| !ports.contains(p)).collect();
                self.close_proxies(pid, &closed).await;
                for port in ports.into_iter().filter(|p| !previous.contains(p)) {
                    if !self.ctx.watches_port(port) {
                        continue;
                    }
                    if let Err(e) = self.proxy_port(pid, port).await {
                        warn!(port, error = %e, "proxy registration failed");
                        // Forget the port so the next port list retries it.
                        if let Some(known) = self.tracked.lock().ports.get_mut(&pid) {
                            known.retain(|p| *p != port);
                        }
                    }
                }
            }
            NotificationType::ProcessStarted | NotificationType::OpenFileRequest => {}
        }
    }

    /// Record the parent of `pid` when the mirror knows it as a child.
    fn remember_parent(&self, pid: u32) {
        if self.tracked.lock().parents.contains_key(&pid) {
            return;
        }
        let Ok(pm) = self.process_manager() else { return };
        let parent = pm
            .processes()
            .values()
            .find(|p| p.children.contains_key(&pid))
            .map(|p| p.pid);
        if let Some(parent) = parent {
            let _ = self.tracked.lock().parents.insert(pid, parent);
        }
    }

    fn proxy_name(&self, pid: u32, port: u16) -> String {
        self.ctx.hasher.hash(&self.resource.id, pid, port, self.id.as_str())
    }

    /// Register `pid:port` with the reverse proxy, record the hash against
    /// the session and tell the client. Returns the public URL once the
    /// backend is up.
    #[instrument(skip(self), fields(session = %self.id))]
    pub(crate) async fn proxy_port(&self, pid: u32, port: u16) -> Result<Option<String>> {
        let ip = self.editor.ip().ok_or(wb_container::ContainerError::NotStarted)?;
        let name = self.proxy_name(pid, port);
        let _ = self.tracked.lock().proxies.insert(name.clone());
        self.ctx.sessions.add_proxy_hash(self.id.as_str(), &name).await?;
        let url = self.ctx.registrar.new_service(&name, &ip, port).await?;
        self.notify("proxy_opened", json!({ "pid": pid, "port": port, "url": url }));
        Ok(url)
    }

    /// Withdraw the proxy registrations of `pid` on `ports`. Failures are
    /// logged per port.
    async fn close_proxies(&self, pid: u32, ports: &[u16]) {
        for &port in ports {
            let name = self.proxy_name(pid, port);
            if !self.tracked.lock().proxies.remove(&name) {
                continue;
            }
            if let Err(e) = self.ctx.registrar.remove_service(&name).await {
                warn!(pid, port, error = %e, "proxy close failed");
            }
            if let Err(e) = self.ctx.sessions.remove_proxy_hash(self.id.as_str(), &name).await {
                warn!(pid, port, error = %e, "session proxy hash removal failed");
            }
            self.notify("proxy_closed", json!({ "pid": pid, "port": port }));
        }
    }

    /// Expose `port` of `pid` on request, regardless of the watched band.
    pub async fn open_proxy(&self, pid: u32, port: u16) -> Result<Option<String>> {
        let ports = self
            .tracked
            .lock()
            .ports
            .get(&pid)
            .cloned()
            .filter(|p| !p.is_empty())
            .ok_or(SessionError::NoSuchProcess { pid })?;
        if !ports.contains(&port) {
            return Err(SessionError::NoOpenPort { pid, port });
        }
        self.proxy_port(pid, port).await
    }
}

fn child_pid(notif: &Notification) -> Option<u32> {
    notif.data.get("pid").and_then(Value::as_u64).and_then(|p| u32::try_from(p).ok())
}
