//! Workbench config hot reload.
//!
//! A reload notifies the client of the new config, then starts one
//! supervised task per changed area so a failing area does not hold up the
//! others.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use wb_repo::{ConfigArea, changed_areas};

use crate::errors::Result;
use crate::session::EditorSession;

impl EditorSession {
    /// Reload `workbench.yml` and reconcile whatever changed.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn on_workbench_config_changed(self: &Arc<Self>) -> Result<BTreeSet<ConfigArea>> {
        let repo = self.repo()?;
        let old = repo.workbench_config();
        let new = repo.load_workbench_config().await;
        self.notify_config(&new);

        let areas = changed_areas(&old, &new);
        for &area in &areas {
            info!(area = area.path(), "config area changed");
            let session = Arc::clone(self);
            self.supervisor.spawn("reconfigure", async move {
                if let Err(e) = session.reconcile_area(area).await {
                    error!(area = area.path(), error = %e, "reconfiguration failed");
                }
            });
        }
        Ok(areas)
    }

    async fn reconcile_area(&self, area: ConfigArea) -> Result<()> {
        match area {
            ConfigArea::LanguageService => self.start_language_service().await,
            ConfigArea::Packages => self.install_extra_packages().await.map(drop),
            ConfigArea::SetupScript => self.run_setup_script().await.map(drop),
            ConfigArea::Networks => {
                self.reconcile_networks().await;
                Ok(())
            }
        }
    }

    /// Attach the editor to the configured networks and detach it from the
    /// rest. The managed network is never touched.
    pub async fn reconcile_networks(&self) {
        let config = self.workbench_config();
        let desired: BTreeSet<&str> = config.desired_networks().iter().map(String::as_str).collect();
        let managed = self.ctx.editor.network.as_str();
        let connected: BTreeSet<String> = self
            .editor
            .get_networks()
            .await
            .into_iter()
            .filter(|n| n != managed)
            .collect();

        let stale = connected.iter().filter(|n| !desired.contains(n.as_str()));
        let _ = join_all(stale.map(|name| async move {
            if self.editor.disconnect_from_network(name).await {
                self.notify("network_disconnected", json!({ "name": name }));
            }
        }))
        .await;

        let missing = desired.iter().filter(|n| **n != managed && !connected.contains(**n));
        let _ = join_all(missing.map(|name| async move {
            if self.editor.connect_to_network(name).await {
                let ip = self.editor.get_network_ip(name).await;
                self.notify("network_connected", json!({ "name": name, "ip": ip }));
            } else {
                warn!(network = name, "network not connected");
            }
        }))
        .await;
    }

    /// (Re)start the language server proxy for the configured servers.
    pub async fn start_language_service(&self) -> Result<()> {
        let servers = self.workbench_config().development.language_servers();
        let mut slot = self.lsp.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        if servers.is_empty() {
            return Ok(());
        }
        let handler = self.process_manager()?.start_lsp_service(&servers).await?;
        let languages: Vec<&String> = handler.available().iter().collect();
        self.notify("lsp_service_started", json!({ "languages": languages }));
        *slot = Some(Arc::new(handler));
        Ok(())
    }
}
