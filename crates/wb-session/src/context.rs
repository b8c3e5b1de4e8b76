//! Services shared by every session of one server process.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use wb_container::{ContainerRuntime, EditorOptions};
use wb_proxy::{KeyValueStore, ProxyHasher, ProxyRegistrar, SessionRegistry};
use wb_settings::WorkbenchSettings;

const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicitly constructed services injected into each [`EditorSession`].
///
/// [`EditorSession`]: crate::EditorSession
#[derive(Clone)]
pub struct SessionContext {
    /// Container engine.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Editor container launch parameters.
    pub editor: EditorOptions,
    /// Reverse proxy registration.
    pub registrar: Arc<ProxyRegistrar>,
    /// Live sessions and their proxy hashes.
    pub sessions: SessionRegistry,
    /// Proxy hash derivation.
    pub hasher: Arc<ProxyHasher>,
    /// Ports that are proxied automatically when opened.
    pub watched_ports: Range<u16>,
    /// How long `run` waits for a process's stdio stream to connect.
    pub stream_ready_timeout: Duration,
}

impl SessionContext {
    /// Context from settings over the given runtime and control-plane store.
    pub fn from_settings(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn KeyValueStore>,
        settings: &WorkbenchSettings,
    ) -> wb_proxy::Result<Self> {
        Ok(Self {
            runtime,
            editor: EditorOptions::from_settings(&settings.docker, &settings.sidecar),
            registrar: Arc::new(ProxyRegistrar::from_settings(Arc::clone(&store), &settings.proxy)?),
            sessions: SessionRegistry::new(store),
            hasher: Arc::new(ProxyHasher::from_settings(&settings.proxy)),
            watched_ports: settings.proxy.port_range_start..settings.proxy.port_range_end,
            stream_ready_timeout: STREAM_READY_TIMEOUT,
        })
    }

    /// Whether `port` is auto-proxied.
    pub fn watches_port(&self, port: u16) -> bool {
        self.watched_ports.contains(&port)
    }
}
