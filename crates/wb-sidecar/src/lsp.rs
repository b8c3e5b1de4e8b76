//! Language server channels multiplexed behind one process manager port.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{Result, SidecarError};
use crate::stream::{DEFAULT_READY_TIMEOUT, ReceiveFn, StreamFrame, StreamHandler};

/// Language server proxy started by `POST /startLsp`.
///
/// Each language gets at most one open [`StreamHandler`].
pub struct LspServiceHandler {
    ip: String,
    port: u16,
    available: BTreeSet<String>,
    ready_timeout: Duration,
    handlers: Mutex<HashMap<String, Arc<StreamHandler>>>,
}

impl LspServiceHandler {
    /// Handler for the proxy at `ip:port` serving `available` languages.
    pub fn new(ip: impl Into<String>, port: u16, available: BTreeSet<String>) -> Self {
        Self {
            ip: ip.into(),
            port,
            available,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Bound how long a channel gets to connect.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Languages the proxy can serve.
    pub fn available(&self) -> &BTreeSet<String> {
        &self.available
    }

    /// Channel URL for `lang`.
    pub fn url_for(&self, lang: &str) -> String {
        format!("ws://{}:{}/?name={lang}", self.ip, self.port)
    }

    /// Open the channel for `lang` and wait until it is connected.
    ///
    /// A channel that does not connect in time is closed and `lang` can be
    /// connected again.
    pub async fn connect(&self, lang: &str, on_receive: ReceiveFn) -> Result<()> {
        if !self.available.contains(lang) {
            return Err(SidecarError::LspUnavailable { lang: lang.to_owned() });
        }
        let handler = {
            let mut handlers = self.handlers.lock().await;
            if handlers.contains_key(lang) {
                return Err(SidecarError::LspAlreadyRunning { lang: lang.to_owned() });
            }
            let handler = Arc::new(
                StreamHandler::new(self.url_for(lang), on_receive).with_ready_timeout(self.ready_timeout),
            );
            let _ = handlers.insert(lang.to_owned(), Arc::clone(&handler));
            handler
        };
        handler.start();
        if let Err(e) = handler.ready_within(self.ready_timeout).await {
            warn!(lang, error = %e, "language server channel did not open");
            {
                let mut handlers = self.handlers.lock().await;
                if handlers.get(lang).is_some_and(|h| Arc::ptr_eq(h, &handler)) {
                    let _ = handlers.remove(lang);
                }
            }
            handler.shutdown().await;
            return Err(e);
        }
        info!(lang, port = self.port, "language server channel open");
        Ok(())
    }

    /// Write to the open channel for `lang`.
    pub async fn send(&self, lang: &str, data: impl Into<StreamFrame>) -> Result<()> {
        let handler = self
            .handlers
            .lock()
            .await
            .get(lang)
            .cloned()
            .ok_or_else(|| SidecarError::LspNotRunning { lang: lang.to_owned() })?;
        handler.send(data).await
    }

    /// Languages with an open channel.
    pub async fn running(&self) -> BTreeSet<String> {
        self.handlers.lock().await.keys().cloned().collect()
    }

    /// Close every channel.
    pub async fn stop(&self) {
        let handlers: Vec<(String, Arc<StreamHandler>)> = self.handlers.lock().await.drain().collect();
        for (lang, handler) in handlers {
            handler.shutdown().await;
            debug!(lang, "language server channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;

    use crate::stream::test_support::echo_server;

    fn noop() -> ReceiveFn {
        Arc::new(|_| async {}.boxed())
    }

    fn handler_for(url: &str, langs: &[&str]) -> LspServiceHandler {
        let addr = url.trim_start_matches("ws://");
        let (ip, port) = addr.rsplit_once(':').unwrap();
        LspServiceHandler::new(ip, port.parse().unwrap(), langs.iter().map(|s| (*s).to_owned()).collect())
    }

    #[test]
    fn url_carries_language() {
        let h = LspServiceHandler::new("10.0.0.2", 4000, BTreeSet::new());
        assert_eq!(h.url_for("python"), "ws://10.0.0.2:4000/?name=python");
    }

    #[tokio::test]
    async fn unavailable_language_is_rejected() {
        let h = LspServiceHandler::new("127.0.0.1", 1, ["python".to_owned()].into());
        assert_matches!(h.connect("rust", noop()).await, Err(SidecarError::LspUnavailable { lang }) if lang == "rust");
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (url, mut server_rx) = echo_server().await;
        let h = handler_for(&url, &["python"]);
        tokio::time::timeout(Duration::from_secs(5), h.connect("python", noop())).await.unwrap().unwrap();
        assert_matches!(h.connect("python", noop()).await, Err(SidecarError::LspAlreadyRunning { .. }));

        h.send("python", "{}").await.unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), "{}");
        assert_eq!(h.running().await, ["python".to_owned()].into());

        h.stop().await;
        assert!(h.running().await.is_empty());
    }

    #[tokio::test]
    async fn failed_connect_frees_the_language() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let h = LspServiceHandler::new("127.0.0.1", port, ["python".to_owned()].into())
            .with_ready_timeout(Duration::from_millis(100));

        let first = tokio::time::timeout(Duration::from_secs(3), h.connect("python", noop())).await.unwrap();
        assert_matches!(first, Err(SidecarError::StreamTimeout { .. }));
        assert!(h.running().await.is_empty());

        let again = tokio::time::timeout(Duration::from_secs(3), h.connect("python", noop())).await.unwrap();
        assert_matches!(again, Err(SidecarError::StreamTimeout { .. }));
    }

    #[tokio::test]
    async fn send_to_closed_language_fails() {
        let h = LspServiceHandler::new("127.0.0.1", 1, ["python".to_owned()].into());
        assert_matches!(h.send("python", "x").await, Err(SidecarError::LspNotRunning { .. }));
    }
}
