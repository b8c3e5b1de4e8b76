//! Reconnecting WebSocket carrying one process's stdio or one LSP channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wb_core::retry::calculate_backoff_delay;

use crate::errors::{Result, SidecarError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const RECONNECT_BASE_MS: u64 = 100;
const RECONNECT_MAX_MS: u64 = 5000;

/// How long `send` waits for a first connection by default.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// One frame read from or written to a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl StreamFrame {
    /// Text form; binary frames are decoded lossily.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl From<String> for StreamFrame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for StreamFrame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Callback invoked for every inbound frame.
pub type ReceiveFn = Arc<dyn Fn(StreamFrame) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared {
    url: String,
    on_receive: ReceiveFn,
    ready: watch::Sender<bool>,
    sink: Mutex<Option<WsSink>>,
}

/// Reconnecting WebSocket with a ready gate.
///
/// [`ready`](Self::ready) resolves after the first successful connect and
/// stays satisfied across reconnects. The socket is re-dialled on remote
/// close or connect failure until [`stop`](Self::stop) is called. Once
/// stopped, waiters fail with [`SidecarError::StreamClosed`].
pub struct StreamHandler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ready_timeout: Duration,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandler {
    /// Handler for `url`. Nothing is dialled until [`start`](Self::start).
    pub fn new(url: impl Into<String>, on_receive: ReceiveFn) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                on_receive,
                ready,
                sink: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Bound how long [`send`](Self::send) waits for a first connection.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Endpoint this handler dials.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Launch the receive loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            self.cancel.clone(),
        )));
    }

    /// Wait until the first connection has been made, or fail once the
    /// handler is stopped.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.shared.ready.subscribe();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.closed()),
            waited = rx.wait_for(|ready| *ready) => waited.map(|_| ()).map_err(|_| self.closed()),
        }
    }

    /// [`ready`](Self::ready), giving up after `timeout`.
    pub async fn ready_within(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.ready())
            .await
            .map_err(|_| SidecarError::StreamTimeout {
                url: self.shared.url.clone(),
            })?
    }

    fn closed(&self) -> SidecarError {
        SidecarError::StreamClosed {
            url: self.shared.url.clone(),
        }
    }

    /// Whether the first connection has been made.
    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    /// Write one frame once the stream is ready.
    pub async fn send(&self, frame: impl Into<StreamFrame>) -> Result<()> {
        self.ready_within(self.ready_timeout).await?;
        let message = match frame.into() {
            StreamFrame::Text(text) => Message::Text(text.into()),
            StreamFrame::Binary(bytes) => Message::Binary(bytes),
        };
        let mut sink = self.shared.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(self.closed());
        };
        sink.send(message).await?;
        Ok(())
    }

    /// Cancel the receive loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Cancel the receive loop and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        let connected = tokio::select! {
            () = cancel.cancelled() => break,
            result = connect_async(shared.url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                attempt = 0;
                let (sink, mut stream) = ws.split();
                *shared.sink.lock().await = Some(sink);
                shared.ready.send_replace(true);
                debug!(url = %shared.url, "stream connected");

                loop {
                    let message = tokio::select! {
                        () = cancel.cancelled() => {
                            if let Some(mut sink) = shared.sink.lock().await.take() {
                                let _ = sink.close().await;
                            }
                            debug!(url = %shared.url, "stream cancelled");
                            return;
                        }
                        message = stream.next() => message,
                    };
                    match message {
                        Some(Ok(Message::Text(text))) => (shared.on_receive)(StreamFrame::Text(text.as_str().to_owned())).await,
                        Some(Ok(Message::Binary(bytes))) => (shared.on_receive)(StreamFrame::Binary(bytes)).await,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(url = %shared.url, error = %e, "stream read failed");
                            break;
                        }
                    }
                }
                let _ = shared.sink.lock().await.take();
                debug!(url = %shared.url, "stream closed, reconnecting");
            }
            Err(e) => debug!(url = %shared.url, error = %e, "stream connect failed"),
        }

        let delay = calculate_backoff_delay(attempt, RECONNECT_BASE_MS, RECONNECT_MAX_MS);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_millis(delay)) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    /// Local WebSocket server that echoes text frames back with an `echo:`
    /// prefix and reports every received frame on a channel.
    pub(crate) async fn echo_server() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let tx = tx.clone();
                let _ = tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else { return };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let text = text.as_str().to_owned();
                            let _ = ws.send(Message::Text(format!("echo:{text}").into())).await;
                            let _ = tx.send(text);
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}"), rx)
    }
}
