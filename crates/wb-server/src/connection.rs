//! One editor `WebSocket` connection from accept to teardown.
//!
//! The socket is split: a writer task drains the session's outbound queue
//! (responses and notifications in enqueue order) while the reader loop
//! dispatches every inbound frame as its own task, so a slow call never
//! holds up the next one.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use wb_rpc::{MethodRegistry, Multiplexer, Notifier};
use wb_session::{EditorSession, SessionContext};

use crate::identity::Identity;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::shutdown::ShutdownCoordinator;

/// Drive `socket` for `identity` until the client leaves or the server
/// shuts down, then close the session.
pub async fn serve(mut socket: WebSocket, ctx: SessionContext, identity: Identity, shutdown: ShutdownCoordinator) {
    let session_id = match ctx.sessions.start_session(&identity.principal.email).await {
        Ok(id) => id,
        Err(e) => {
            error!(user = %identity.principal.username, error = %e, "session registration failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let span = info_span!("session", id = %session_id, user = %identity.principal.username, repo = %identity.resource.id);
    run(socket, ctx, identity, session_id, shutdown).instrument(span).await;
}

async fn run(
    socket: WebSocket,
    ctx: SessionContext,
    identity: Identity,
    session_id: wb_core::ids::SessionId,
    shutdown: ShutdownCoordinator,
) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("editor connected");

    let (notifier, mut outbound) = Notifier::channel();
    let session = EditorSession::new(
        ctx.clone(),
        session_id.clone(),
        identity.principal,
        identity.resource,
        identity.repo_path,
        notifier.clone(),
    );
    let mut registry = MethodRegistry::new();
    wb_session::register_all(&mut registry, &session);
    let mux = Multiplexer::new(Arc::new(registry), notifier);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(
        async move {
            while let Some(frame) = outbound.next().await {
                if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                    debug!("client gone, dropping outbound frames");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        }
        .in_current_span(),
    );

    let init = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.init().await }.in_current_span())
    };

    let token = shutdown.token();
    let mut calls = JoinSet::new();
    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!("server shutting down");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let mux = mux.clone();
                    let _ = calls.spawn(async move { mux.dispatch(text.as_str()).await }.in_current_span());
                }
                Some(Ok(Message::Binary(_))) => warn!("ignoring binary frame"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket error");
                    break;
                }
            },
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("rpc call panicked");
                    }
                }
            }
        }
    }

    init.abort();
    calls.abort_all();
    session.close().await;
    if let Err(e) = ctx.sessions.end_session(session_id.as_str()).await {
        warn!(error = %e, "session deregistration failed");
    }
    mux.end();
    let _ = writer.await;

    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!("editor disconnected");
}
