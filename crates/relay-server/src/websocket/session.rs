//! One WebSocket session.
//!
//! The socket is split into a writer draining the connection's outbound
//! channel and a reader applying client commands. Whichever side ends first
//! ends the session, and the connection is then unregistered. A hub-side
//! close (health timeout, shutdown) is observed through the transport's close
//! signal and answered with a close frame.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use futures::stream::SplitSink;
use metrics::counter;
use relay_core::ConnectionMeta;
use relay_hub::{ChannelTransport, Hub, RegistryError, Transport};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::{self, CommandReply};
use crate::metrics::{WS_SESSIONS_REFUSED_TOTAL, WS_SESSIONS_TOTAL};

/// Query parameters of the upgrade request.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Owning principal.
    pub user_id: String,
    /// Tenant the connection belongs to.
    pub tenant_id: String,
}

/// Fresh connection ID for an accepted socket.
pub fn new_connection_id() -> String {
    format!("conn_{}", Uuid::now_v7().simple())
}

/// Drive `socket` until either side closes.
pub async fn run(
    socket: WebSocket,
    hub: Arc<Hub>,
    params: ConnectParams,
    meta: ConnectionMeta,
    outbound_buffer: usize,
) {
    let connection_id = new_connection_id();
    let (transport, mut outbound) = ChannelTransport::new(outbound_buffer);
    let closed = transport.close_signal();
    let transport = Arc::new(transport);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let handle: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    if let Err(e) = hub
        .register(&connection_id, &params.user_id, &params.tenant_id, handle, meta)
        .await
    {
        refuse(&mut ws_tx, &connection_id, &e).await;
        return;
    }
    counter!(WS_SESSIONS_TOTAL).increment(1);

    let writer = async {
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                () = closed.cancelled() => {
                    flush_and_close(&mut ws_tx, &mut outbound).await;
                    break;
                }
            }
        }
    };

    let reader = async {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = command::handle_text(&hub, &connection_id, &text).await {
                        reply_to(&transport, &connection_id, &reply);
                    }
                }
                Message::Pong(_) => {
                    let _ = hub.handle_pong(&connection_id).await;
                }
                Message::Close(_) => break,
                Message::Binary(_) | Message::Ping(_) => {}
            }
        }
    };

    tokio::select! {
        () = writer => debug!(conn_id = %connection_id, "writer finished"),
        () = reader => debug!(conn_id = %connection_id, "reader finished"),
    }

    let _ = hub.unregister(&connection_id).await;
    info!(conn_id = %connection_id, "websocket session ended");
}

type Sink = SplitSink<WebSocket, Message>;

async fn refuse(ws_tx: &mut Sink, connection_id: &str, error: &RegistryError) {
    let (code, reason) = match error {
        RegistryError::TenantQuotaExceeded { .. } => (close_code::POLICY, "quota"),
        _ => (close_code::ERROR, "error"),
    };
    counter!(WS_SESSIONS_REFUSED_TOTAL, "reason" => reason).increment(1);
    warn!(conn_id = connection_id, error = %error, "websocket registration refused");
    let frame = CloseFrame {
        code,
        reason: error.to_string().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}

async fn flush_and_close(ws_tx: &mut Sink, outbound: &mut mpsc::Receiver<Arc<String>>) {
    while let Ok(text) = outbound.try_recv() {
        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
            return;
        }
    }
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: "connection closed by server".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}

fn reply_to(transport: &ChannelTransport, connection_id: &str, reply: &CommandReply) {
    let frame = match serde_json::to_string(reply) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conn_id = connection_id, error = %e, "failed to encode command reply");
            return;
        }
    };
    if let Err(e) = transport.send(Arc::new(frame)) {
        warn!(conn_id = connection_id, error = %e, "failed to queue command reply");
    }
}
