//! Message transport: one JSON text per WebSocket message, no handshake,
//! no AEAD.  Handlers are transport-agnostic; the only differences from
//! the stream transport are the framing and the absent crypto session.

use crate::connection::{ConnCtx, ConnHandle, Outbound, OutboundRx};
use crate::dispatcher::{disconnect_cleanup, dispatch_payload};
use crate::state::AppState;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

pub async fn run_ws_listener(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "new WebSocket client connected");
                let state = Arc::clone(&state);
                tokio::spawn(handle_ws_conn(stream, addr, state));
            }
            Err(e) => {
                warn!(error = %e, "failed to accept WebSocket connection");
            }
        }
    }
}

async fn handle_ws_conn(stream: TcpStream, addr: SocketAddr, state: Arc<AppState>) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%addr, error = %e, "WebSocket upgrade failed");
            return;
        }
    };
    let conn_id = state.next_conn_id();
    let (sink, mut read) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx));

    let ctx = ConnCtx {
        handle: ConnHandle::new(conn_id, tx),
        crypto: None,
    };

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if dispatch_payload(&state, &ctx, text.as_bytes()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(data)) => ctx.handle.send_pong(data.to_vec()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%addr, error = %e, "WebSocket error");
                break;
            }
        }
    }

    debug!(%addr, conn = conn_id, "WebSocket connection closed");
    disconnect_cleanup(&state, conn_id).await;
}

async fn write_loop(mut sink: SplitSink<WebSocketStream<TcpStream>, Message>, mut rx: OutboundRx) {
    while let Some(item) = rx.recv().await {
        let msg = match item {
            // No seal on this transport; cleartext and sealed queue items
            // both go out as plain text.
            Outbound::Message(json) | Outbound::ClearMessage(json) => Message::Text(json.into()),
            Outbound::Pong(payload) => Message::Pong(payload.into()),
        };
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}
