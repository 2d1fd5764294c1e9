//! Stream transport: length-prefixed frames over TCP, optionally sealed.
//!
//! Each accepted connection gets a reader task (this module's loop) and a
//! writer task draining the connection's outbound queue.  The writer owns
//! the decision to seal: once the crypto session is ready every queued
//! message goes out encrypted, except the handshake reply which is marked
//! cleartext explicitly.

use crate::connection::{ConnCtx, ConnHandle, Outbound, OutboundRx};
use crate::crypto::{CryptoError, CryptoSession};
use crate::dispatcher::{disconnect_cleanup, dispatch_payload};
use crate::framing::{self, FrameError};
use crate::state::AppState;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum StreamError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub async fn run_tcp_listener(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "new TCP client connected");
                let state = Arc::clone(&state);
                tokio::spawn(handle_stream_conn(stream, addr, state));
            }
            Err(e) => {
                warn!(error = %e, "failed to accept TCP connection");
            }
        }
    }
}

async fn handle_stream_conn(stream: TcpStream, addr: SocketAddr, state: Arc<AppState>) {
    let conn_id = state.next_conn_id();
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, LengthDelimitedCodec::new());
    let sink = FramedWrite::new(write_half, LengthDelimitedCodec::new());

    let crypto = Arc::new(Mutex::new(CryptoSession::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx, Arc::clone(&crypto)));

    let ctx = ConnCtx {
        handle: ConnHandle::new(conn_id, tx),
        crypto: Some(Arc::clone(&crypto)),
    };

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%addr, error = %e, "framing error, dropping connection");
                break;
            }
        };
        // An undecryptable frame is fatal and gets no reply.
        let payload = match read_payload(&crypto, &frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%addr, error = %e, "unreadable frame, dropping connection");
                break;
            }
        };
        if dispatch_payload(&state, &ctx, &payload).await.is_err() {
            break;
        }
    }

    debug!(%addr, conn = conn_id, "TCP connection closed");
    disconnect_cleanup(&state, conn_id).await;
}

/// Decode one frame body into JSON bytes, opening it when the session key
/// is established.
fn read_payload(crypto: &Mutex<CryptoSession>, frame: &[u8]) -> Result<Vec<u8>, StreamError> {
    let session = crypto.lock().expect("crypto lock");
    if session.is_ready() {
        let (nonce, sealed) = framing::decode_sealed(frame)?;
        Ok(session.open(&nonce, sealed)?)
    } else {
        Ok(framing::decode_clear(frame)?.to_vec())
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    mut rx: OutboundRx,
    crypto: Arc<Mutex<CryptoSession>>,
) {
    while let Some(item) = rx.recv().await {
        let body = match item {
            Outbound::Message(json) => {
                let sealed = {
                    let session = crypto.lock().expect("crypto lock");
                    if session.is_ready() {
                        Some(session.seal(json.as_bytes()))
                    } else {
                        None
                    }
                };
                match sealed {
                    Some(Ok((nonce, sealed))) => framing::encode_sealed(&nonce, &sealed),
                    Some(Err(e)) => {
                        warn!(error = %e, "failed to seal outbound frame");
                        break;
                    }
                    None => framing::encode_clear(json.as_bytes()),
                }
            }
            Outbound::ClearMessage(json) => framing::encode_clear(json.as_bytes()),
            // Transport-level pings do not exist on the stream transport.
            Outbound::Pong(_) => continue,
        };
        if sink.send(Bytes::from(body)).await.is_err() {
            break;
        }
    }
}
