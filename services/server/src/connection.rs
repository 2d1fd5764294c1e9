//! Per-connection plumbing shared by both transports.
//!
//! A connection is represented everywhere by a [`ConnHandle`]: an id plus
//! the sending half of its outbound queue.  Handlers push JSON text onto the
//! queue; the transport's writer task applies framing and sealing.  Sends
//! are fire-and-forget, so no handler ever blocks on another connection.

use crate::crypto::CryptoSession;
use msgr_protocol::ServerMessage;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One queued outbound item.
pub enum Outbound {
    /// JSON text; sealed by the stream writer once the session key is ready.
    Message(String),
    /// JSON text forced into cleartext frame form.  Used only for the
    /// handshake reply, which the client must read before it can decrypt.
    ClearMessage(String),
    /// WebSocket pong echo; never produced on the stream transport.
    Pong(Vec<u8>),
}

pub type OutboundTx = mpsc::UnboundedSender<Outbound>;
pub type OutboundRx = mpsc::UnboundedReceiver<Outbound>;

/// Routable address of a live connection.
#[derive(Clone)]
pub struct ConnHandle {
    pub id: u64,
    tx: OutboundTx,
}

impl ConnHandle {
    pub fn new(id: u64, tx: OutboundTx) -> Self {
        Self { id, tx }
    }

    /// Queue a message for this connection.  A closed queue means the
    /// connection is already gone; the disconnect sweep cleans up.
    pub fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                if self.tx.send(Outbound::Message(json)).is_err() {
                    debug!(conn = self.id, "dropping send to closed connection");
                }
            }
            Err(e) => debug!(conn = self.id, error = %e, "failed to serialize outbound message"),
        }
    }

    /// Queue a message bypassing the seal (handshake reply only).
    pub fn send_clear(&self, msg: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            let _ = self.tx.send(Outbound::ClearMessage(json));
        }
    }

    pub fn send_pong(&self, payload: Vec<u8>) {
        let _ = self.tx.send(Outbound::Pong(payload));
    }
}

/// Dispatch context of one connection: its address plus the crypto session
/// when the transport carries one.  Handlers never see the socket itself.
pub struct ConnCtx {
    pub handle: ConnHandle,
    pub crypto: Option<Arc<Mutex<CryptoSession>>>,
}

impl ConnCtx {
    pub fn conn_id(&self) -> u64 {
        self.handle.id
    }
}
