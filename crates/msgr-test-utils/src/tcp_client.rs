//! A test client for the framed stream transport.
//!
//! Frame layout (mirrors what the production clients send):
//! - outer: 4-byte big-endian length prefix (handled by
//!   `LengthDelimitedCodec`);
//! - cleartext body: one `u32-be length || bytes` blob of UTF-8 JSON;
//! - sealed body: a blob holding the 24-byte nonce, then a blob holding
//!   `16-byte tag || ciphertext`.

use crate::{TestResult, RECV_TIMEOUT};
use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use x25519_dalek::{EphemeralSecret, PublicKey};

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

pub struct TcpTestClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    cipher: Option<XChaCha20Poly1305>,
}

impl TcpTestClient {
    pub async fn connect(addr: SocketAddr) -> TestResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            cipher: None,
        })
    }

    /// Run the key exchange; every frame after this is sealed.
    pub async fn handshake(&mut self) -> TestResult<()> {
        use base64::Engine as _;
        let secret = EphemeralSecret::random();
        let public = PublicKey::from(&secret);
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(public.as_bytes());

        self.send(&json!({"type": "handshake", "key": key_b64})).await?;

        let reply = self.recv().await?;
        if reply["type"] != "handshake" {
            return Err(format!("expected handshake reply, got {reply}").into());
        }
        let server_key: [u8; 32] = base64::engine::general_purpose::STANDARD
            .decode(reply["key"].as_str().ok_or("handshake reply has no key")?)?
            .try_into()
            .map_err(|_| "server public key is not 32 bytes")?;

        let shared = secret.diffie_hellman(&PublicKey::from(server_key));
        self.cipher = Some(XChaCha20Poly1305::new(Key::from_slice(shared.as_bytes())));
        Ok(())
    }

    pub async fn send(&mut self, value: &Value) -> TestResult<()> {
        let json = serde_json::to_vec(value)?;
        let body = match &self.cipher {
            Some(cipher) => {
                let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
                let mut buf = json;
                let tag = cipher
                    .encrypt_in_place_detached(&nonce, b"", &mut buf)
                    .map_err(|_| "seal failed")?;
                let mut sealed = Vec::with_capacity(TAG_LEN + buf.len());
                sealed.extend_from_slice(&tag);
                sealed.extend_from_slice(&buf);
                let mut body = Vec::new();
                put_blob(&mut body, &nonce);
                put_blob(&mut body, &sealed);
                body
            }
            None => {
                let mut body = Vec::new();
                put_blob(&mut body, &json);
                body
            }
        };
        self.framed.send(Bytes::from(body)).await?;
        Ok(())
    }

    /// Send a raw frame body, bypassing the sealing logic.  For tests that
    /// need to feed the server malformed or tampered frames.
    pub async fn send_raw_body(&mut self, body: Vec<u8>) -> TestResult<()> {
        self.framed.send(Bytes::from(body)).await?;
        Ok(())
    }

    /// Queue several messages and flush them in one write, so the server
    /// sees multiple frames arrive in a single read event.
    pub async fn send_coalesced(&mut self, values: &[Value]) -> TestResult<()> {
        for value in values {
            let json = serde_json::to_vec(value)?;
            let mut body = Vec::new();
            match &self.cipher {
                Some(cipher) => {
                    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
                    let mut buf = json;
                    let tag = cipher
                        .encrypt_in_place_detached(&nonce, b"", &mut buf)
                        .map_err(|_| "seal failed")?;
                    let mut sealed = Vec::with_capacity(TAG_LEN + buf.len());
                    sealed.extend_from_slice(&tag);
                    sealed.extend_from_slice(&buf);
                    put_blob(&mut body, &nonce);
                    put_blob(&mut body, &sealed);
                }
                None => put_blob(&mut body, &json),
            }
            self.framed.feed(Bytes::from(body)).await?;
        }
        self.framed.flush().await?;
        Ok(())
    }

    /// Send a sealed frame whose last ciphertext byte is flipped.
    pub async fn send_tampered(&mut self, value: &Value) -> TestResult<()> {
        let cipher = self.cipher.as_ref().ok_or("handshake not done")?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut buf = serde_json::to_vec(value)?;
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buf)
            .map_err(|_| "seal failed")?;
        let mut sealed = Vec::with_capacity(TAG_LEN + buf.len());
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&buf);
        *sealed.last_mut().ok_or("empty payload")? ^= 0x01;

        let mut body = Vec::new();
        put_blob(&mut body, &nonce);
        put_blob(&mut body, &sealed);
        self.send_raw_body(body).await
    }

    /// Receive one message, opening it when the session is sealed.
    pub async fn recv(&mut self) -> TestResult<Value> {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .map_err(|_| "timed out waiting for a server message")?
            .ok_or("connection closed by server")??;

        let json = match &self.cipher {
            Some(cipher) => {
                let (nonce, rest) = take_blob(&frame)?;
                let nonce: [u8; NONCE_LEN] =
                    nonce.try_into().map_err(|_| "bad nonce length")?;
                let (sealed, _) = take_blob(rest)?;
                let (tag, ciphertext) = sealed.split_at(TAG_LEN);
                let mut buf = ciphertext.to_vec();
                cipher
                    .decrypt_in_place_detached(
                        XNonce::from_slice(&nonce),
                        b"",
                        &mut buf,
                        Tag::from_slice(tag),
                    )
                    .map_err(|_| "failed to open server frame")?;
                buf
            }
            None => take_blob(&frame)?.0.to_vec(),
        };
        Ok(serde_json::from_slice(&json)?)
    }

    /// Receive messages until one with the wanted `type` arrives, skipping
    /// interleaved pushes (`user_list` broadcasts and the like).
    pub async fn recv_type(&mut self, wanted: &str) -> TestResult<Value> {
        loop {
            let msg = self.recv().await?;
            if msg["type"] == wanted {
                return Ok(msg);
            }
        }
    }

    /// True when the server has closed the connection (used to observe
    /// protocol-error aborts).
    pub async fn closed_by_server(&mut self) -> bool {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
                Ok(None) => return true,
                Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn take_blob(input: &[u8]) -> TestResult<(&[u8], &[u8])> {
    if input.len() < 4 {
        return Err("truncated blob".into());
    }
    let (len_bytes, rest) = input.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
    if rest.len() < len {
        return Err("truncated blob".into());
    }
    Ok(rest.split_at(len))
}
