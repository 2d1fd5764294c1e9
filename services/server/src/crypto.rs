//! Per-connection link crypto and credential primitives.
//!
//! Each stream connection gets a fresh X25519 keypair; the first client
//! frame carries the client public key, the reply carries ours, and the
//! shared secret keys XChaCha20-Poly1305 for every later frame.  The random
//! 24-byte nonce per frame means no counter state survives a reconnect.
//!
//! This protects the client<->server link only; it is not end-to-end
//! encryption between users.

use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use x25519_dalek::{EphemeralSecret, PublicKey};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("client public key must be 32 bytes")]
    InvalidClientKey,
    #[error("handshake already completed")]
    AlreadyEstablished,
    #[error("session key not established")]
    NotReady,
    #[error("failed to seal outbound frame")]
    SealFailed,
    #[error("frame failed authentication")]
    OpenFailed,
}

/// Crypto state of one stream connection.
///
/// Starts in "awaiting handshake"; [`CryptoSession::establish`] consumes the
/// ephemeral secret exactly once.  The WebSocket transport never constructs
/// one of these.
pub struct CryptoSession {
    secret: Option<EphemeralSecret>,
    public: PublicKey,
    cipher: Option<XChaCha20Poly1305>,
}

impl CryptoSession {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random();
        let public = PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
            cipher: None,
        }
    }

    /// True once the shared key is derived; from then on every frame on the
    /// connection must be sealed.
    pub fn is_ready(&self) -> bool {
        self.cipher.is_some()
    }

    /// The server public key, base64 for the handshake reply.
    pub fn public_key_b64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(self.public.as_bytes())
    }

    /// Derive the session key from the client's raw public key bytes.
    pub fn establish(&mut self, client_key: &[u8]) -> Result<(), CryptoError> {
        if self.is_ready() {
            return Err(CryptoError::AlreadyEstablished);
        }
        let key_bytes: [u8; 32] = client_key
            .try_into()
            .map_err(|_| CryptoError::InvalidClientKey)?;
        let secret = self.secret.take().ok_or(CryptoError::AlreadyEstablished)?;
        let shared = secret.diffie_hellman(&PublicKey::from(key_bytes));
        let key = Key::from_slice(shared.as_bytes());
        self.cipher = Some(XChaCha20Poly1305::new(key));
        Ok(())
    }

    /// Seal one outbound payload.  Returns the fresh nonce and the
    /// `tag || ciphertext` blob.
    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NotReady)?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut buf = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buf)
            .map_err(|_| CryptoError::SealFailed)?;
        let mut sealed = Vec::with_capacity(TAG_LEN + buf.len());
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&buf);
        Ok((nonce.into(), sealed))
    }

    /// Open one inbound `tag || ciphertext` blob.  Any failure is fatal for
    /// the connection.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NotReady)?;
        if sealed.len() < TAG_LEN {
            return Err(CryptoError::OpenFailed);
        }
        let (tag, ciphertext) = sealed.split_at(TAG_LEN);
        let mut buf = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(XNonce::from_slice(nonce), b"", &mut buf, Tag::from_slice(tag))
            .map_err(|_| CryptoError::OpenFailed)?;
        Ok(buf)
    }
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Password verifiers and auth tokens
// ---------------------------------------------------------------------------

/// Argon2i, ~1 MiB work area, 3 passes, 1 lane, 32-byte output.  Parameters
/// must stay fixed or stored verifiers stop matching.
fn argon2() -> argon2::Argon2<'static> {
    let params = argon2::Params::new(1000, 3, 1, Some(32)).expect("static Argon2 params are valid");
    argon2::Argon2::new(argon2::Algorithm::Argon2i, argon2::Version::V0x13, params)
}

/// Derive the hex-encoded password verifier for storage or comparison.
pub fn hash_password(password: &str, salt: &[u8]) -> String {
    let mut out = [0u8; 32];
    argon2()
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .expect("salt length is fixed at 16 bytes");
    hex::encode(out)
}

pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// A fresh auth token: sha256 over a UUID, the username and the current
/// millisecond timestamp, rendered as 64 lowercase hex chars.
pub fn generate_token(username: &str) -> String {
    let raw = format!(
        "{}{}{}",
        Uuid::new_v4(),
        username,
        Utc::now().timestamp_millis()
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}
