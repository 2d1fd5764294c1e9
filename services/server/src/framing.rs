//! Inner body layout of stream-transport frames.
//!
//! The outer wire format is a 4-byte big-endian length prefix handled by
//! `LengthDelimitedCodec`; what this module encodes and decodes is the frame
//! body, built from length-delimited blobs (`u32-be length || bytes`) in the
//! serialization the clients use:
//!
//! - cleartext body (before the handshake): one blob holding the UTF-8 JSON;
//! - encrypted body: a blob holding the 24-byte nonce, then a blob holding
//!   `16-byte tag || ciphertext`.
//!
//! A nonce of the wrong size or an encrypted blob shorter than the tag is
//! fatal for the connection.

use crate::crypto::{NONCE_LEN, TAG_LEN};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame body truncated")]
    Truncated,
    #[error("nonce is {0} bytes, expected {NONCE_LEN}")]
    BadNonceLen(usize),
    #[error("encrypted blob is {0} bytes, shorter than the {TAG_LEN}-byte tag")]
    ShortCiphertext(usize),
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&u32::try_from(bytes.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Split one length-delimited blob off the front of `input`.
fn take_blob(input: &[u8]) -> Result<(&[u8], &[u8]), FrameError> {
    if input.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let (len_bytes, rest) = input.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
    if rest.len() < len {
        return Err(FrameError::Truncated);
    }
    Ok(rest.split_at(len))
}

/// Body of a cleartext frame: one blob of JSON bytes.
pub fn encode_clear(json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + json.len());
    put_blob(&mut out, json);
    out
}

/// Body of an encrypted frame: nonce blob, then `tag || ciphertext` blob.
pub fn encode_sealed(nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + NONCE_LEN + sealed.len());
    put_blob(&mut out, nonce);
    put_blob(&mut out, sealed);
    out
}

/// Extract the JSON bytes from a cleartext frame body.
pub fn decode_clear(body: &[u8]) -> Result<&[u8], FrameError> {
    let (json, _) = take_blob(body)?;
    Ok(json)
}

/// Extract the nonce and `tag || ciphertext` from an encrypted frame body.
pub fn decode_sealed(body: &[u8]) -> Result<([u8; NONCE_LEN], &[u8]), FrameError> {
    let (nonce, rest) = take_blob(body)?;
    if nonce.len() != NONCE_LEN {
        return Err(FrameError::BadNonceLen(nonce.len()));
    }
    let (sealed, _) = take_blob(rest)?;
    if sealed.len() < TAG_LEN {
        return Err(FrameError::ShortCiphertext(sealed.len()));
    }
    let nonce: [u8; NONCE_LEN] = nonce.try_into().expect("length checked");
    Ok((nonce, sealed))
}
