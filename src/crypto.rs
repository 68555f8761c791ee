//! Authenticated encryption for values at rest (session tokens, TOTP secrets).
//!
//! Output layout is `nonce (12 bytes) || ciphertext`. Callers bind every value to its
//! owner through the associated data so ciphertexts cannot be swapped between rows.

use anyhow::{anyhow, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under `key`, authenticating `aad`.
///
/// # Errors
/// Returns an error if the key has the wrong length or encryption fails.
#[allow(deprecated)]
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(anyhow!("Invalid key length: {}", key.len()));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a value produced by [`seal`].
///
/// # Errors
/// Returns an error if the data is truncated, tampered with, or the AAD does not match.
#[allow(deprecated)]
pub fn open(key: &[u8], data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(anyhow!("Invalid key length: {}", key.len()));
    }
    if data.len() < NONCE_LEN {
        return Err(anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| anyhow!("Decryption failure: {e}"))
}
