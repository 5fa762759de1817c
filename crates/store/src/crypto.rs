//! AES-256-GCM sealing for payloads kept encrypted at rest.
//!
//! Wire format: nonce (12 bytes) || ciphertext || tag (16 bytes).
//! The sealed bytes are what the store chunks and addresses, so the
//! identifier and digest of an encrypted add describe the ciphertext.

use crate::error::{Result, StoreError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Label recorded next to registrations of sealed payloads.
pub const ENCRYPTION_ALGORITHM: &str = "AES-256-GCM";

/// Nonce length for AES-GCM (96 bits)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// Key length (256 bits)
pub const KEY_LEN: usize = 32;

// =============================================================================
// Key
// =============================================================================

/// A 256-bit content encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

// =============================================================================
// Seal / open
// =============================================================================

/// Encrypt `plaintext` under a random nonce.
pub fn seal(key: &ContentKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| StoreError::Crypto(format!("encryption failed: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt bytes produced by [`seal`]. Fails on a wrong key or any tampering.
pub fn open(key: &ContentKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(StoreError::Crypto(format!(
            "sealed payload too short ({} bytes)",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::Crypto("decryption failed: wrong key or corrupted payload".into()))
}
