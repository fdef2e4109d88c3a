/*!
Authenticated encryption adapters.

An [`Encryptor`] seals the save body with a per-save nonce and binds the
plaintext header through associated data. Keys never live in the save file;
they are resolved by algorithm name through a [`KeyProvider`].
*/

use crate::{KeepsakeError, Result};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

/// Nonce length used for every save (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// AES-256 key length.
pub const KEY_LEN: usize = 32;

/// AEAD abstraction.
///
/// `decrypt` must return [`KeepsakeError::AuthenticationFailed`] when the tag
/// does not verify, and [`KeepsakeError::CryptoUnsupported`] when the cipher
/// cannot run at all (bad key material, unsupported parameters).
pub trait Encryptor: Send + Sync {
    /// Algorithm name recorded in the save header (e.g. "aes-gcm")
    fn name(&self) -> &str;

    /// Encrypt, returning `(ciphertext, tag)`
    fn encrypt(&self, plaintext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Verify the tag and decrypt
    fn decrypt(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8], tag: &[u8]) -> Result<Vec<u8>>;
}

/// Resolves symmetric keys by algorithm name
pub trait KeyProvider: Send + Sync {
    fn key_for(&self, algorithm: &str) -> Result<Vec<u8>>;
}

/// Fresh random nonce from the OS generator
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AES-256-GCM encryptor
#[derive(Clone)]
pub struct AesGcmEncryptor {
    keys: Arc<dyn KeyProvider>,
}

impl AesGcmEncryptor {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.keys.key_for(self.name())?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| {
            KeepsakeError::CryptoUnsupported(format!(
                "AES-256-GCM requires a {KEY_LEN}-byte key, got {} bytes",
                key.len()
            ))
        })
    }
}

impl std::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptor").finish_non_exhaustive()
    }
}

fn check_nonce(nonce: &[u8]) -> Result<()> {
    if nonce.len() != NONCE_LEN {
        return Err(KeepsakeError::CryptoUnsupported(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    Ok(())
}

impl Encryptor for AesGcmEncryptor {
    fn name(&self) -> &str {
        "aes-gcm"
    }

    fn encrypt(&self, plaintext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        check_nonce(nonce)?;
        let cipher = self.cipher()?;
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
            .map_err(|_| KeepsakeError::encryption("AES-GCM encryption failed"))?;
        Ok((buffer, tag.to_vec()))
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        check_nonce(nonce)?;
        if tag.len() != TAG_LEN {
            return Err(KeepsakeError::AuthenticationFailed);
        }
        let cipher = self.cipher()?;
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                aad,
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| KeepsakeError::AuthenticationFailed)?;
        Ok(buffer)
    }
}

/// Single fixed key served for every algorithm, for tests and simple setups
#[derive(Clone)]
pub struct InMemoryKeyProvider {
    key: Vec<u8>,
}

impl InMemoryKeyProvider {
    /// Requires a 32-byte key (AES-256).
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(KeepsakeError::validation(format!(
                "AES-256-GCM requires a {KEY_LEN}-byte key"
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Random key, useful for tests
    pub fn random() -> Self {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl KeyProvider for InMemoryKeyProvider {
    fn key_for(&self, _algorithm: &str) -> Result<Vec<u8>> {
        Ok(self.key.clone())
    }
}

/// Keys registered per algorithm name
#[derive(Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, Vec<u8>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key<S: Into<String>>(mut self, algorithm: S, key: &[u8]) -> Self {
        self.keys.insert(algorithm.into(), key.to_vec());
        self
    }
}

impl KeyProvider for KeyRegistry {
    fn key_for(&self, algorithm: &str) -> Result<Vec<u8>> {
        self.keys.get(algorithm).cloned().ok_or_else(|| {
            KeepsakeError::MissingTransform(format!("no key registered for '{algorithm}'"))
        })
    }
}
