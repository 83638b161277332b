// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Authenticated encryption of values and bucket slots.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::{CryptoRng, RngCore};
use static_assertions::const_assert_eq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size in bytes of the process-wide sealing key.
pub const KEY_SIZE: usize = 32;
/// Size in bytes of an AES-GCM nonce.
pub const NONCE_SIZE: usize = 12;
/// Size in bytes of an AES-GCM authentication tag.
pub const TAG_SIZE: usize = 16;
/// Fixed ciphertext expansion of every sealed value.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

const_assert_eq!(SEAL_OVERHEAD, 28);

/// The 32-byte symmetric key driving both pools.
///
/// Zeroized on drop; `Debug` never reveals the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey([u8; KEY_SIZE]);

impl SealingKey {
    /// Builds a key from exactly [`KEY_SIZE`] bytes of released key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyLengthError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| KeyLengthError { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    /// Draws a fresh random key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SealingKey").field(&"[redacted]").finish()
    }
}

/// The released key material was not [`KEY_SIZE`] bytes long.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("sealing key must be {KEY_SIZE} bytes, got {len}")]
pub struct KeyLengthError {
    /// Length of the rejected material.
    pub len: usize,
}

/// Authenticated decryption failed: tag mismatch, truncation, or corruption.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("authenticated decryption failed")]
pub struct DecryptError;

/// A plaintext exceeded the AEAD message limits.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("plaintext exceeds AEAD message limits")]
pub struct SealError;

/// Seals and opens byte strings under the process-wide key.
///
/// Every sealed value has layout `nonce (12B) ‖ ciphertext ‖ tag (16B)`,
/// with a fresh random nonce drawn per seal. Without the key, sealed bytes
/// are indistinguishable from random.
#[derive(Clone)]
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer")
    }
}

impl Sealer {
    /// A sealer bound to `key`.
    pub fn new(key: &SealingKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    /// Encrypts and authenticates `plaintext` under a fresh random nonce.
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SealError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealError)?;
        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Recovers the plaintext of `sealed`, verifying the authentication tag.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(DecryptError);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptError)
    }
}
