// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Blocks and the sealed slot frame they occupy at rest.

use crate::crypto::{DecryptError, SealError, Sealer};
use crate::{BlockId, DUMMY_BLOCK_ID};
use rand::{CryptoRng, RngCore};
use subtle::{Choice, ConstantTimeEq};

/// Bytes of sealed-slot plaintext spent on the block ID.
pub(crate) const ID_BYTES: usize = 8;

/// A fixed-size payload addressed by a [`BlockId`].
///
/// Dummies carry [`DUMMY_BLOCK_ID`] and a random payload; they exist only to
/// pad buckets to constant physical size.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub(crate) id: BlockId,
    pub(crate) data: Vec<u8>,
}

impl Block {
    /// A real block; `data` must already be exactly the engine block size.
    pub(crate) fn new(id: BlockId, data: Vec<u8>) -> Self {
        debug_assert!(id >= 0);
        Self { id, data }
    }

    /// A dummy block with a fresh random payload.
    pub(crate) fn dummy<R: RngCore + CryptoRng>(block_size: usize, rng: &mut R) -> Self {
        let mut data = vec![0u8; block_size];
        rng.fill_bytes(&mut data);
        Self {
            id: DUMMY_BLOCK_ID,
            data,
        }
    }

    pub(crate) fn ct_is_dummy(&self) -> Choice {
        self.id.ct_eq(&DUMMY_BLOCK_ID)
    }

    pub(crate) fn is_dummy(&self) -> bool {
        self.ct_is_dummy().into()
    }

    /// Seals `id (8B big-endian) ‖ data` into one slot ciphertext.
    pub(crate) fn seal<R: RngCore + CryptoRng>(
        &self,
        sealer: &Sealer,
        rng: &mut R,
    ) -> Result<Vec<u8>, SealError> {
        let mut plaintext = Vec::with_capacity(ID_BYTES + self.data.len());
        plaintext.extend_from_slice(&self.id.to_be_bytes());
        plaintext.extend_from_slice(&self.data);
        sealer.seal(rng, &plaintext)
    }

    /// Opens one slot ciphertext. The plaintext must frame exactly a
    /// `block_size` payload; anything else counts as corruption.
    pub(crate) fn open(
        sealer: &Sealer,
        sealed: &[u8],
        block_size: usize,
    ) -> Result<Self, DecryptError> {
        let plaintext = sealer.open(sealed)?;
        if plaintext.len() != ID_BYTES + block_size {
            return Err(DecryptError);
        }
        let id_bytes: [u8; ID_BYTES] = plaintext[..ID_BYTES]
            .try_into()
            .map_err(|_| DecryptError)?;
        Ok(Self {
            id: BlockId::from_be_bytes(id_bytes),
            data: plaintext[ID_BYTES..].to_vec(),
        })
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dummy() {
            write!(f, "Block::Dummy")
        } else {
            // Payloads are secrets; show only the length.
            f.debug_struct("Block")
                .field("id", &self.id)
                .field("len", &self.data.len())
                .finish()
        }
    }
}
