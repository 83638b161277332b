// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The string-keyed facade over the Path ORAM engine.

use crate::crypto::SealingKey;
use crate::path_oram::{OramMetrics, PathOram};
use crate::utils::strip_trailing_zeros;
use crate::{
    BlockId, OramError, PoolKind, RetrieveStats, StoreStats, DEFAULT_BUCKET_CAPACITY,
};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use std::collections::HashMap;

/// ORAM-protected storage for sensitive entries.
///
/// Keys are mapped to densely assigned block IDs that stay stable for the
/// pool's lifetime; every store and every retrieve of a known key costs one
/// oblivious path access. Entries cannot be deleted.
pub struct OramPool {
    oram: PathOram,
    key_to_id: HashMap<String, BlockId>,
    next_id: BlockId,
}

/// ORAM pool metrics: entry count plus the engine's own counters.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct OramPoolMetrics {
    /// Always `"oram"`.
    pub pool_type: &'static str,
    /// Distinct keys ever stored.
    pub entries: usize,
    /// Engine counters and geometry.
    #[serde(flatten)]
    pub engine: OramMetrics,
}

impl OramPool {
    /// A pool over a fresh engine of `capacity` blocks of `block_size`
    /// bytes, sealed under `key`.
    pub fn new<R: RngCore + CryptoRng>(
        capacity: usize,
        block_size: usize,
        key: &SealingKey,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Ok(Self {
            oram: PathOram::new(capacity, block_size, DEFAULT_BUCKET_CAPACITY, key, rng)?,
            key_to_id: HashMap::new(),
            next_id: 0,
        })
    }

    fn block_id(&mut self, key: &str) -> BlockId {
        match self.key_to_id.get(key) {
            Some(&id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.key_to_id.insert(key.to_owned(), id);
                id
            }
        }
    }

    /// Stores `value` under `key`, zero-padding or truncating it to the
    /// engine block size.
    pub fn store<R: RngCore + CryptoRng>(
        &mut self,
        key: &str,
        value: &[u8],
        rng: &mut R,
    ) -> Result<StoreStats, OramError> {
        let id = self.block_id(key);
        self.oram.write(id, value, rng)?;
        Ok(StoreStats {
            pool: PoolKind::Oram,
            access_count: self.oram.access_count(),
            path_length: Some(self.oram.path_length()),
            overhead: None,
        })
    }

    /// Retrieves `key`, stripping the zero padding applied on store.
    ///
    /// A key that was never stored answers immediately, with no tree
    /// access, so the host can observe absence; callers that need
    /// membership hiding must populate keys before any sensitive phase.
    /// Values whose genuine bytes end in `0x00` lose those bytes.
    pub fn retrieve<R: RngCore + CryptoRng>(
        &mut self,
        key: &str,
        rng: &mut R,
    ) -> Result<(Option<Vec<u8>>, RetrieveStats), OramError> {
        let Some(&id) = self.key_to_id.get(key) else {
            return Ok((
                None,
                RetrieveStats {
                    pool: PoolKind::Oram,
                    found: false,
                    access_count: None,
                },
            ));
        };
        let data = self
            .oram
            .read(id, rng)?
            .map(|data| strip_trailing_zeros(&data).to_vec());
        Ok((
            data,
            RetrieveStats {
                pool: PoolKind::Oram,
                found: true,
                access_count: Some(self.oram.access_count()),
            },
        ))
    }

    /// Pool metrics.
    pub fn metrics(&self) -> OramPoolMetrics {
        OramPoolMetrics {
            pool_type: "oram",
            entries: self.key_to_id.len(),
            engine: self.oram.metrics(),
        }
    }
}
