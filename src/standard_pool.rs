// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The authenticated-encryption-only pool: O(1) lookups, no pattern hiding.

use crate::crypto::{DecryptError, SealError, Sealer, SealingKey};
use crate::{PoolKind, RetrieveStats, StoreStats};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use std::collections::HashMap;

/// The latency class advertised in this pool's accounting.
const OVERHEAD: &str = "O(1)";

/// Sealed storage for entries that do not need pattern hiding.
///
/// Each value is sealed individually; which entry a lookup touches is
/// observable. That is the intended trade-off for constant-time access.
pub struct StandardPool {
    sealer: Sealer,
    entries: HashMap<String, Vec<u8>>,
    access_count: u64,
}

/// Standard pool metrics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct StandardPoolMetrics {
    /// Always `"standard"`.
    pub pool_type: &'static str,
    /// Entries currently stored.
    pub entries: usize,
    /// Stores and retrieves served, misses included.
    pub access_count: u64,
    /// The latency class, `"O(1)"`.
    pub overhead: &'static str,
}

impl StandardPool {
    /// An empty pool sealing under `key`.
    pub fn new(key: &SealingKey) -> Self {
        Self {
            sealer: Sealer::new(key),
            entries: HashMap::new(),
            access_count: 0,
        }
    }

    /// Seals `value` and stores it under `key`, replacing any previous
    /// entry.
    pub fn store<R: RngCore + CryptoRng>(
        &mut self,
        key: &str,
        value: &[u8],
        rng: &mut R,
    ) -> Result<StoreStats, SealError> {
        self.access_count += 1;
        let sealed = self.sealer.seal(rng, value)?;
        self.entries.insert(key.to_owned(), sealed);
        Ok(StoreStats {
            pool: PoolKind::Standard,
            access_count: self.access_count,
            path_length: None,
            overhead: Some(OVERHEAD),
        })
    }

    /// Unseals and returns the entry under `key`, if any.
    ///
    /// A failed unseal spoils that entry only: the error is reported to the
    /// caller and the rest of the blackboard keeps serving.
    pub fn retrieve(
        &mut self,
        key: &str,
    ) -> Result<(Option<Vec<u8>>, RetrieveStats), DecryptError> {
        self.access_count += 1;
        let Some(sealed) = self.entries.get(key) else {
            return Ok((
                None,
                RetrieveStats {
                    pool: PoolKind::Standard,
                    found: false,
                    access_count: None,
                },
            ));
        };
        let value = self.sealer.open(sealed)?;
        Ok((
            Some(value),
            RetrieveStats {
                pool: PoolKind::Standard,
                found: true,
                access_count: Some(self.access_count),
            },
        ))
    }

    /// Removes `key`; `true` iff it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Flips a byte of the sealed entry under `key`, if present.
    #[cfg(test)]
    pub(crate) fn corrupt(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key).and_then(|sealed| sealed.last_mut()) {
            Some(byte) => {
                *byte ^= 0xFF;
                true
            }
            None => false,
        }
    }

    /// Pool metrics.
    pub fn metrics(&self) -> StandardPoolMetrics {
        StandardPoolMetrics {
            pool_type: "standard",
            entries: self.entries.len(),
            access_count: self.access_count,
            overhead: OVERHEAD,
        }
    }
}
