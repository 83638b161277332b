// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An attested confidential blackboard: an in-memory key/value store for
//! trusted execution environments, serving sensitive keys through a Path ORAM
//! pool that hides which entry each physical access touches, and the rest
//! through an authenticated-encryption-only pool with O(1) lookups.

#![warn(clippy::doc_markdown, missing_docs, rustdoc::all)]

pub mod attest;
pub mod crypto;
pub mod oram_pool;
pub mod path_oram;
pub mod protocol;
pub mod router;
pub mod server;
pub mod standard_pool;

mod bucket;
mod stash;
mod tree;
mod utils;

pub use oram_pool::OramPool;
pub use path_oram::PathOram;
pub use router::Router;
pub use standard_pool::StandardPool;

use serde::Serialize;
use thiserror::Error;

/// The numeric type used to address blocks in the ORAM engine.
///
/// Real blocks carry nonnegative IDs; [`DUMMY_BLOCK_ID`] marks padding.
pub type BlockId = i64;

/// The block ID carried by dummy blocks.
pub const DUMMY_BLOCK_ID: BlockId = -1;

/// A leaf number in `[0, 2^height)`.
pub type Leaf = u64;

/// The numeric type used for tree heights and depths.
pub type TreeHeight = u32;

/// The parameter `Z` from the Path ORAM literature that sets the number of
/// blocks per bucket; typical values are 3 or 4.
/// Here we adopt the more conservative setting of 4.
pub const DEFAULT_BUCKET_CAPACITY: usize = 4;

/// Default ceiling on the stash size in blocks. Crossing it is treated as an
/// invariant violation: for well-chosen tree parameters the stash stays far
/// below this bound with overwhelming probability.
pub const DEFAULT_STASH_LIMIT: usize = 128;

/// Errors arising from the oblivious engine and the pool built on it.
///
/// [`OramError::Decrypt`] and [`OramError::StashOverflow`] mean the trust
/// boundary itself has failed; callers must treat them as fatal and discard
/// all state. The remaining variants are construction-time mistakes.
/// Standard-pool failures are deliberately not represented here — a spoiled
/// sealed entry there costs one request, not the process.
#[derive(Debug, Error)]
pub enum OramError {
    /// A sealed bucket slot failed authenticated decryption.
    #[error("sealed data failed authentication: {0}")]
    Decrypt(#[from] crypto::DecryptError),

    /// A plaintext exceeded the AEAD message limits while sealing a slot.
    #[error("sealing failed: {0}")]
    Seal(#[from] crypto::SealError),

    /// The stash grew past its configured ceiling.
    #[error("stash holds {size} blocks, over the ceiling of {limit}")]
    StashOverflow {
        /// Observed stash size after eviction.
        size: usize,
        /// The configured ceiling.
        limit: usize,
    },

    /// The requested engine geometry is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Which pool served an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// The Path-ORAM-protected pool.
    Oram,
    /// The authenticated-encryption-only pool.
    Standard,
}

/// Accounting both pools report from a store.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
    /// The pool that absorbed the write.
    pub pool: PoolKind,
    /// The pool's total accesses so far, this one included.
    pub access_count: u64,
    /// ORAM pool only: buckets touched per oblivious access, `H + 1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_length: Option<u64>,
    /// Standard pool only: its latency class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overhead: Option<&'static str>,
}

/// Accounting both pools report from a retrieve.
#[derive(Clone, Debug, Serialize)]
pub struct RetrieveStats {
    /// The pool that was consulted.
    pub pool: PoolKind,
    /// Whether the key had ever been stored.
    pub found: bool,
    /// The pool's total accesses so far; omitted on a miss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_count: Option<u64>,
}
