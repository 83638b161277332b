// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Byte-level helpers shared by the engine and the pools.

use subtle::{Choice, ConditionallySelectable};

/// Byte-wise `dst = src` when `choice` is set; both slices must have the
/// same length.
pub(crate) fn ct_assign_bytes(dst: &mut [u8], src: &[u8], choice: Choice) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = u8::conditional_select(d, s, choice);
    }
}

/// Right-pads `data` with zero bytes to `len`, truncating longer input.
pub(crate) fn zero_pad(data: &[u8], len: usize) -> Vec<u8> {
    let mut padded = vec![0u8; len];
    let take = data.len().min(len);
    padded[..take].copy_from_slice(&data[..take]);
    padded
}

/// Strips the zero right-padding applied on store. Genuine trailing zero
/// bytes are lost too; see `OramPool::retrieve`.
pub(crate) fn strip_trailing_zeros(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}
