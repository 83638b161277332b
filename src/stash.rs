// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side stash: real blocks held in trusted memory between path
//! reads and write-backs.

use crate::bucket::Block;
use crate::utils::ct_assign_bytes;
use crate::BlockId;
use subtle::{Choice, ConstantTimeEq};

/// An insertion-ordered stash of real blocks.
///
/// Order matters: eviction picks qualifying blocks in insertion order, which
/// keeps the tie-break deterministic when more blocks qualify for a bucket
/// than it can hold.
#[derive(Debug, Default)]
pub(crate) struct Stash {
    blocks: Vec<Block>,
    peak: usize,
}

impl Stash {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Largest size recorded by [`Stash::note_peak`].
    pub(crate) fn peak(&self) -> usize {
        self.peak
    }

    /// Records the post-eviction size for the `stash_peak` metric.
    pub(crate) fn note_peak(&mut self) {
        self.peak = self.peak.max(self.blocks.len());
    }

    pub(crate) fn push(&mut self, block: Block) {
        debug_assert!(!block.is_dummy());
        self.blocks.push(block);
    }

    /// Scans every stashed block for `id`, touching each entry identically.
    ///
    /// With `new_data` absent this is a read: the matching payload is copied
    /// out, `None` if no block matched. With `new_data` present the matching
    /// payload is replaced, or a new block appended when nothing matched,
    /// and the result is always `None`.
    pub(crate) fn resolve(
        &mut self,
        id: BlockId,
        new_data: Option<&[u8]>,
        block_size: usize,
    ) -> Option<Vec<u8>> {
        let mut found = Choice::from(0u8);
        let mut result = vec![0u8; block_size];
        for block in &mut self.blocks {
            let hit = block.id.ct_eq(&id);
            ct_assign_bytes(&mut result, &block.data, hit);
            if let Some(data) = new_data {
                ct_assign_bytes(&mut block.data, data, hit);
            }
            found |= hit;
        }
        match new_data {
            Some(data) => {
                if !bool::from(found) {
                    self.blocks.push(Block::new(id, data.to_vec()));
                }
                None
            }
            None => bool::from(found).then_some(result),
        }
    }

    /// Removes up to `capacity` blocks accepted by `place`, in insertion
    /// order; the remainder keeps its order.
    pub(crate) fn take_for_bucket<F: FnMut(BlockId) -> bool>(
        &mut self,
        capacity: usize,
        mut place: F,
    ) -> Vec<Block> {
        let mut chosen = Vec::with_capacity(capacity);
        let mut kept = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            if chosen.len() < capacity && place(block.id) {
                chosen.push(block);
            } else {
                kept.push(block);
            }
        }
        self.blocks = kept;
        chosen
    }

    #[cfg(test)]
    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: BlockId, fill: u8) -> Block {
        Block::new(id, vec![fill; 8])
    }

    #[test]
    fn resolve_reads_the_matching_block() {
        let mut stash = Stash::new();
        stash.push(block(1, 0x11));
        stash.push(block(2, 0x22));
        assert_eq!(stash.resolve(2, None, 8), Some(vec![0x22; 8]));
        assert_eq!(stash.resolve(9, None, 8), None);
        assert_eq!(stash.len(), 2);
    }

    #[test]
    fn resolve_overwrites_in_place() {
        let mut stash = Stash::new();
        stash.push(block(1, 0x11));
        assert_eq!(stash.resolve(1, Some(&[0x33; 8]), 8), None);
        assert_eq!(stash.len(), 1);
        assert_eq!(stash.resolve(1, None, 8), Some(vec![0x33; 8]));
    }

    #[test]
    fn resolve_appends_on_write_miss() {
        let mut stash = Stash::new();
        stash.push(block(1, 0x11));
        stash.resolve(5, Some(&[0x55; 8]), 8);
        assert_eq!(stash.len(), 2);
        assert_eq!(stash.blocks()[1].id, 5);
    }

    #[test]
    fn take_for_bucket_respects_capacity_and_order() {
        let mut stash = Stash::new();
        for id in 0..5 {
            stash.push(block(id, id as u8));
        }
        // IDs 0, 2, 3, 4 qualify but only two fit.
        let chosen = stash.take_for_bucket(2, |id| id != 1);
        assert_eq!(chosen.iter().map(|b| b.id).collect::<Vec<_>>(), vec![0, 2]);
        // The remainder keeps insertion order.
        assert_eq!(
            stash.blocks().iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let mut stash = Stash::new();
        stash.push(block(1, 1));
        stash.push(block(2, 2));
        stash.note_peak();
        stash.take_for_bucket(2, |_| true);
        stash.note_peak();
        assert_eq!(stash.len(), 0);
        assert_eq!(stash.peak(), 2);
    }
}
