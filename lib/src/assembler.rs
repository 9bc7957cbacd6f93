//! The chain assembler.
//!
//! Reassembles block batches, arriving in arbitrary disk order from
//! parallel readers, into main-chain order: a `prev_hash`-indexed pending
//! map drained towards a scalar tip, releasing a block as soon as its
//! predecessor has been applied. There is no reorg-depth confirmation
//! before release; this assembler targets one fixed requested height
//! against a finalized, on-disk store, not a live validating node with an
//! unresolved tip.

use std::collections::HashMap;

use bitcoin::BlockHash;
use log::warn;

use crate::block_source::FsBlock;

/// Reassembles per-file block batches into main-chain order.
pub struct ChainAssembler {
    pending: HashMap<BlockHash, FsBlock>,
    tip: BlockHash,
}

impl ChainAssembler {
    /// Creates an assembler starting from `tip` (the genesis predecessor,
    /// all-zeros, unless resuming from a snapshot at a known block hash).
    pub fn new(tip: BlockHash) -> Self {
        ChainAssembler {
            pending: HashMap::new(),
            tip,
        }
    }

    /// Queues every block of a just-read file batch by its `prev_hash`.
    /// If two blocks share a `prev_hash` (a fork/orphan within one bucket),
    /// the later one wins and the earlier is dropped, logged at `warn!`.
    pub fn push_batch(&mut self, batch: Vec<FsBlock>) {
        for block in batch {
            let prev_hash = block.prev;
            let new_hash = block.hash;
            if let Some(old) = self.pending.insert(prev_hash, block) {
                warn!(
                    "competing blocks on prev_hash {}: discarding {}, keeping {} (last-writer-wins)",
                    prev_hash, old.hash, new_hash
                );
            }
        }
    }

    /// Drains every block now reachable from the current tip, advancing it
    /// as each is emitted. Returns them in main-chain order.
    pub fn drain_ready(&mut self) -> Vec<FsBlock> {
        let mut ready = Vec::new();
        while let Some(block) = self.pending.remove(&self.tip) {
            self.tip = block.hash;
            ready.push(block);
        }
        ready
    }

    pub fn tip(&self) -> BlockHash {
        self.tip
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The smallest `file_idx` among blocks still waiting on their
    /// predecessor, or `None` if nothing is pending. A block can be read
    /// from file `k` and sit here because its predecessor lives in a
    /// later file; callers use this to find how far it's actually safe to
    /// treat a run as caught up, since the file it was read from is not
    /// safe to skip on a later resume until it drains.
    pub fn min_pending_file_idx(&self) -> Option<u32> {
        self.pending.values().map(|b| b.file_idx).min()
    }

    /// Consumes the assembler, returning whatever never found its
    /// predecessor. The orchestrator logs these as dropped at end-of-run.
    pub fn into_dangling(self) -> Vec<FsBlock> {
        self.pending.into_values().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block_source::FsBlock;
    use bitcoin::hashes::Hash;
    use std::fs::File;
    use std::sync::{Arc, Mutex};

    fn fake_block(hash: [u8; 32], prev: [u8; 32]) -> FsBlock {
        fake_block_in_file(hash, prev, 0)
    }

    fn fake_block_in_file(hash: [u8; 32], prev: [u8; 32], file_idx: u32) -> FsBlock {
        // a throwaway handle to a real (empty) temp file; `parse()` is
        // never exercised by these tests, only the hash/prev linkage is.
        let file = Arc::new(Mutex::new(tempfile::tempfile().unwrap()));
        FsBlock {
            file,
            file_idx,
            start: 0,
            end: 0,
            hash: BlockHash::from_slice(&hash).unwrap(),
            prev: BlockHash::from_slice(&prev).unwrap(),
        }
    }

    #[test]
    fn test_linear_order() {
        let genesis = BlockHash::all_zeros();
        let mut assembler = ChainAssembler::new(genesis);

        let h1 = [1u8; 32];
        let h2 = [2u8; 32];
        let h3 = [3u8; 32];

        // out-of-order delivery: block 2 arrives before block 1
        assembler.push_batch(vec![fake_block(h2, h1)]);
        assert!(assembler.drain_ready().is_empty());
        assembler.push_batch(vec![fake_block(h1, [0u8; 32])]);
        let ready = assembler.drain_ready();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].hash, BlockHash::from_slice(&h1).unwrap());
        assert_eq!(ready[1].hash, BlockHash::from_slice(&h2).unwrap());
        assert_eq!(assembler.tip(), BlockHash::from_slice(&h2).unwrap());

        assembler.push_batch(vec![fake_block(h3, h2)]);
        let ready = assembler.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].hash, BlockHash::from_slice(&h3).unwrap());
    }

    #[test]
    fn test_fork_last_writer_wins() {
        let genesis = BlockHash::all_zeros();
        let mut assembler = ChainAssembler::new(genesis);
        let a = [1u8; 32];
        let b = [2u8; 32];
        assembler.push_batch(vec![fake_block(a, [0u8; 32])]);
        assembler.push_batch(vec![fake_block(b, [0u8; 32])]);
        assert_eq!(assembler.pending_len(), 1);
        let ready = assembler.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].hash, BlockHash::from_slice(&b).unwrap());
    }

    #[test]
    fn test_dangling_at_end_of_run() {
        let genesis = BlockHash::all_zeros();
        let mut assembler = ChainAssembler::new(genesis);
        let orphan = [9u8; 32];
        let missing_parent = [8u8; 32];
        assembler.push_batch(vec![fake_block(orphan, missing_parent)]);
        assert!(assembler.drain_ready().is_empty());
        let dangling = assembler.into_dangling();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].hash, BlockHash::from_slice(&orphan).unwrap());
    }

    #[test]
    fn test_min_pending_file_idx_tracks_earliest_unapplied_file() {
        let genesis = BlockHash::all_zeros();
        let mut assembler = ChainAssembler::new(genesis);
        assert_eq!(assembler.min_pending_file_idx(), None);

        // a block read from file 5 whose predecessor lives in a file not
        // yet read sits in pending, even though files 0..=4 might already
        // be fully read and applied.
        assembler.push_batch(vec![fake_block_in_file([2u8; 32], [9u8; 32], 5)]);
        assert_eq!(assembler.min_pending_file_idx(), Some(5));

        assembler.push_batch(vec![fake_block_in_file([3u8; 32], [8u8; 32], 2)]);
        assert_eq!(assembler.min_pending_file_idx(), Some(2));

        // once its predecessor arrives and it drains, it no longer holds
        // back the watermark.
        assembler.push_batch(vec![fake_block_in_file([8u8; 32], [0u8; 32], 1)]);
        let _ = assembler.drain_ready();
        assert_eq!(assembler.min_pending_file_idx(), Some(5));
    }
}
