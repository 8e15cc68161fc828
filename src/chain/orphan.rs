//! Orphan block pool (component H).
//!
//! Grounded directly in the teacher's `core::chain_state::{OrphanBlock,
//! MAX_ORPHAN_BLOCKS, ORPHAN_BLOCK_EXPIRE_TIME}`, generalized from
//! `String`-keyed maps to `Hash`-keyed ones and from wall-clock
//! `SystemTime` bookkeeping to an explicit `received_at` timestamp the
//! caller supplies (keeps this module free of direct clock access, per the
//! ambient logging/config note in §6.1).

use crate::block::Block;
use crate::codec::Hash;
use std::collections::{HashMap, VecDeque};

pub const MAX_ORPHAN_BLOCKS: usize = 100;
pub const ORPHAN_EXPIRE_SECONDS: i64 = 3600;

struct OrphanEntry {
    block: Block,
    received_at: i64,
}

/// Blocks whose parent is unknown, held until the parent arrives or the
/// entry expires/is evicted for space. Bounded FIFO eviction, per §4.H.
#[derive(Default)]
pub struct OrphanPool {
    by_hash: HashMap<Hash, OrphanEntry>,
    by_parent: HashMap<Hash, Vec<Hash>>,
    order: VecDeque<Hash>,
}

impl OrphanPool {
    pub fn new() -> Self {
        OrphanPool::default()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn insert(&mut self, block: Block, now: i64) {
        let hash = block.block_hash();
        if self.by_hash.contains_key(&hash) {
            return;
        }
        if self.by_hash.len() >= MAX_ORPHAN_BLOCKS {
            self.evict_oldest();
        }
        self.by_parent
            .entry(block.header.previous)
            .or_default()
            .push(hash);
        self.order.push_back(hash);
        self.by_hash.insert(hash, OrphanEntry { block, received_at: now });
    }

    fn evict_oldest(&mut self) {
        while let Some(hash) = self.order.pop_front() {
            if self.remove(&hash).is_some() {
                return;
            }
        }
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
        let entry = self.by_hash.remove(hash)?;
        if let Some(siblings) = self.by_parent.get_mut(&entry.block.header.previous) {
            siblings.retain(|h| h != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&entry.block.header.previous);
            }
        }
        Some(entry.block)
    }

    /// Blocks immediately resolvable once `parent` connects, removed from
    /// the pool for the caller to attempt connecting (BFS promotion driver).
    pub fn take_children_of(&mut self, parent: Hash) -> Vec<Block> {
        let hashes = self.by_parent.remove(&parent).unwrap_or_default();
        hashes
            .into_iter()
            .filter_map(|h| {
                let entry = self.by_hash.remove(&h)?;
                Some(entry.block)
            })
            .collect()
    }

    pub fn prune_expired(&mut self, now: i64) {
        let expired: Vec<Hash> = self
            .by_hash
            .iter()
            .filter(|(_, e)| now - e.received_at > ORPHAN_EXPIRE_SECONDS)
            .map(|(h, _)| *h)
            .collect();
        for hash in expired {
            self.remove(&hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{BlockHeader, Proof};
    use crate::block::ProposalArea;

    fn block(previous: Hash, nonce: i64) -> Block {
        let header = BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height: 1,
            timestamp: 1000 + nonce,
            previous,
            transaction_root: Hash::zero(),
            witness_root: Hash::zero(),
            proposal_root: ProposalArea::default().root(),
            target: vec![0],
            challenge: Hash::zero(),
            pubkey: vec![0x02; 33],
            proof: Proof { x: vec![], x_prime: vec![], bit_length: 28 },
            signature: vec![],
            ban_list: vec![],
        };
        Block { header, proposal_area: ProposalArea::default(), transactions: vec![] }
    }

    #[test]
    fn insert_and_take_children_by_parent() {
        let mut pool = OrphanPool::new();
        let parent_hash = Hash([1u8; 32]);
        pool.insert(block(parent_hash, 1), 100);
        pool.insert(block(parent_hash, 2), 101);
        assert_eq!(pool.len(), 2);

        let resolved = pool.take_children_of(parent_hash);
        assert_eq!(resolved.len(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn bounded_eviction_drops_oldest() {
        let mut pool = OrphanPool::new();
        for i in 0..(MAX_ORPHAN_BLOCKS + 5) {
            pool.insert(block(Hash([i as u8; 32]), i as i64), i as i64);
        }
        assert_eq!(pool.len(), MAX_ORPHAN_BLOCKS);
    }

    #[test]
    fn prune_expired_removes_old_entries() {
        let mut pool = OrphanPool::new();
        pool.insert(block(Hash([9u8; 32]), 1), 0);
        pool.prune_expired(ORPHAN_EXPIRE_SECONDS + 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn contains_reports_pooled_orphans() {
        let mut pool = OrphanPool::new();
        let b = block(Hash([3u8; 32]), 1);
        let hash = b.block_hash();
        assert!(!pool.contains(&hash));
        pool.insert(b, 0);
        assert!(pool.contains(&hash));
    }
}
