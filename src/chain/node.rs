//! In-memory block-node arena (component H).
//!
//! Grounded in the teacher's `core::chain_state::ChainStateManager` index
//! maps (`block_index`, `height_index`), generalized from bare hash-keyed
//! lookup into an arena of `BlockNode`s addressed by integer index so parent
//! links are plain `usize` indices rather than owning pointers/`Rc`, per the
//! "never share ownership across the arena boundary" design note (§9).

use crate::block::Block;
use crate::codec::Hash;
use crate::header::BlockHeader;
use std::collections::HashMap;

pub type NodeIndex = usize;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub header: BlockHeader,
    pub hash: Hash,
    pub parent: Option<NodeIndex>,
    pub height: u64,
    /// Cumulative work from genesis through this node, for best-chain
    /// selection (§5).
    pub work: u128,
}

/// Owns every known header/node, reachable or not (both main-chain and
/// side-chain nodes live here; only `Blockchain` tracks which is active).
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash, NodeIndex>,
    by_height: HashMap<u64, Vec<NodeIndex>>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    pub fn insert(&mut self, header: BlockHeader, parent: Option<NodeIndex>, work: u128) -> NodeIndex {
        let hash = header.block_hash();
        let height = header.height;
        let idx = self.nodes.len();
        self.nodes.push(BlockNode {
            header,
            hash,
            parent,
            height,
            work,
        });
        self.by_hash.insert(hash, idx);
        self.by_height.entry(height).or_default().push(idx);
        idx
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&BlockNode> {
        self.nodes.get(idx)
    }

    pub fn index_of(&self, hash: &Hash) -> Option<NodeIndex> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn at_height(&self, height: u64) -> &[NodeIndex] {
        self.by_height.get(&height).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Walks parent links from `idx` back toward the genesis, returning the
    /// path in root-to-tip order.
    pub fn ancestry(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut path = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            path.push(i);
            cur = self.nodes[i].parent;
        }
        path.reverse();
        path
    }

    /// Finds the common ancestor of two nodes by walking both ancestries;
    /// used to compute the detach/attach path during reorg (4.H).
    pub fn fork_point(&self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        let path_a = self.ancestry(a);
        let path_b: std::collections::HashSet<_> = self.ancestry(b).into_iter().collect();
        path_a
            .into_iter()
            .rev()
            .find(|i| path_b.contains(i))
            .expect("two nodes in the same arena always share the genesis ancestor")
    }

    pub fn block_hash_at(&self, idx: NodeIndex) -> Hash {
        self.nodes[idx].hash
    }

    /// Most recent bit-length `pubkey` plotted with, walking the ancestry
    /// ending at `idx` (inclusive) back toward genesis. `None` if `pubkey`
    /// never mined along this path, since the monotonicity rule (4.E) only
    /// constrains a miner against its own prior plots.
    pub fn prior_bit_length(&self, idx: NodeIndex, pubkey: &[u8]) -> Option<u8> {
        let mut cur = Some(idx);
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if node.header.pubkey == pubkey {
                return Some(node.header.proof.bit_length);
            }
            cur = node.parent;
        }
        None
    }

    /// Union of every ancestor's `ban_list` from genesis through `idx`
    /// inclusive: the contextual ban list effective for a child of `idx`.
    pub fn effective_ban_list(&self, idx: NodeIndex) -> Vec<Vec<u8>> {
        let mut list: Vec<Vec<u8>> = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            let node = &self.nodes[i];
            for pk in &node.header.ban_list {
                if !list.contains(pk) {
                    list.push(pk.clone());
                }
            }
            cur = node.parent;
        }
        list
    }
}
