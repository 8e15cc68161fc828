//! Chain state machine (component H): best-chain selection, block
//! connection, and reorganization.
//!
//! Grounded in the teacher's `core::blockchain::Blockchain` (`add_block`
//! orchestration order: validate → update state → extend) and
//! `core::chain_state::ChainStateManager` (orphan pool, undo data, chain
//! tips), generalized from a single `Vec<Block>` with one implicit tip to a
//! `NodeArena` of all known headers plus explicit best-tip tracking, reorg
//! (detach/attach), and `RwLock`-protected shared mutable state per the
//! single-logical-writer/many-readers concurrency model (§6.1).

pub mod node;
pub mod orphan;

use crate::block::{check_connect_block, Block};
use crate::codec::Hash;
use crate::config::ChainParams;
use crate::error::{ChainError, StoreError};
use crate::header::{median_time, PocVerifier};
use crate::script::WitnessVerifier;
use crate::store::Store;
use crate::transaction::{TxEntry, TxStore};
use node::{NodeArena, NodeIndex};
use orphan::OrphanPool;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Outcome of submitting a block, mirroring the teacher's `BlockStatus`
/// enum, generalized with `Hash`-typed payloads and an explicit
/// `disconnected`/`connected` path for reorgs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    AddedToMainChain,
    /// Connected but doesn't overtake the best tip: stored on its side
    /// branch, no main-chain pointer commit (4.H step 7).
    AddedToSideChain,
    AddedAsOrphan,
    CausedReorg { disconnected: Vec<Hash>, connected: Vec<Hash> },
    Duplicate,
}

/// The `(txHash, outputIndex)` pairs `block` itself consumes: every
/// non-coinbase transaction's inputs, plus the coinbase's own
/// binding/pooling inputs (`tx_ins[1..]`), per §4.F/Invariant 1.
fn consumed_outpoints(block: &Block) -> Vec<(Hash, u32)> {
    let mut outs: Vec<(Hash, u32)> = block.transactions[1..]
        .iter()
        .flat_map(|tx| {
            tx.tx_ins
                .iter()
                .map(|i| (i.previous_out_point.tx_hash, i.previous_out_point.index))
        })
        .collect();
    outs.extend(
        block.transactions[0].tx_ins[1..]
            .iter()
            .map(|i| (i.previous_out_point.tx_hash, i.previous_out_point.index)),
    );
    outs
}

/// `TxStore` view used while re-validating a reorg's attach path: seeded
/// from the persisted store with the detached path's own transactions
/// excluded and its spends undone, then updated in place as each attach
/// block is accepted so later attach blocks see earlier ones' outputs.
struct ReorgStore {
    unconfirmed: HashSet<Hash>,
    overlay: HashMap<Hash, TxEntry>,
}

impl TxStore for ReorgStore {
    fn get(&self, hash: &Hash) -> Option<&TxEntry> {
        if self.unconfirmed.contains(hash) {
            return None;
        }
        self.overlay.get(hash)
    }

    fn mark_spent(&mut self, hash: &Hash, index: u32) {
        if let Some(entry) = self.overlay.get_mut(hash) {
            if let Some(flag) = entry.spent.get_mut(index as usize) {
                *flag = true;
            }
        }
    }
}

/// Cumulative work for one block given its PoC target, as
/// `2^256 / (target + 1)`; mirrors the teacher's `calculate_work`
/// generalized from a fixed-width difficulty shift to a big-integer target.
fn block_work(target: &[u8]) -> u128 {
    use num_bigint::BigUint;
    let target_value = BigUint::from_bytes_be(target);
    let max = BigUint::from(1u8) << 256u32;
    let denom = &target_value + BigUint::from(1u8);
    let work = max / denom;
    let bytes = work.to_bytes_be();
    let mut buf = [0u8; 16];
    let start = bytes.len().saturating_sub(16);
    let copy_len = bytes.len() - start;
    buf[16 - copy_len..].copy_from_slice(&bytes[start..]);
    u128::from_be_bytes(buf)
}

struct SharedState {
    arena: NodeArena,
    orphans: OrphanPool,
    best_tip: Option<NodeIndex>,
}

/// The chain's mutable state behind one lock, matching the "one logical
/// writer, many readers" model (§6.1): block connection takes the write
/// lock for the duration of a single block's validation + index update,
/// never across an I/O wait on the store.
pub struct Blockchain {
    params: ChainParams,
    state: RwLock<SharedState>,
    store: Store,
    witness_verifier: WitnessVerifier,
}

/// Default capacity of the shared `(signature, pubkey, sighash)` verification
/// cache (§5: "Signature cache: lock-free read path, short critical section
/// on insert; bounded LRU").
const WITNESS_CACHE_CAPACITY: usize = 10_000;

impl Blockchain {
    pub fn new(params: ChainParams, store: Store, genesis: Block) -> Self {
        let work = block_work(&genesis.header.target);
        let mut arena = NodeArena::new();
        let idx = arena.insert(genesis.header.clone(), None, work);
        Blockchain {
            params,
            state: RwLock::new(SharedState {
                arena,
                orphans: OrphanPool::new(),
                best_tip: Some(idx),
            }),
            store,
            witness_verifier: WitnessVerifier::new(WITNESS_CACHE_CAPACITY),
        }
    }

    pub fn best_tip_hash(&self) -> Hash {
        let state = self.state.read().expect("chain state lock poisoned");
        let idx = state.best_tip.expect("genesis always present");
        state.arena.block_hash_at(idx)
    }

    pub fn best_height(&self) -> u64 {
        let state = self.state.read().expect("chain state lock poisoned");
        let idx = state.best_tip.expect("genesis always present");
        state.arena.get(idx).expect("best tip indexes a live node").height
    }

    /// Accepts a block into the chain, performing sanity/context/connect
    /// checks, orphan handling, and reorg if the new block extends a
    /// heavier side chain than the current best tip (4.F/4.H/§5).
    pub fn process_block(&self, block: Block, verifier: &dyn PocVerifier, now: i64) -> Result<BlockStatus, ChainError> {
        let hash = block.block_hash();

        {
            let state = self.state.read().expect("chain state lock poisoned");
            if state.arena.contains(&hash) || state.orphans.contains(&hash) {
                return Ok(BlockStatus::Duplicate);
            }
        }

        let parent_idx = {
            let state = self.state.read().expect("chain state lock poisoned");
            state.arena.index_of(&block.header.previous)
        };

        let Some(parent_idx) = parent_idx else {
            let mut state = self.state.write().expect("chain state lock poisoned");
            state.orphans.insert(block, now);
            return Ok(BlockStatus::AddedAsOrphan);
        };

        self.connect_one(block, parent_idx, verifier, now)
    }

    fn connect_one(
        &self,
        block: Block,
        parent_idx: NodeIndex,
        verifier: &dyn PocVerifier,
        now: i64,
    ) -> Result<BlockStatus, ChainError> {
        let hash = block.block_hash();

        let (parent_header, parent_work, recent_timestamps, parent_bit_length, effective_ban_list) = {
            let state = self.state.read().expect("chain state lock poisoned");
            let parent = state.arena.get(parent_idx).expect("parent_idx is valid");
            let ancestry = state.arena.ancestry(parent_idx);
            let timestamps: Vec<i64> = ancestry
                .iter()
                .rev()
                .take(crate::config::MEDIAN_TIME_BLOCKS)
                .rev()
                .map(|i| state.arena.get(*i).expect("ancestry indices are valid").header.timestamp)
                .collect();
            let parent_bit_length = state.arena.prior_bit_length(parent_idx, &block.header.pubkey);
            let effective_ban_list = state.arena.effective_ban_list(parent_idx);
            (parent.header.clone(), parent.work, timestamps, parent_bit_length, effective_ban_list)
        };

        let consumed = consumed_outpoints(&block);
        // Own hashes too, so the overwrite-rule lookup in `check_connect_block`
        // can see any prior confirmation of these same transactions.
        let mut tx_hashes: Vec<Hash> = consumed.iter().map(|(h, _)| *h).collect();
        tx_hashes.extend(block.transactions.iter().map(|tx| tx.tx_hash()));
        let mut projected = self
            .store
            .project_tx_store(&tx_hashes)
            .map_err(ChainError::Store)?;

        let slot = (block.header.timestamp as u64) / self.params.poc_slot_seconds;
        check_connect_block(
            &block,
            &parent_header,
            parent_bit_length,
            &recent_timestamps,
            &effective_ban_list,
            slot,
            verifier,
            &self.params,
            now,
            &mut projected,
            &self.witness_verifier,
        )
        .map_err(ChainError::Block)?;

        let work = parent_work + block_work(&block.header.target);

        let (new_idx, current_best, current_work) = {
            let mut state = self.state.write().expect("chain state lock poisoned");
            let new_idx = state.arena.insert(block.header.clone(), Some(parent_idx), work);
            let current_best = state.best_tip.expect("genesis always present");
            let current_work = state.arena.get(current_best).expect("best tip is valid").work;
            (new_idx, current_best, current_work)
        };

        if work <= current_work {
            // Doesn't overtake the best tip (4.H step 7): store the node on
            // its side branch, no commit of the main-chain pointer.
            self.store.store_side_block(&block).map_err(ChainError::Store)?;
            self.promote_orphans(hash, verifier, now);
            return Ok(BlockStatus::AddedToSideChain);
        }

        if parent_idx == current_best {
            let mut batch = self.store.begin();
            batch.put_block(&block, &consumed).map_err(ChainError::Store)?;
            self.store.commit(batch).map_err(ChainError::Store)?;

            let mut state = self.state.write().expect("chain state lock poisoned");
            state.best_tip = Some(new_idx);
            drop(state);

            self.promote_orphans(hash, verifier, now);
            return Ok(BlockStatus::AddedToMainChain);
        }

        // `new_idx` out-works the current best tip but doesn't extend it
        // directly: a reorg. Re-validate the whole attach path in the new
        // context and commit detach + attach atomically (4.H step 6).
        let (detached_hashes, connected_hashes, detached_path, attach_path) = {
            let state = self.state.read().expect("chain state lock poisoned");
            let fork = state.arena.fork_point(current_best, new_idx);
            let old_path = state.arena.ancestry(current_best);
            let new_path = state.arena.ancestry(new_idx);
            let fork_pos_old = old_path.iter().position(|i| *i == fork).unwrap_or(0);
            let fork_pos_new = new_path.iter().position(|i| *i == fork).unwrap_or(0);
            let detached_path: Vec<NodeIndex> = old_path[fork_pos_old + 1..].to_vec();
            let attach_path: Vec<NodeIndex> = new_path[fork_pos_new + 1..].to_vec();
            let detached_hashes: Vec<Hash> = detached_path.iter().map(|i| state.arena.block_hash_at(*i)).collect();
            let connected_hashes: Vec<Hash> = attach_path.iter().map(|i| state.arena.block_hash_at(*i)).collect();
            (detached_hashes, connected_hashes, detached_path, attach_path)
        };

        {
            let state = self.state.read().expect("chain state lock poisoned");
            self.reorg(&state.arena, &detached_path, &attach_path, verifier, now)?;
        }

        let mut state = self.state.write().expect("chain state lock poisoned");
        state.best_tip = Some(new_idx);
        drop(state);

        self.promote_orphans(hash, verifier, now);
        Ok(BlockStatus::CausedReorg { disconnected: detached_hashes, connected: connected_hashes })
    }

    /// Detaches `detached_path` (old main-chain blocks past the fork point)
    /// and attaches `attach_path` (new main-chain blocks past the fork
    /// point, parent-before-child order), re-validating every attach block
    /// via `check_connect_block` against the post-detach store state before
    /// committing both halves in one atomic batch (4.H step 6; §9: the
    /// stricter all-or-nothing reorg contract).
    fn reorg(
        &self,
        arena: &NodeArena,
        detached_path: &[NodeIndex],
        attach_path: &[NodeIndex],
        verifier: &dyn PocVerifier,
        now: i64,
    ) -> Result<(), ChainError> {
        let fetch = |idx: &NodeIndex| -> Result<Block, ChainError> {
            let hash = arena.block_hash_at(*idx);
            self.store
                .get_block_by_hash(&hash)
                .map_err(ChainError::Store)?
                .ok_or(ChainError::Store(StoreError::Corrupt("block missing from store during reorg")))
        };
        let detached_blocks: Vec<Block> = detached_path.iter().map(fetch).collect::<Result<_, _>>()?;
        let attach_blocks: Vec<Block> = attach_path.iter().map(fetch).collect::<Result<_, _>>()?;

        let unconfirmed: HashSet<Hash> = detached_blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.tx_hash()))
            .collect();

        let mut referenced: Vec<Hash> = detached_blocks
            .iter()
            .flat_map(|b| consumed_outpoints(b).into_iter().map(|(h, _)| h))
            .chain(attach_blocks.iter().flat_map(|b| {
                consumed_outpoints(b)
                    .into_iter()
                    .map(|(h, _)| h)
                    .chain(b.transactions.iter().map(|tx| tx.tx_hash()))
            }))
            .collect();
        referenced.sort_by_key(|h| h.0);
        referenced.dedup();

        let projected = self.store.project_tx_store(&referenced).map_err(ChainError::Store)?;
        let mut overlay: HashMap<Hash, TxEntry> = referenced
            .iter()
            .filter(|h| !unconfirmed.contains(h))
            .filter_map(|h| projected.get(h).cloned().map(|entry| (*h, entry)))
            .collect();

        // Undo the detached path's own spends against whatever of their
        // inputs is still confirmed (ancestors on the common path).
        for block in &detached_blocks {
            for (tx_hash, index) in consumed_outpoints(block) {
                if let Some(entry) = overlay.get_mut(&tx_hash) {
                    if let Some(flag) = entry.spent.get_mut(index as usize) {
                        *flag = false;
                    }
                }
            }
        }

        let mut batch = self.store.begin();
        for block in &detached_blocks {
            batch.revert_block(block, &consumed_outpoints(block));
        }

        let mut reorg_store = ReorgStore { unconfirmed, overlay };
        for (pos, block) in attach_blocks.iter().enumerate() {
            let idx = attach_path[pos];
            let node = arena.get(idx).expect("attach_path indices are valid");
            let parent_idx = node.parent.expect("attach blocks are never genesis");
            let parent_header = arena.get(parent_idx).expect("parent indices are valid").header.clone();
            let ancestry = arena.ancestry(parent_idx);
            let recent_timestamps: Vec<i64> = ancestry
                .iter()
                .rev()
                .take(crate::config::MEDIAN_TIME_BLOCKS)
                .rev()
                .map(|i| arena.get(*i).expect("ancestry indices are valid").header.timestamp)
                .collect();
            let parent_bit_length = arena.prior_bit_length(parent_idx, &block.header.pubkey);
            let effective_ban_list = arena.effective_ban_list(parent_idx);
            let slot = (block.header.timestamp as u64) / self.params.poc_slot_seconds;

            check_connect_block(
                block,
                &parent_header,
                parent_bit_length,
                &recent_timestamps,
                &effective_ban_list,
                slot,
                verifier,
                &self.params,
                now,
                &mut reorg_store,
                &self.witness_verifier,
            )
            .map_err(ChainError::Block)?;

            let consumed = consumed_outpoints(block);
            batch.put_block(block, &consumed).map_err(ChainError::Store)?;

            for tx in &block.transactions {
                let tx_hash = tx.tx_hash();
                reorg_store.unconfirmed.remove(&tx_hash);
                reorg_store.overlay.insert(
                    tx_hash,
                    TxEntry {
                        tx: tx.clone(),
                        block_height: block.header.height,
                        confirm_time: block.header.timestamp,
                        is_coinbase: tx.is_coinbase(),
                        spent: vec![false; tx.tx_outs.len()],
                    },
                );
            }
        }

        self.store.commit(batch).map_err(ChainError::Store)?;
        Ok(())
    }

    /// BFS-promotes orphans once their parent connects: each newly-connected
    /// block may unblock further orphans, repeated until no more resolve.
    fn promote_orphans(&self, parent: Hash, verifier: &dyn PocVerifier, now: i64) {
        let mut queue = vec![parent];
        while let Some(parent_hash) = queue.pop() {
            let children = {
                let mut state = self.state.write().expect("chain state lock poisoned");
                state.orphans.take_children_of(parent_hash)
            };
            for child in children {
                let child_hash = child.block_hash();
                let parent_idx = {
                    let state = self.state.read().expect("chain state lock poisoned");
                    state.arena.index_of(&child.header.previous)
                };
                if let Some(parent_idx) = parent_idx {
                    if self.connect_one(child, parent_idx, verifier, now).is_ok() {
                        queue.push(child_hash);
                    }
                }
            }
        }
    }

    pub fn median_time_past(&self, tip: NodeIndex) -> i64 {
        let state = self.state.read().expect("chain state lock poisoned");
        let ancestry = state.arena.ancestry(tip);
        let timestamps: Vec<i64> = ancestry
            .iter()
            .rev()
            .take(crate::config::MEDIAN_TIME_BLOCKS)
            .map(|i| state.arena.get(*i).expect("ancestry indices are valid").header.timestamp)
            .collect();
        median_time(&timestamps)
    }
}
