//! Persistent key-value store (component I).
//!
//! Grounded in the teacher's `storage::persistence::Storage` (atomic
//! temp-file-then-rename single-snapshot save) and
//! `storage::utxo_cache::UtxoCache` (dirty-tracking before flush),
//! generalized from whole-chain JSON snapshots to an ordered `sled` keyspace
//! with the byte-layout key schema from `store::keys`, a staged-batch commit
//! protocol (`begin` → per-subsystem sub-batches → one atomic `commit`, with
//! `META` written last per §4.I), and a resumable migration routine.

pub mod keys;
pub mod upgrade;

use crate::block::Block;
use crate::codec::Hash;
use crate::error::StoreError;
use crate::transaction::{TxEntry, TxStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The `TXL` value: where a transaction confirmed and its per-output spent
/// bitmap, merged into one entry so a spend never needs to touch two keys to
/// stay consistent (4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TxLocationValue {
    height: u64,
    block_hash: Hash,
    spent: Vec<bool>,
}

/// A single block's worth of staged writes, applied to the backing store
/// only on `Store::commit`. Mirrors the teacher's dirty-entry buffering,
/// generalized from a `HashMap<String, CacheEntry>` to an explicit `sled`
/// batch so the final write really is atomic at the storage-engine level.
///
/// Spends (`newly_spent`/`reverted_spends`) are recorded as instructions
/// rather than applied here, since they may target a transaction's bitmap
/// before that transaction's own `TXL` entry exists in this same batch (an
/// earlier block of a reorg's attach list) or only in the tree already on
/// disk; `Store::commit` resolves and folds them in one pass.
#[derive(Default)]
pub struct StoreBatch {
    batch: sled::Batch,
    new_tx_locations: HashMap<Hash, TxLocationValue>,
    staged_block: Option<Hash>,
    newly_spent: Vec<(Hash, u32)>,
    reverted_spends: Vec<(Hash, u32)>,
}

impl StoreBatch {
    /// Stages `block` as a main-chain block at its height: the height and
    /// hash indexes, a clean per-output bitmap for each of its own
    /// transactions, and the outpoints `block` itself spends (from earlier
    /// transactions), to be folded into their bitmaps at commit (4.F/4.I,
    /// Invariant 1).
    pub fn put_block(&mut self, block: &Block, newly_spent: &[(Hash, u32)]) -> Result<(), StoreError> {
        let hash = block.block_hash();
        let bytes = serde_json::to_vec(block)?;
        self.batch.insert(keys::block_by_height_key(block.header.height), bytes.clone());
        self.batch.insert(keys::block_by_hash_key(&hash), bytes);

        for tx in &block.transactions {
            self.new_tx_locations.insert(
                tx.tx_hash(),
                TxLocationValue {
                    height: block.header.height,
                    block_hash: hash,
                    spent: vec![false; tx.tx_outs.len()],
                },
            );
        }

        self.batch.insert(keys::height_timestamps_key(block.header.height), block.header.timestamp.to_be_bytes().to_vec());
        self.staged_block = Some(hash);
        self.newly_spent.extend_from_slice(newly_spent);
        Ok(())
    }

    /// Stages the detach half of a reorg (4.H step 7): drops `block`'s
    /// height index and its own transactions' `TXL` entries (they are no
    /// longer confirmed), and unmarks the outpoints it had spent. The block
    /// body stays reachable at `BLKSHA` (§9 Open Question a's audit-trail
    /// rationale extends naturally to detached blocks).
    pub fn revert_block(&mut self, block: &Block, reverted_spends: &[(Hash, u32)]) {
        self.batch.remove(keys::block_by_height_key(block.header.height));
        for tx in &block.transactions {
            let tx_hash = tx.tx_hash();
            self.new_tx_locations.remove(&tx_hash);
            self.batch.remove(keys::tx_location_key(&tx_hash));
        }
        self.reverted_spends.extend_from_slice(reverted_spends);
    }

    pub fn put_ban_list(&mut self, height: u64, pubkeys: &[Vec<u8>]) -> Result<(), StoreError> {
        self.batch.insert(keys::ban_list_key(height), serde_json::to_vec(pubkeys)?);
        Ok(())
    }

    pub fn put_govern_tx(&mut self, id: u16, height: u64, tx_hash: &Hash, block_sha: &Hash, data: &[u8]) {
        self.batch.insert(keys::govern_tx_key(id, height, tx_hash, block_sha), data.to_vec());
    }
}

/// Ordered `sled`-backed store implementing the exact key schema of §4.I.
/// Single logical writer; concurrent readers see a consistent prior state
/// until `commit` lands (sled's transaction semantics give us this for free).
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Store { db })
    }

    pub fn begin(&self) -> StoreBatch {
        StoreBatch::default()
    }

    /// Applies a staged batch atomically, then updates `META` last, per
    /// §4.I's commit-ordering requirement (`META` is the durability
    /// watermark: if the process dies before it lands, the batch replays
    /// as if it never happened).
    ///
    /// Spends staged against the batch are resolved here against a
    /// `touched` map seeded from this block's own new locations, falling
    /// back to whatever is already persisted for outpoints from earlier
    /// blocks — reverts are folded before new spends, so the two properly
    /// compose within one reorg's atomic commit (Invariant 1, §8 testable
    /// property 6).
    pub fn commit(&self, mut staged: StoreBatch) -> Result<(), StoreError> {
        let block_hash = staged.staged_block.ok_or_else(|| {
            StoreError::BatchNotStaged("no block staged before commit".to_string())
        })?;

        let mut touched = staged.new_tx_locations.clone();
        let mut archive_adds: Vec<(Hash, u64)> = Vec::new();
        let mut archive_removes: Vec<(Hash, u64)> = Vec::new();

        for (tx_hash, index) in &staged.reverted_spends {
            let loc = self.resolve_location(&mut touched, tx_hash)?;
            if let Some(flag) = loc.spent.get_mut(*index as usize) {
                if *flag {
                    archive_removes.push((*tx_hash, loc.height));
                }
                *flag = false;
            }
        }
        for (tx_hash, index) in &staged.newly_spent {
            let loc = self.resolve_location(&mut touched, tx_hash)?;
            if let Some(flag) = loc.spent.get_mut(*index as usize) {
                *flag = true;
            }
            if !loc.spent.is_empty() && loc.spent.iter().all(|s| *s) {
                archive_adds.push((*tx_hash, loc.height));
            }
        }

        for (tx_hash, loc) in &touched {
            staged.batch.insert(keys::tx_location_key(tx_hash), serde_json::to_vec(loc)?);
        }
        for (tx_hash, height) in &archive_adds {
            staged.batch.insert(keys::tx_fully_spent_archive_key(tx_hash, *height), vec![1]);
        }
        for (tx_hash, height) in &archive_removes {
            staged.batch.remove(keys::tx_fully_spent_archive_key(tx_hash, *height));
        }

        self.db.apply_batch(staged.batch)?;

        let mut meta_batch = sled::Batch::default();
        meta_batch.insert(keys::meta_key("tip"), block_hash.0.to_vec());
        self.db.apply_batch(meta_batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Returns the `TXL` entry for `tx_hash` if `touched` already holds a
    /// staged-this-commit copy, otherwise reads the persisted one in.
    fn resolve_location<'a>(
        &self,
        touched: &'a mut HashMap<Hash, TxLocationValue>,
        tx_hash: &Hash,
    ) -> Result<&'a mut TxLocationValue, StoreError> {
        if !touched.contains_key(tx_hash) {
            let loc = self.read_tx_location(tx_hash)?.ok_or(StoreError::Corrupt("TXL"))?;
            touched.insert(*tx_hash, loc);
        }
        Ok(touched.get_mut(tx_hash).expect("just inserted or already present"))
    }

    fn read_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocationValue>, StoreError> {
        match self.db.get(keys::tx_location_key(tx_hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores a side-branch block's body without touching the main-chain
    /// height index, `TXL`, or `META` tip (4.H step 7): retrievable later if
    /// its branch ever wins a reorg, but inert until then. Bypasses
    /// `StoreBatch`/`commit` entirely since it is not part of the atomic
    /// main-chain transition.
    pub fn store_side_block(&self, block: &Block) -> Result<(), StoreError> {
        let hash = block.block_hash();
        let bytes = serde_json::to_vec(block)?;
        self.db.insert(keys::block_by_hash_key(&hash), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        match self.db.get(keys::block_by_height_key(height))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.db.get(keys::block_by_hash_key(hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_tip_hash(&self) -> Result<Option<Hash>, StoreError> {
        match self.db.get(keys::meta_key("tip"))? {
            Some(bytes) => {
                let mut buf = [0u8; 32];
                if bytes.len() != 32 {
                    return Err(StoreError::Corrupt("META"));
                }
                buf.copy_from_slice(&bytes);
                Ok(Some(Hash(buf)))
            }
            None => Ok(None),
        }
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        match self.db.get(keys::meta_key(SCHEMA_VERSION_KEY))? {
            Some(bytes) if bytes.len() == 4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes);
                Ok(u32::from_be_bytes(buf))
            }
            Some(_) => Err(StoreError::Corrupt("META.schema_version")),
            None => Ok(0),
        }
    }

    pub fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        self.db.insert(keys::meta_key(SCHEMA_VERSION_KEY), &version.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Builds a projected, in-memory `TxStore` view over the transactions a
    /// block-being-validated actually references, rather than keeping the
    /// full UTXO set resident — the store answers exactly the lookups
    /// `check_tx_inputs` needs and nothing more.
    pub fn project_tx_store(&self, hashes: &[Hash]) -> Result<ProjectedTxStore, StoreError> {
        let mut entries = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            let Some(loc) = self.read_tx_location(hash)? else {
                continue;
            };
            let Some(block) = self.get_block_by_hash(&loc.block_hash)? else {
                continue;
            };
            let Some(tx) = block.transactions.iter().find(|t| t.tx_hash() == *hash) else {
                continue;
            };

            let confirm_time = match self.db.get(keys::height_timestamps_key(loc.height))? {
                Some(bytes) if bytes.len() == 8 => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&bytes);
                    i64::from_be_bytes(buf)
                }
                _ => return Err(StoreError::Corrupt("HTS")),
            };

            entries.insert(
                *hash,
                TxEntry {
                    tx: tx.clone(),
                    block_height: loc.height,
                    confirm_time,
                    is_coinbase: tx.is_coinbase(),
                    spent: loc.spent,
                },
            );
        }
        Ok(ProjectedTxStore { entries })
    }
}

/// In-memory `TxStore` covering exactly the transactions projected out of
/// the backing store for one validation pass (4.D/4.I).
pub struct ProjectedTxStore {
    entries: HashMap<Hash, TxEntry>,
}

impl TxStore for ProjectedTxStore {
    fn get(&self, hash: &Hash) -> Option<&TxEntry> {
        self.entries.get(hash)
    }

    fn mark_spent(&mut self, hash: &Hash, index: u32) {
        if let Some(entry) = self.entries.get_mut(hash) {
            if let Some(flag) = entry.spent.get_mut(index as usize) {
                *flag = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::block::ProposalArea;
    use crate::header::{BlockHeader, Proof};
    use crate::transaction::{MsgTx, OutPoint, TxIn, TxOut};

    fn sample_block(height: u64) -> Block {
        let coinbase = MsgTx {
            version: 1,
            tx_ins: vec![TxIn {
                previous_out_point: OutPoint::coinbase(),
                signature_script: height.to_le_bytes().to_vec(),
                sequence: u32::MAX,
                witness: vec![],
            }],
            tx_outs: vec![TxOut { value: Amount(100), pk_script: vec![] }],
            lock_time: 0,
        };
        let header = BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height,
            timestamp: 1000 + height as i64,
            previous: Hash::zero(),
            transaction_root: crate::codec::merkle_root(&[coinbase.tx_hash()]),
            witness_root: crate::codec::merkle_root(&[coinbase.tx_hash_witness()]),
            proposal_root: ProposalArea::default().root(),
            target: vec![1],
            challenge: Hash::zero(),
            pubkey: vec![0x02; 33],
            proof: Proof { x: vec![], x_prime: vec![], bit_length: 28 },
            signature: vec![],
            ban_list: vec![],
        };
        Block { header, proposal_area: ProposalArea::default(), transactions: vec![coinbase] }
    }

    #[test]
    fn commit_requires_a_staged_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin();
        assert!(store.commit(batch).is_err());
    }

    #[test]
    fn committed_block_round_trips_and_updates_tip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let block = sample_block(1);
        let hash = block.block_hash();

        let mut batch = store.begin();
        batch.put_block(&block, &[]).unwrap();
        store.commit(batch).unwrap();

        let loaded = store.get_block_by_height(1).unwrap().unwrap();
        assert_eq!(loaded.block_hash(), hash);
        assert_eq!(store.get_tip_hash().unwrap(), Some(hash));
    }

    #[test]
    fn projected_tx_store_resolves_referenced_tx() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let block = sample_block(1);
        let tx_hash = block.transactions[0].tx_hash();

        let mut batch = store.begin();
        batch.put_block(&block, &[]).unwrap();
        store.commit(batch).unwrap();

        let view = store.project_tx_store(&[tx_hash]).unwrap();
        let entry = view.get(&tx_hash).expect("projected entry present");
        assert_eq!(entry.block_height, 1);
        assert!(entry.is_coinbase);
    }

    /// A block whose second transaction spends output 0 of `prev_hash`.
    fn spending_block(height: u64, prev_hash: Hash) -> Block {
        let coinbase = MsgTx {
            version: 1,
            tx_ins: vec![TxIn {
                previous_out_point: OutPoint::coinbase(),
                signature_script: height.to_le_bytes().to_vec(),
                sequence: u32::MAX,
                witness: vec![],
            }],
            tx_outs: vec![TxOut { value: Amount(100), pk_script: vec![] }],
            lock_time: 0,
        };
        let spend = MsgTx {
            version: 1,
            tx_ins: vec![TxIn {
                previous_out_point: OutPoint { tx_hash: prev_hash, index: 0 },
                signature_script: vec![],
                sequence: u32::MAX,
                witness: vec![],
            }],
            tx_outs: vec![TxOut { value: Amount(50), pk_script: vec![] }],
            lock_time: 0,
        };
        let header = BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height,
            timestamp: 1000 + height as i64,
            previous: Hash::zero(),
            transaction_root: crate::codec::merkle_root(&[coinbase.tx_hash(), spend.tx_hash()]),
            witness_root: crate::codec::merkle_root(&[coinbase.tx_hash_witness(), spend.tx_hash_witness()]),
            proposal_root: ProposalArea::default().root(),
            target: vec![1],
            challenge: Hash::zero(),
            pubkey: vec![0x02; 33],
            proof: Proof { x: vec![], x_prime: vec![], bit_length: 28 },
            signature: vec![],
            ban_list: vec![],
        };
        Block { header, proposal_area: ProposalArea::default(), transactions: vec![coinbase, spend] }
    }

    #[test]
    fn commit_folds_newly_spent_into_persisted_bitmap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let parent_block = sample_block(1);
        let parent_tx_hash = parent_block.transactions[0].tx_hash();

        let mut batch = store.begin();
        batch.put_block(&parent_block, &[]).unwrap();
        store.commit(batch).unwrap();

        let child = spending_block(2, Hash::zero());
        let mut batch = store.begin();
        batch.put_block(&child, &[(parent_tx_hash, 0)]).unwrap();
        store.commit(batch).unwrap();

        let view = store.project_tx_store(&[parent_tx_hash]).unwrap();
        assert_eq!(view.get(&parent_tx_hash).unwrap().spent, vec![true]);
    }

    #[test]
    fn fully_spent_tx_is_archived_to_txfs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let parent_block = sample_block(1);
        let parent_tx_hash = parent_block.transactions[0].tx_hash();
        let mut batch = store.begin();
        batch.put_block(&parent_block, &[]).unwrap();
        store.commit(batch).unwrap();

        let child = spending_block(2, Hash::zero());
        let mut batch = store.begin();
        batch.put_block(&child, &[(parent_tx_hash, 0)]).unwrap();
        store.commit(batch).unwrap();

        assert!(store
            .db
            .get(keys::tx_fully_spent_archive_key(&parent_tx_hash, 1))
            .unwrap()
            .is_some());
    }

    #[test]
    fn revert_block_unmarks_its_spends() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let parent_block = sample_block(1);
        let parent_tx_hash = parent_block.transactions[0].tx_hash();
        let mut batch = store.begin();
        batch.put_block(&parent_block, &[]).unwrap();
        store.commit(batch).unwrap();

        let child = spending_block(2, Hash::zero());
        let mut batch = store.begin();
        batch.put_block(&child, &[(parent_tx_hash, 0)]).unwrap();
        store.commit(batch).unwrap();

        // Detach `child` and attach a replacement that doesn't spend
        // `parent_tx_hash`, in one atomic batch (the reorg shape): the
        // output goes back to unspent.
        let replacement = sample_block(2);
        let mut batch = store.begin();
        batch.revert_block(&child, &[(parent_tx_hash, 0)]);
        batch.put_block(&replacement, &[]).unwrap();
        store.commit(batch).unwrap();

        let view = store.project_tx_store(&[parent_tx_hash]).unwrap();
        assert_eq!(view.get(&parent_tx_hash).unwrap().spent, vec![false]);

        assert!(store
            .db
            .get(keys::tx_fully_spent_archive_key(&parent_tx_hash, 1))
            .unwrap()
            .is_none());
    }
}
