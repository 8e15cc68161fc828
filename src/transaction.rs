//! Transaction types and validation (component D): `MsgTx`, `TxIn`/`TxOut`,
//! context-free sanity checks, and contextual input checks.
//!
//! Grounded in the teacher's `core::transaction::Transaction` (fields,
//! `calculate_hash`, coinbase detection) generalized to a UTXO-with-explicit-
//! outpoints model rather than the teacher's from/to-address model, and in
//! `core::blockchain::Blockchain::update_utxo_set`/`find_utxo` for the
//! spent-tracking shape, generalized from a flat `HashMap<String, UTXO>` to
//! a per-output spent bitmap behind `TxStore` (4.D/4.I).

use crate::amount::Amount;
use crate::codec::{sha256d, Hash};
use crate::error::TxError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const MAX_TX_SIZE: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn is_null(&self) -> bool {
        self.tx_hash.is_zero() && self.index == u32::MAX
    }

    pub fn coinbase() -> Self {
        OutPoint {
            tx_hash: Hash::zero(),
            index: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_out_point: OutPoint,
    pub signature_script: Vec<u8>,
    /// BIP-68-style relative sequence lock. `u32::MAX` disables it.
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub pk_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTx {
    pub version: u32,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
    pub lock_time: u32,
}

impl MsgTx {
    pub fn tx_hash(&self) -> Hash {
        sha256d(&self.serialize_for_hash())
    }

    /// Serializes the non-witness fields, matching the sighash-excludes-witness
    /// convention named in §6.
    fn serialize_for_hash(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        crate::codec::write_varint(&mut buf, self.tx_ins.len() as u64).expect("writing to Vec never fails");
        for input in &self.tx_ins {
            buf.extend_from_slice(&input.previous_out_point.tx_hash.0);
            buf.extend_from_slice(&input.previous_out_point.index.to_le_bytes());
            crate::codec::write_varbytes(&mut buf, &input.signature_script).expect("writing to Vec never fails");
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        crate::codec::write_varint(&mut buf, self.tx_outs.len() as u64).expect("writing to Vec never fails");
        for output in &self.tx_outs {
            buf.extend_from_slice(&output.value.0.to_le_bytes());
            crate::codec::write_varbytes(&mut buf, &output.pk_script).expect("writing to Vec never fails");
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    /// Serializes the "packet" encoding (§6): identical to the plain form
    /// but with each input's witness stack appended, used for the
    /// witness-Merkle root rather than for hashing/signing.
    fn serialize_with_witness(&self) -> Vec<u8> {
        let mut buf = self.serialize_for_hash();
        for input in &self.tx_ins {
            crate::codec::write_varint(&mut buf, input.witness.len() as u64).expect("writing to Vec never fails");
            for item in &input.witness {
                crate::codec::write_varbytes(&mut buf, item).expect("writing to Vec never fails");
            }
        }
        buf
    }

    /// Hash of the "packet" encoding, the leaf value for the witness-Merkle
    /// root (§4.A/§6).
    pub fn tx_hash_witness(&self) -> Hash {
        sha256d(&self.serialize_with_witness())
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_ins.len() == 1 && self.tx_ins[0].previous_out_point.is_null()
    }

    pub fn serialized_size(&self) -> u64 {
        self.serialize_for_hash().len() as u64
    }

    pub fn total_out(&self) -> Result<Amount, TxError> {
        Amount::sum(self.tx_outs.iter().map(|o| o.value))
    }
}

/// A previously-accepted transaction plus the block it confirmed in, as
/// needed by maturity/spend checks. Provided by the store's projected view
/// (4.I `TxStore`).
#[derive(Debug, Clone)]
pub struct TxEntry {
    pub tx: MsgTx,
    pub block_height: u64,
    /// Timestamp of the block that confirmed this transaction, used as the
    /// reference point for time-based relative sequence locks.
    pub confirm_time: i64,
    pub is_coinbase: bool,
    /// Per-output spent flags, indexed like `tx.tx_outs`.
    pub spent: Vec<bool>,
}

/// Read-side view a validator needs over previously-confirmed transactions.
/// Implemented by the persistent store; a `HashMap`-backed stub is used in
/// tests. Mutable so that double-spends *within* the block under
/// validation are visible to later transactions in the same pass (4.D).
pub trait TxStore {
    fn get(&self, hash: &Hash) -> Option<&TxEntry>;
    fn mark_spent(&mut self, hash: &Hash, index: u32);
}

/// Context-free checks (4.D): structure only, no chain state consulted.
pub fn check_tx_sanity(tx: &MsgTx) -> Result<(), TxError> {
    if tx.tx_ins.is_empty() {
        return Err(TxError::NoTxInputs);
    }
    if tx.tx_outs.is_empty() {
        return Err(TxError::NoTxOutputs);
    }
    if tx.serialized_size() > MAX_TX_SIZE {
        return Err(TxError::TxTooBig);
    }

    tx.total_out()?;
    for out in &tx.tx_outs {
        if out.value.0 > crate::amount::MAX_AMOUNT {
            return Err(TxError::BadTxOutValue);
        }
    }

    let mut seen = HashSet::with_capacity(tx.tx_ins.len());
    for input in &tx.tx_ins {
        if !seen.insert(input.previous_out_point) {
            return Err(TxError::DuplicateTxInputs);
        }
    }

    if tx.is_coinbase() {
        if !tx.witness_is_empty() {
            return Err(TxError::CoinbaseTxInWitness);
        }
    } else {
        for input in &tx.tx_ins {
            if input.previous_out_point.is_null() {
                return Err(TxError::BadTxInput);
            }
        }
    }

    Ok(())
}

impl MsgTx {
    fn witness_is_empty(&self) -> bool {
        self.tx_ins.iter().all(|i| i.witness.is_empty())
    }
}

/// Checks whether `lock_time`/per-input sequence locks allow inclusion in a
/// block at `height`/`median_time_past` (4.D `UnFinalizedTx`/`SequenceNotSatisfied`).
pub fn check_tx_finality(tx: &MsgTx, height: u64, median_time_past: i64) -> Result<(), TxError> {
    const LOCKTIME_THRESHOLD: u32 = 500_000_000;
    if tx.lock_time == 0 {
        return Ok(());
    }
    let locked = if tx.lock_time < LOCKTIME_THRESHOLD {
        (tx.lock_time as u64) >= height
    } else {
        (tx.lock_time as i64) >= median_time_past
    };
    let all_final = tx.tx_ins.iter().all(|i| i.sequence == u32::MAX);
    if locked && !all_final {
        return Err(TxError::UnFinalizedTx);
    }
    Ok(())
}

/// BIP68-style relative-sequence-lock encoding, carried over from the
/// original source's sequence-number convention (§4.F "relative sequence
/// locks").
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0xffff;
const SEQUENCE_LOCKTIME_GRANULARITY_SECONDS: i64 = 512;

/// Contextual checks against previously-confirmed outputs (4.D): maturity,
/// double-spend, relative sequence locks, and value-conservation (inputs ≥
/// outputs). Mutates `store` to flag spent outputs so a later transaction in
/// the same block sees the spend (intra-block double-spend detection).
pub fn check_tx_inputs(
    tx: &MsgTx,
    height: u64,
    median_time_past: i64,
    coinbase_maturity: u64,
    transaction_maturity: u64,
    store: &mut dyn TxStore,
) -> Result<Amount, TxError> {
    if tx.is_coinbase() {
        return Ok(Amount::ZERO);
    }

    let mut total_in: u128 = 0;
    for input in &tx.tx_ins {
        let op = input.previous_out_point;
        let entry = store.get(&op.tx_hash).ok_or(TxError::MissingTx)?;

        let out = entry
            .tx
            .tx_outs
            .get(op.index as usize)
            .ok_or(TxError::MissingTx)?;

        if *entry.spent.get(op.index as usize).unwrap_or(&false) {
            return Err(TxError::DoubleSpend);
        }

        // Only a coinbase's own outputs carry a maturity floor: index 0 under
        // the full coinbase maturity, a pool-reward output (index > 0) under
        // the shorter transaction maturity. An ordinary non-coinbase prev has
        // no maturity gate here at all.
        if entry.is_coinbase {
            let required_maturity = if op.index == 0 { coinbase_maturity } else { transaction_maturity };
            if height < entry.block_height.saturating_add(required_maturity) {
                return Err(TxError::ImmatureSpend);
            }
        }

        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG == 0 {
            if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
                let relative = (input.sequence & SEQUENCE_LOCKTIME_MASK) as i64 * SEQUENCE_LOCKTIME_GRANULARITY_SECONDS;
                if median_time_past < entry.confirm_time + relative {
                    return Err(TxError::SequenceNotSatisfied);
                }
            } else {
                let relative = (input.sequence & SEQUENCE_LOCKTIME_MASK) as u64;
                if height < entry.block_height + relative {
                    return Err(TxError::SequenceNotSatisfied);
                }
            }
        }

        total_in += out.value.0 as u128;
        if total_in > crate::amount::MAX_AMOUNT as u128 {
            return Err(TxError::BadTxOutValue);
        }

        store.mark_spent(&op.tx_hash, op.index);
    }

    let total_out = tx.total_out()?;
    if (total_in as u64) < total_out.0 {
        return Err(TxError::BadTxOutValue);
    }

    Ok(Amount((total_in as u64) - total_out.0))
}
