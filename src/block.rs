//! Block type and composite validation (component F).
//!
//! Grounded in the teacher's `core::block::Block` (header + transactions +
//! `calculate_merkle_root`) generalized with a `ProposalArea` (fault
//! testimony) alongside the transaction list, and in
//! `core::blockchain::Blockchain::validate_block` for the overall
//! check-ordering shape (index/prev-hash/PoW/merkle/tx, generalized to
//! sanity-then-context-then-connect per §4.F).

use crate::codec::merkle_root;
use crate::config::ChainParams;
use crate::error::{BlockError, HeaderError, TxError};
use crate::header::{check_header_context, check_header_sanity, check_header_signature, BlockHeader, PocVerifier};
use crate::script::{classify, count_sig_ops, hash160_as_hash, verify_witness, ScriptVariant, WitnessVerifier};
use crate::subsidy::calc_block_subsidy;
use crate::transaction::{check_tx_finality, check_tx_inputs, check_tx_sanity, MsgTx, TxStore};
use serde::{Deserialize, Serialize};

pub const MAX_BLOCK_PAYLOAD: u64 = 1_000_000;

/// A miner's attested proof of a banned peer's double-proposal fault: two
/// headers signed by the same public key at differing hashes, carried in
/// the proposal area so the ban becomes part of consensus state rather than
/// local policy (4.F/4.E ban-list mechanics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPubKey {
    pub pubkey: Vec<u8>,
    pub header_a: BlockHeader,
    pub header_b: BlockHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProposalArea {
    pub punishments: Vec<FaultPubKey>,
    pub other_data: Vec<u8>,
}

impl ProposalArea {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        crate::codec::write_varint(&mut buf, self.punishments.len() as u64).expect("writing to Vec never fails");
        for p in &self.punishments {
            crate::codec::write_varbytes(&mut buf, &p.pubkey).expect("writing to Vec never fails");
            buf.extend_from_slice(&p.header_a.serialize());
            buf.extend_from_slice(&p.header_b.serialize());
        }
        crate::codec::write_varbytes(&mut buf, &self.other_data).expect("writing to Vec never fails");
        buf
    }

    pub fn root(&self) -> crate::codec::Hash {
        crate::codec::sha256d(&self.serialize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub proposal_area: ProposalArea,
    pub transactions: Vec<MsgTx>,
}

impl Block {
    pub fn block_hash(&self) -> crate::codec::Hash {
        self.header.block_hash()
    }

    fn tx_root(&self) -> crate::codec::Hash {
        let leaves: Vec<_> = self.transactions.iter().map(|t| t.tx_hash()).collect();
        merkle_root(&leaves)
    }

    /// Witness-Merkle root, taken over the "packet" encoding of every
    /// transaction (§6: includes witness stacks, unlike `tx_root`).
    fn witness_root(&self) -> crate::codec::Hash {
        let leaves: Vec<_> = self.transactions.iter().map(|t| t.tx_hash_witness()).collect();
        merkle_root(&leaves)
    }

    fn serialized_size(&self) -> u64 {
        self.transactions.iter().map(|t| t.serialized_size()).sum::<u64>()
            + self.proposal_area.serialize().len() as u64
    }
}

/// Every fault-testimony header must independently pass context-free header
/// sanity, and the two attested headers must genuinely conflict: same
/// public key, different hash, at or before the height of the block
/// carrying the testimony (4.F).
fn check_proposal_area(block: &Block, params: &ChainParams, now: i64) -> Result<(), BlockError> {
    let proposal = &block.proposal_area;
    if proposal.punishments.len() != block.header.ban_list.len() {
        return Err(BlockError::InvalidProposalRoot);
    }
    for (fault, banned) in proposal.punishments.iter().zip(block.header.ban_list.iter()) {
        if &fault.pubkey != banned {
            return Err(BlockError::InvalidProposalRoot);
        }
        if fault.header_a.pubkey != fault.pubkey || fault.header_b.pubkey != fault.pubkey {
            return Err(BlockError::InvalidProposalRoot);
        }
        if fault.header_a.block_hash() == fault.header_b.block_hash() {
            return Err(BlockError::InvalidProposalRoot);
        }
        if fault.header_a.height > block.header.height || fault.header_b.height > block.header.height {
            return Err(BlockError::InvalidProposalRoot);
        }
        check_header_sanity(&fault.header_a, params, now)?;
        check_header_sanity(&fault.header_b, params, now)?;
    }
    Ok(())
}

/// Context-free block checks (4.F): size, tx-count, coinbase shape, merkle
/// roots, sig-op cap — everything derivable from the block alone.
pub fn check_block_sanity(block: &Block, params: &ChainParams, now: i64) -> Result<(), BlockError> {
    check_header_sanity(&block.header, params, now)?;
    check_proposal_area(block, params, now)?;

    if block.serialized_size() > params.max_block_payload {
        return Err(BlockError::BlockTooBig);
    }
    if block.transactions.len() as u64 > params.max_tx_per_block {
        return Err(BlockError::TooManyTransactions);
    }
    if block.transactions.is_empty() {
        return Err(BlockError::Tx(TxError::NoTxInputs));
    }
    if !block.transactions[0].is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }
    for tx in &block.transactions[1..] {
        if tx.is_coinbase() {
            return Err(BlockError::MultipleCoinbases);
        }
    }

    let mut seen = std::collections::HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        check_tx_sanity(tx)?;
        if !seen.insert(tx.tx_hash()) {
            return Err(BlockError::DuplicateTx);
        }
    }

    if block.tx_root() != block.header.transaction_root {
        return Err(BlockError::InvalidMerkleRoot);
    }
    if block.witness_root() != block.header.witness_root {
        return Err(BlockError::InvalidMerkleRoot);
    }
    if block.proposal_area.root() != block.header.proposal_root {
        return Err(BlockError::InvalidProposalRoot);
    }

    let sig_ops: u64 = block
        .transactions
        .iter()
        .flat_map(|tx| tx.tx_outs.iter())
        .map(|out| count_sig_ops(&classify(&out.pk_script)))
        .sum();
    if sig_ops > params.max_sig_ops_per_block() {
        return Err(BlockError::TooManySigOps);
    }

    Ok(())
}

/// Contextual block checks (4.F): header context plus coinbase-height
/// encoding, composing with `header::check_header_context`.
#[allow(clippy::too_many_arguments)]
pub fn check_block_context(
    block: &Block,
    parent: &BlockHeader,
    parent_bit_length: Option<u8>,
    recent_timestamps: &[i64],
    effective_ban_list: &[Vec<u8>],
    slot: u64,
    verifier: &dyn PocVerifier,
    params: &ChainParams,
) -> Result<(), BlockError> {
    check_header_context(
        &block.header,
        parent,
        parent_bit_length,
        recent_timestamps,
        effective_ban_list,
        slot,
        verifier,
        params,
    )?;
    check_header_signature(&block.header)?;

    let coinbase = &block.transactions[0];
    let payload = &coinbase.tx_ins[0].signature_script;
    if payload.len() < 8 {
        return Err(BlockError::Header(HeaderError::BadBlockHeight));
    }
    let mut height_bytes = [0u8; 8];
    height_bytes.copy_from_slice(&payload[..8]);
    if u64::from_le_bytes(height_bytes) != block.header.height {
        return Err(BlockError::BadCoinbaseHeight);
    }

    Ok(())
}

/// Full connect-time check (4.F): sanity + context + per-tx contextual input
/// checks + subsidy/fee conservation, mirroring
/// `Blockchain::validate_block`'s end-to-end shape.
#[allow(clippy::too_many_arguments)]
pub fn check_connect_block(
    block: &Block,
    parent: &BlockHeader,
    parent_bit_length: Option<u8>,
    recent_timestamps: &[i64],
    effective_ban_list: &[Vec<u8>],
    slot: u64,
    verifier: &dyn PocVerifier,
    params: &ChainParams,
    now: i64,
    store: &mut dyn TxStore,
    witness_verifier: &WitnessVerifier,
) -> Result<(), BlockError> {
    if block.header.height == 0 {
        return Err(BlockError::ConnectGenesis);
    }

    check_block_sanity(block, params, now)?;
    check_block_context(
        block,
        parent,
        parent_bit_length,
        recent_timestamps,
        effective_ban_list,
        slot,
        verifier,
        params,
    )?;

    // Duplicate-tx overwrite rule (4.F): a tx hash already confirmed
    // elsewhere on this chain may only reappear once every one of its
    // outputs is fully spent.
    for tx in &block.transactions {
        let hash = tx.tx_hash();
        if let Some(prior) = store.get(&hash) {
            if prior.spent.iter().any(|spent| !spent) {
                return Err(BlockError::Tx(TxError::OverwriteTx));
            }
        }
    }

    check_connect_time_sig_ops(block, &*store, params)?;

    let median_time_past = crate::header::median_time(recent_timestamps);

    let mut total_fees: u128 = 0;
    for tx in &block.transactions {
        check_tx_finality(tx, block.header.height, median_time_past)?;
    }
    for tx in &block.transactions[1..] {
        check_tx_witnesses(tx, &*store, witness_verifier)?;
        let fee = check_tx_inputs(
            tx,
            block.header.height,
            median_time_past,
            params.coinbase_maturity,
            params.transaction_maturity,
            store,
        )?;
        total_fees += fee.0 as u128;
        if total_fees > crate::amount::MAX_AMOUNT as u128 {
            return Err(BlockError::BadFees);
        }
    }

    let coinbase = &block.transactions[0];
    let holder = hash160_as_hash(&crate::codec::hash160(&block.header.pubkey));
    let binding_in = binding_input_total(coinbase, holder, block.header.height, params.transaction_maturity, store)?;
    let has_binding = params
        .binding_required
        .get(&block.header.proof.bit_length)
        .is_some_and(|required| binding_in >= *required as u128);

    let split = calc_block_subsidy(block.header.height, block.header.proof.bit_length, has_binding, params);
    let allowed = split.miner.0 as u128 + split.pool.0 as u128 + split.senate.0 as u128 + total_fees;

    let coinbase_total = coinbase.total_out().map_err(BlockError::Tx)?;
    if coinbase_total.0 as u128 > allowed {
        return Err(BlockError::BadCoinbaseValue);
    }

    if block.header.height == params.genesis.init_height {
        check_genesis_allocations(coinbase, &params.genesis)?;
    }

    Ok(())
}

/// Verifies every input's witness stack against the script it spends (4.F
/// "Run witness verification on every non-coinbase input"). One sighash per
/// transaction, taken over its non-witness encoding (§6's plain/packet
/// split already excludes witness data from `tx_hash`), so every input of a
/// multi-input transaction signs the same commitment — equivalent to
/// SIGHASH_ALL and not configurable per input, a deliberate simplification
/// over the richer sighash-flag scheme named in the teacher's `SigHashType`.
fn check_tx_witnesses(tx: &MsgTx, store: &dyn TxStore, witness_verifier: &WitnessVerifier) -> Result<(), BlockError> {
    let sighash = tx.tx_hash();
    for input in &tx.tx_ins {
        let op = input.previous_out_point;
        let entry = store.get(&op.tx_hash).ok_or(BlockError::Tx(TxError::MissingTx))?;
        let out = entry.tx.tx_outs.get(op.index as usize).ok_or(BlockError::Tx(TxError::MissingTx))?;
        let variant = classify(&out.pk_script);
        verify_witness(witness_verifier, &variant, &input.witness, sighash).map_err(BlockError::Tx)?;
    }
    Ok(())
}

/// Recounts sig-ops (4.F "recount sig-ops including input-side script-hash
/// pushes") against the resolved previous outputs, in addition to the
/// output-side count `check_block_sanity` already took context-free. A
/// script-hash input can carry its own sig-op cost that the sanity pass,
/// which only ever sees the block's own output scripts, cannot see.
fn check_connect_time_sig_ops(block: &Block, store: &dyn TxStore, params: &ChainParams) -> Result<(), BlockError> {
    let mut sig_ops: u64 = block
        .transactions
        .iter()
        .flat_map(|tx| tx.tx_outs.iter())
        .map(|out| count_sig_ops(&classify(&out.pk_script)))
        .sum();

    for tx in &block.transactions[1..] {
        for input in &tx.tx_ins {
            let op = input.previous_out_point;
            let entry = store.get(&op.tx_hash).ok_or(BlockError::Tx(TxError::MissingTx))?;
            let out = entry.tx.tx_outs.get(op.index as usize).ok_or(BlockError::Tx(TxError::MissingTx))?;
            sig_ops += count_sig_ops(&classify(&out.pk_script));
        }
    }

    if sig_ops > params.max_sig_ops_per_block() {
        return Err(BlockError::TooManySigOps);
    }
    Ok(())
}

/// At `init_height`, the coinbase must carry every outstanding
/// genesis-allocation output bytewise: matching `pk_script` and exact
/// `value`, per 4.F (the one-time distribution baked into the genesis doc).
fn check_genesis_allocations(
    coinbase: &MsgTx,
    genesis: &crate::config::GenesisDoc,
) -> Result<(), BlockError> {
    for alloc in &genesis.allocations {
        let present = coinbase
            .tx_outs
            .iter()
            .any(|out| out.value.0 == alloc.value && out.pk_script == alloc.pk_script);
        if !present {
            return Err(BlockError::BadCoinbaseValue);
        }
    }
    Ok(())
}

/// Sums the binding-committed value spent into this coinbase's inputs
/// 2..N, per 4.F/4.G: a non-coinbase, non-coinbase-own binding output
/// addressed to the miner's own pubkey-hash counts toward `binding_in`; a
/// pooling output is allowed but contributes nothing; anything else is a
/// consensus violation.
fn binding_input_total(
    coinbase: &MsgTx,
    holder: crate::codec::Hash,
    height: u64,
    transaction_maturity: u64,
    store: &dyn TxStore,
) -> Result<u128, BlockError> {
    let mut total: u128 = 0;
    for input in &coinbase.tx_ins[1..] {
        let op = input.previous_out_point;
        let entry = store.get(&op.tx_hash).ok_or(BlockError::Tx(TxError::MissingTx))?;
        let out = entry
            .tx
            .tx_outs
            .get(op.index as usize)
            .ok_or(BlockError::Tx(TxError::MissingTx))?;

        if !entry.is_coinbase && height < entry.block_height.saturating_add(transaction_maturity) {
            return Err(BlockError::Tx(TxError::ImmatureSpend));
        }

        match classify(&out.pk_script) {
            ScriptVariant::BindingScriptHash { holder: h, .. } if h == holder => {
                total += out.value.0 as u128;
            }
            ScriptVariant::PoolingScriptHash { .. } => {}
            _ => return Err(BlockError::Tx(TxError::BindingPubKey)),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::codec::Hash;
    use crate::header::Proof;
    use crate::transaction::{OutPoint, TxIn, TxOut};
    use num_bigint::BigUint;
    use std::collections::HashMap;

    struct EmptyStore;
    impl TxStore for EmptyStore {
        fn get(&self, _hash: &Hash) -> Option<&crate::transaction::TxEntry> {
            None
        }
        fn mark_spent(&mut self, _hash: &Hash, _index: u32) {}
    }

    struct AlwaysPass;
    impl PocVerifier for AlwaysPass {
        fn quality(&self, _h: &BlockHeader, _slot: u64) -> Result<BigUint, crate::error::HeaderError> {
            Ok(BigUint::from(u64::MAX))
        }
    }

    fn coinbase_tx(height: u64, reward: u64) -> MsgTx {
        let mut script = height.to_le_bytes().to_vec();
        script.extend_from_slice(b"extra-nonce");
        MsgTx {
            version: 1,
            tx_ins: vec![TxIn {
                previous_out_point: OutPoint::coinbase(),
                signature_script: script,
                sequence: u32::MAX,
                witness: vec![],
            }],
            tx_outs: vec![TxOut {
                value: Amount(reward),
                pk_script: vec![0x76, 0xa9, 0x14],
            }],
            lock_time: 0,
        }
    }

    /// A self-consistent height-0 header, used as the fixed parent every
    /// other fixture in this module chains from.
    fn genesis_header() -> BlockHeader {
        BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height: 0,
            timestamp: 1_000,
            previous: Hash::zero(),
            transaction_root: Hash([9u8; 32]),
            witness_root: Hash([9u8; 32]),
            proposal_root: Hash([9u8; 32]),
            target: vec![0x7f, 0xff, 0xff],
            challenge: Hash([7u8; 32]),
            pubkey: vec![0x02; 33],
            proof: Proof {
                x: vec![0x01],
                x_prime: vec![0x02],
                bit_length: 99,
            },
            signature: vec![],
            ban_list: vec![],
        }
    }

    /// Builds a block extending `parent` whose target/challenge agree with
    /// `header::calc_next_target`/`calc_next_challenge`, so contextual checks
    /// pass unless a test deliberately breaks something else.
    fn chained_block(parent: &BlockHeader, reward: u64) -> Block {
        let params = ChainParams::default();
        let coinbase = coinbase_tx(parent.height + 1, reward);
        let timestamp = parent.timestamp + params.poc_slot_seconds as i64 + 1;
        let header = BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height: parent.height + 1,
            timestamp,
            previous: parent.block_hash(),
            transaction_root: merkle_root(&[coinbase.tx_hash()]),
            witness_root: merkle_root(&[coinbase.tx_hash_witness()]),
            proposal_root: ProposalArea::default().root(),
            target: crate::header::calc_next_target(parent, timestamp, &params).to_bytes_be(),
            challenge: crate::header::calc_next_challenge(parent),
            pubkey: parent.pubkey.clone(),
            proof: Proof {
                x: vec![0x01],
                x_prime: vec![0x02],
                bit_length: 99,
            },
            signature: vec![],
            ban_list: vec![],
        };
        Block {
            header,
            proposal_area: ProposalArea::default(),
            transactions: vec![coinbase],
        }
    }

    fn sample_block(height: u64, reward: u64) -> Block {
        let mut parent = genesis_header();
        parent.height = height - 1;
        chained_block(&parent, reward)
    }

    #[test]
    fn sanity_requires_coinbase_first() {
        let params = ChainParams::default();
        let mut block = sample_block(1, 100);
        block.transactions.clear();
        let err = check_block_sanity(&block, &params, 10_000).unwrap_err();
        assert_eq!(err, BlockError::Tx(TxError::NoTxInputs));
    }

    #[test]
    fn sanity_accepts_well_formed_block() {
        let params = ChainParams::default();
        let block = sample_block(1, 100);
        assert!(check_block_sanity(&block, &params, 10_000).is_ok());
    }

    #[test]
    fn sanity_rejects_mismatched_merkle_root() {
        let params = ChainParams::default();
        let mut block = sample_block(1, 100);
        block.header.transaction_root = Hash([9u8; 32]);
        assert_eq!(
            check_block_sanity(&block, &params, 10_000),
            Err(BlockError::InvalidMerkleRoot)
        );
    }

    #[test]
    fn connect_rejects_genesis_reconnection() {
        let params = ChainParams::default();
        let genesis = genesis_header();
        let coinbase = coinbase_tx(0, 100);
        let mut header = genesis.clone();
        header.transaction_root = merkle_root(&[coinbase.tx_hash()]);
        header.witness_root = merkle_root(&[coinbase.tx_hash_witness()]);
        header.proposal_root = ProposalArea::default().root();
        let block = Block { header, proposal_area: ProposalArea::default(), transactions: vec![coinbase] };
        let parent = block.header.clone();
        let mut store = EmptyStore;
        let verifier = WitnessVerifier::new(8);
        let err = check_connect_block(
            &block, &parent, None, &[2_000], &[], 0, &AlwaysPass, &params, 10_000, &mut store, &verifier,
        )
        .unwrap_err();
        assert_eq!(err, BlockError::ConnectGenesis);
    }

    #[test]
    fn connect_rejects_coinbase_overpay() {
        let params = ChainParams::default();
        let parent = genesis_header();
        let block = chained_block(&parent, u64::MAX / 2);
        let mut store = EmptyStore;
        let verifier = WitnessVerifier::new(8);
        let err = check_connect_block(
            &block, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params, 10_000, &mut store, &verifier,
        )
        .unwrap_err();
        assert_eq!(err, BlockError::BadCoinbaseValue);
    }

    #[test]
    fn connect_requires_genesis_allocation_output_at_init_height() {
        let mut params = ChainParams::default();
        params.genesis.init_height = 1;
        params.genesis.allocations = vec![crate::config::GenesisAllocation {
            value: 500,
            pk_script: vec![0xde, 0xad],
        }];

        let parent = genesis_header();
        let mut block = chained_block(&parent, 100);

        let verifier = WitnessVerifier::new(8);
        let mut store = EmptyStore;
        let err = check_connect_block(
            &block, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params, 10_000, &mut store, &verifier,
        )
        .unwrap_err();
        assert_eq!(err, BlockError::BadCoinbaseValue);

        block.transactions[0].tx_outs.push(TxOut { value: Amount(500), pk_script: vec![0xde, 0xad] });
        block.header.transaction_root = merkle_root(&[block.transactions[0].tx_hash()]);
        block.header.witness_root = merkle_root(&[block.transactions[0].tx_hash_witness()]);

        let mut store = EmptyStore;
        assert!(check_connect_block(
            &block, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params, 10_000, &mut store, &verifier,
        )
        .is_ok());
    }
}
