//! Consensus parameters and genesis document (component K, ambient).
//!
//! Grounded in the teacher's `NetworkParams` (Aevum-Bond
//! `bond-core/src/blockchain.rs`) and `MinerConfig`/`StorageConfig` pattern: a
//! plain struct with a `Default` impl for the shipped constants, constructed
//! once and threaded explicitly rather than reached for through statics —
//! per the "no global mutable state" design note (§9).

use crate::codec::Hash;
use num_bigint::BigUint;
use std::collections::HashMap;

/// Seconds a header's timestamp may sit ahead of wall-clock time before
/// `TimeTooNew` fires. Pinned by the boundary test in §8 ("now + 3s accepted,
/// now + 3.001s rejected").
pub const MAX_TIMESTAMP_DRIFT_SECONDS: i64 = 3;

/// Looser, non-consensus time-sync bound carried from the source for
/// completeness (peer clock sanity is out of scope here).
pub const MAX_TIME_OFFSET_SECONDS: i64 = 7200;

pub const MEDIAN_TIME_BLOCKS: usize = 11;

pub const MAX_PREV_OUT_INDEX: u32 = u32::MAX;

pub const MIN_BLOCK_VERSION: u32 = 1;

pub const COINBASE_SUBSIDY_ATTENUATION: u64 = 9375;
pub const SUBSIDY_DENOMINATOR: u64 = 10_000;

/// Outstanding genesis-allocation output, matched bytewise against the
/// coinbase at `init_height`.
#[derive(Debug, Clone)]
pub struct GenesisAllocation {
    pub value: u64,
    pub pk_script: Vec<u8>,
}

/// Fixed genesis tuple, per §6 / §9. Values below mirror the shipped
/// `config.genesisHeader` / `genesisCoinbaseTx` layout from the original
/// chain's `config/genesis.go`; the exact header/proof/signature bytes are
/// placeholders suitable for tests, not the production constants (those are
/// injected by the embedding application via `ChainParams::with_genesis`).
#[derive(Debug, Clone)]
pub struct GenesisDoc {
    pub init_height: u64,
    pub allocations: Vec<GenesisAllocation>,
    /// MD5 digest (seeded with a fixed prefix) of the allocation list,
    /// checked for integrity — not a security boundary (§9 Open Question b).
    pub doc_hash: Vec<u8>,
}

impl GenesisDoc {
    /// MD5("sukhavati" ‖ Σ pk_script ‖ value_be) over the allocation list,
    /// reproducing `GenesisDoc.IsHashEqual` from the original source.
    pub fn compute_hash(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for alloc in &self.allocations {
            data.extend_from_slice(&alloc.pk_script);
            data.extend_from_slice(&alloc.value.to_be_bytes());
        }
        let mut ctx = md5::Context::new();
        ctx.consume(b"sukhavati");
        ctx.consume(&data);
        ctx.compute().to_vec()
    }

    pub fn verify(&self) -> bool {
        self.compute_hash() == self.doc_hash
    }
}

impl Default for GenesisDoc {
    fn default() -> Self {
        GenesisDoc {
            init_height: 1,
            allocations: Vec::new(),
            doc_hash: Vec::new(),
        }
    }
}

/// Every consensus constant a conforming implementation must match (§6),
/// plus the genesis tuple. Constructed once at process startup and passed
/// explicitly into `Blockchain`/`Store` constructors.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub chain_id: Hash,
    pub poc_slot_seconds: u64,
    pub coinbase_maturity: u64,
    pub transaction_maturity: u64,
    pub subsidy_halving_interval: u64,
    pub base_subsidy: u64,
    pub min_halved_subsidy: u64,
    pub max_block_payload: u64,
    pub max_tx_per_block: u64,
    pub max_pubkeys_per_multisig: u64,
    pub staking_tx_reward_start: u64,
    pub max_staking_reward_num: u64,
    /// PoC plot bit-length → minimum binding-stake base units required for
    /// `has_binding` to hold (4.G). Missing entries disable binding.
    pub binding_required: HashMap<u8, u64>,
    pub poc_limit: BigUint,
    pub genesis: GenesisDoc,
}

impl ChainParams {
    /// `MaxSigOpsPerBlock = floor(MaxBlockPayload/150) × MaxPubKeysPerMultiSig` (§6).
    pub fn max_sig_ops_per_block(&self) -> u64 {
        (self.max_block_payload / 150) * self.max_pubkeys_per_multisig
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        let mut binding_required = HashMap::new();
        // Larger plots require proportionally more bound capital; bit-length
        // is the PoC proof's advertised plot size exponent.
        binding_required.insert(24, 1_000 * 100_000_000);
        binding_required.insert(28, 3_000 * 100_000_000);
        binding_required.insert(32, 10_000 * 100_000_000);
        binding_required.insert(36, 30_000 * 100_000_000);

        ChainParams {
            chain_id: Hash::zero(),
            poc_slot_seconds: 3,
            coinbase_maturity: 128,
            transaction_maturity: 12,
            subsidy_halving_interval: 840_000,
            base_subsidy: 128 * 100_000_000,
            min_halved_subsidy: 1,
            max_block_payload: 1_000_000,
            max_tx_per_block: 10_000,
            max_pubkeys_per_multisig: 20,
            staking_tx_reward_start: 0,
            max_staking_reward_num: 10_000,
            binding_required,
            // The shipped network sets this to a specific floor; the default
            // here imposes none, leaving test/embedding fixtures free to use
            // small targets unless they opt into a real `poc_limit` (§8
            // boundary test exercises a non-zero limit explicitly).
            poc_limit: BigUint::from(0u32),
            genesis: GenesisDoc::default(),
        }
    }
}
