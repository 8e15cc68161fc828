//! Output script classification and witness verification (component C).
//!
//! The closed-variant shape is grounded in the teacher's `core::script::ScriptType`
//! (`P2PKH`/`P2SH`/`MultiSig`/`TimeLock`/...), generalized here to the chain's
//! own closed variant set (`PubKeyHash`/`ScriptHash`/`MultiSig`/
//! `StakingScriptHash`/`BindingScriptHash`/`PoolingScriptHash`/`NullData`/
//! `NonStandard`) rather than the teacher's SegWit-flavored one, per the
//! "closed tagged-variant, no open polymorphism" design note. Signature
//! verification is grounded in `crypto::keys::verify_signature`, generalized
//! from compact-form to DER (§6 wire format) with an `lru`-bounded cache.

use crate::codec::{hash160, Hash};
use crate::error::TxError;
use lru::LruCache;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Opcode bytes recognized by the classifier. Only what §4.C names is
/// represented; anything else falls through to `NonStandard`.
mod op {
    pub const DUP: u8 = 0x76;
    pub const HASH160: u8 = 0xa9;
    pub const EQUALVERIFY: u8 = 0x88;
    pub const CHECKSIG: u8 = 0xac;
    pub const EQUAL: u8 = 0x87;
    pub const CHECKMULTISIG: u8 = 0xae;
    pub const RETURN: u8 = 0x6a;
    pub const STAKING: u8 = 0xe8;
    pub const BINDING: u8 = 0xe9;
    pub const POOLING: u8 = 0xea;
    pub const PUSH20: u8 = 0x14;
}

/// The complete, closed set of recognized output script shapes (4.C).
/// Every branch of consensus logic matches all eight variants explicitly;
/// adding a ninth is a breaking change by design, not an open extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVariant {
    PubKeyHash(Hash),
    ScriptHash(Hash),
    MultiSig { threshold: u8, pubkeys: Vec<Vec<u8>> },
    StakingScriptHash { hash: Hash, frozen_period: u32 },
    BindingScriptHash { hash: Hash, holder: Hash },
    PoolingScriptHash { hash: Hash, pool_id: Hash },
    NullData(Vec<u8>),
    NonStandard,
}

fn hash20_from(bytes: &[u8]) -> Option<Hash> {
    if bytes.len() != 20 {
        return None;
    }
    let mut buf = [0u8; 32];
    buf[..20].copy_from_slice(bytes);
    Some(Hash(buf))
}

/// Embeds a raw 20-byte hash160 into the same zero-padded `Hash` shape
/// `classify` uses for script-hash variants, so a miner's pubkey hash can be
/// compared directly against a parsed `BindingScriptHash`/`PoolingScriptHash`.
pub fn hash160_as_hash(hash160: &[u8; 20]) -> Hash {
    let mut buf = [0u8; 32];
    buf[..20].copy_from_slice(hash160);
    Hash(buf)
}

/// Classifies a raw output script by its opcode shape. Pure function of the
/// bytes; never consults chain state.
pub fn classify(script: &[u8]) -> ScriptVariant {
    if script.is_empty() {
        return ScriptVariant::NonStandard;
    }

    // OP_RETURN <data>
    if script[0] == op::RETURN {
        return ScriptVariant::NullData(script[1..].to_vec());
    }

    // OP_DUP OP_HASH160 <20> <hash160> OP_EQUALVERIFY OP_CHECKSIG
    if script.len() == 25
        && script[0] == op::DUP
        && script[1] == op::HASH160
        && script[2] == op::PUSH20
        && script[23] == op::EQUALVERIFY
        && script[24] == op::CHECKSIG
    {
        if let Some(h) = hash20_from(&script[3..23]) {
            return ScriptVariant::PubKeyHash(h);
        }
    }

    // OP_HASH160 <20> <hash160> OP_EQUAL
    if script.len() == 23 && script[0] == op::HASH160 && script[1] == op::PUSH20 && script[22] == op::EQUAL {
        if let Some(h) = hash20_from(&script[2..22]) {
            return ScriptVariant::ScriptHash(h);
        }
    }

    // OP_STAKING <20> <hash160> <4-byte frozen period LE> OP_HASH160 ... OP_EQUAL
    if script.len() == 29 && script[0] == op::STAKING && script[1] == op::PUSH20 {
        if let Some(h) = hash20_from(&script[2..22]) {
            let mut period_bytes = [0u8; 4];
            period_bytes.copy_from_slice(&script[22..26]);
            if script[26] == op::HASH160 && script[27] == op::EQUAL {
                return ScriptVariant::StakingScriptHash {
                    hash: h,
                    frozen_period: u32::from_le_bytes(period_bytes),
                };
            }
        }
    }

    // OP_BINDING <20> <hash160> <32-byte holder> OP_HASH160 OP_EQUAL
    if script.len() == 55 && script[0] == op::BINDING && script[1] == op::PUSH20 {
        if let Some(h) = hash20_from(&script[2..22]) {
            let mut holder = [0u8; 32];
            holder.copy_from_slice(&script[22..54]);
            if script[54] == op::EQUAL {
                return ScriptVariant::BindingScriptHash {
                    hash: h,
                    holder: Hash(holder),
                };
            }
        }
    }

    // OP_POOLING <20> <hash160> <32-byte pool id> OP_EQUAL
    if script.len() == 55 && script[0] == op::POOLING && script[1] == op::PUSH20 {
        if let Some(h) = hash20_from(&script[2..22]) {
            let mut pool_id = [0u8; 32];
            pool_id.copy_from_slice(&script[22..54]);
            if script[54] == op::EQUAL {
                return ScriptVariant::PoolingScriptHash {
                    hash: h,
                    pool_id: Hash(pool_id),
                };
            }
        }
    }

    // <threshold> <pubkey>... <count> OP_CHECKMULTISIG
    if script.len() >= 3 && script[script.len() - 1] == op::CHECKMULTISIG {
        if let Some(parsed) = parse_multisig(script) {
            return parsed;
        }
    }

    ScriptVariant::NonStandard
}

fn parse_multisig(script: &[u8]) -> Option<ScriptVariant> {
    let threshold = script[0];
    let count = script[script.len() - 2];
    if count == 0 || count > 20 || threshold == 0 || threshold > count {
        return None;
    }
    let mut pubkeys = Vec::with_capacity(count as usize);
    let mut cursor = 1usize;
    for _ in 0..count {
        if cursor >= script.len() {
            return None;
        }
        let len = script[cursor] as usize;
        cursor += 1;
        if cursor + len > script.len() {
            return None;
        }
        pubkeys.push(script[cursor..cursor + len].to_vec());
        cursor += len;
    }
    if cursor + 2 != script.len() {
        return None;
    }
    Some(ScriptVariant::MultiSig { threshold, pubkeys })
}

/// Addresses (hash160 values) an output script pays to, for wallet/index
/// lookups. `NullData`/`NonStandard`/bare multisig have none.
pub fn extract_addrs(variant: &ScriptVariant) -> Vec<Hash> {
    match variant {
        ScriptVariant::PubKeyHash(h) => vec![*h],
        ScriptVariant::ScriptHash(h) => vec![*h],
        ScriptVariant::StakingScriptHash { hash, .. } => vec![*hash],
        ScriptVariant::BindingScriptHash { hash, .. } => vec![*hash],
        ScriptVariant::PoolingScriptHash { hash, .. } => vec![*hash],
        ScriptVariant::MultiSig { pubkeys, .. } => pubkeys.iter().map(|pk| hash160(pk)).collect(),
        ScriptVariant::NullData(_) | ScriptVariant::NonStandard => Vec::new(),
    }
}

/// Signature operation count used for the per-block sig-op cap (4.F). Bare
/// `CHECKSIG`/`CHECKSIGVERIFY` count 1; multisig counts its declared pubkey
/// total, matching the teacher's conservative (non-executing) counting rule.
pub fn count_sig_ops(variant: &ScriptVariant) -> u64 {
    match variant {
        ScriptVariant::PubKeyHash(_) => 1,
        ScriptVariant::ScriptHash(_) => 1,
        ScriptVariant::StakingScriptHash { .. } => 1,
        ScriptVariant::BindingScriptHash { .. } => 1,
        ScriptVariant::PoolingScriptHash { .. } => 1,
        ScriptVariant::MultiSig { pubkeys, .. } => pubkeys.len() as u64,
        ScriptVariant::NullData(_) | ScriptVariant::NonStandard => 0,
    }
}

/// `(signature DER bytes, pubkey bytes, sighash)` verification result cache.
/// A block full of transactions re-verifies the same signature at most once;
/// grounded in the teacher's LRU-eviction pattern (`storage::utxo_cache`),
/// generalized from UTXO entries to verification outcomes.
pub struct WitnessVerifier {
    cache: Mutex<LruCache<(Vec<u8>, Vec<u8>, Hash), bool>>,
    secp: Secp256k1<secp256k1::VerifyOnly>,
}

impl WitnessVerifier {
    pub fn new(capacity: usize) -> Self {
        WitnessVerifier {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1"),
            )),
            secp: Secp256k1::verification_only(),
        }
    }

    /// Verifies a DER-encoded ECDSA signature against a 33-byte compressed
    /// pubkey and a sighash. Returns `TxError::BadTxInput` on malformed
    /// signature/pubkey bytes, distinct from a cleanly-failed verification
    /// (which returns `Ok(false)`).
    pub fn verify(&self, sig_der: &[u8], pubkey: &[u8], sighash: Hash) -> Result<bool, TxError> {
        let key = (sig_der.to_vec(), pubkey.to_vec(), sighash);
        if let Some(hit) = self.cache.lock().expect("lru cache mutex poisoned").get(&key) {
            return Ok(*hit);
        }

        let sig = Signature::from_der(sig_der).map_err(|_| TxError::BadTxInput)?;
        let pk = PublicKey::from_slice(pubkey).map_err(|_| TxError::BadTxInput)?;
        let msg = Message::from_digest(sighash.0);
        let ok = self.secp.verify_ecdsa(&msg, &sig, &pk).is_ok();

        self.cache.lock().expect("lru cache mutex poisoned").put(key, ok);
        Ok(ok)
    }
}

/// Verifies a spend's witness stack against the script it unlocks (4.C
/// `verify_witness(tx, input-index, prev-script, flags)`), dispatched by the
/// prev output's closed variant rather than by executing opcodes. Every
/// script-hash-keyed variant shares the same redeem-script unlocking shape:
/// a MultiSig covenant so the staking/binding/pooling lock parameters are
/// just extra commitments layered on top of the same P2SH-style spend.
pub fn verify_witness(
    verifier: &WitnessVerifier,
    prev_variant: &ScriptVariant,
    witness: &[Vec<u8>],
    sighash: Hash,
) -> Result<(), TxError> {
    match prev_variant {
        ScriptVariant::PubKeyHash(hash) => verify_p2pkh(verifier, hash, witness, sighash),
        ScriptVariant::ScriptHash(hash)
        | ScriptVariant::StakingScriptHash { hash, .. }
        | ScriptVariant::BindingScriptHash { hash, .. }
        | ScriptVariant::PoolingScriptHash { hash, .. } => verify_redeem_script(verifier, hash, witness, sighash),
        ScriptVariant::MultiSig { threshold, pubkeys } => verify_multisig(verifier, *threshold, pubkeys, witness, sighash),
        ScriptVariant::NullData(_) | ScriptVariant::NonStandard => Err(TxError::BadTxInput),
    }
}

fn verify_p2pkh(verifier: &WitnessVerifier, hash: &Hash, witness: &[Vec<u8>], sighash: Hash) -> Result<(), TxError> {
    let [sig, pubkey] = witness else {
        return Err(TxError::BadTxInput);
    };
    if hash160_as_hash(&hash160(pubkey)) != *hash {
        return Err(TxError::BadTxInput);
    }
    if verifier.verify(sig, pubkey, sighash)? {
        Ok(())
    } else {
        Err(TxError::BadTxInput)
    }
}

/// P2SH-style spend: the last witness item is the serialized redeem script,
/// which must hash160 to the locked `hash`; the remainder are signatures
/// checked against the redeem script's own classification (bare `MultiSig`
/// or a lone pubkey-hash covenant).
fn verify_redeem_script(verifier: &WitnessVerifier, hash: &Hash, witness: &[Vec<u8>], sighash: Hash) -> Result<(), TxError> {
    let (sigs, redeem_script) = witness.split_at(witness.len().saturating_sub(1));
    let [redeem_script] = redeem_script else {
        return Err(TxError::BadTxInput);
    };
    if hash160_as_hash(&hash160(redeem_script)) != *hash {
        return Err(TxError::BadTxInput);
    }
    match classify(redeem_script) {
        ScriptVariant::MultiSig { threshold, pubkeys } => verify_multisig(verifier, threshold, &pubkeys, sigs, sighash),
        ScriptVariant::PubKeyHash(redeem_hash) => verify_p2pkh(verifier, &redeem_hash, sigs, sighash),
        _ => Err(TxError::BadTxInput),
    }
}

/// At least `threshold` of `sigs` must each verify against a distinct
/// `pubkeys` entry, checked in order (so a single signature can't be counted
/// twice against two different pubkeys it happens to verify against).
fn verify_multisig(
    verifier: &WitnessVerifier,
    threshold: u8,
    pubkeys: &[Vec<u8>],
    sigs: &[Vec<u8>],
    sighash: Hash,
) -> Result<(), TxError> {
    let mut matched = 0u8;
    let mut next_pubkey = 0usize;
    for sig in sigs {
        while next_pubkey < pubkeys.len() {
            let pubkey = &pubkeys[next_pubkey];
            next_pubkey += 1;
            if verifier.verify(sig, pubkey, sighash)? {
                matched += 1;
                break;
            }
        }
    }
    if matched >= threshold {
        Ok(())
    } else {
        Err(TxError::BadTxInput)
    }
}
