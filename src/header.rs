//! Block header and PoC quality checks (component E).
//!
//! Grounded in the teacher's `crypto::hash::{meets_difficulty,calculate_target}`
//! (PoW target comparison), generalized from a single hash-vs-target compare
//! to the PoC quality function over `(challenge, X, X', bitLength, pubkey_hash,
//! slot, height)` named in §4.E, and in `core::blockchain::adjust_difficulty`
//! for the retarget-clamp shape (generalized from a fixed ±1 step to the
//! chain's target-interval retarget named in §6).

use crate::codec::{sha256d, Hash};
use crate::config::{ChainParams, MAX_TIMESTAMP_DRIFT_SECONDS, MEDIAN_TIME_BLOCKS};
use crate::error::HeaderError;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub x: Vec<u8>,
    pub x_prime: Vec<u8>,
    pub bit_length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: Hash,
    pub version: u32,
    pub height: u64,
    pub timestamp: i64,
    pub previous: Hash,
    pub transaction_root: Hash,
    pub witness_root: Hash,
    pub proposal_root: Hash,
    /// Big-endian encoded PoC target; larger means easier, per §4.E.
    pub target: Vec<u8>,
    pub challenge: Hash,
    pub pubkey: Vec<u8>,
    pub proof: Proof,
    pub signature: Vec<u8>,
    /// Public keys banned as of this header, ordered and deduplicated.
    pub ban_list: Vec<Vec<u8>>,
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        sha256d(&self.serialize())
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.chain_id.0);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.previous.0);
        buf.extend_from_slice(&self.transaction_root.0);
        buf.extend_from_slice(&self.witness_root.0);
        buf.extend_from_slice(&self.proposal_root.0);
        crate::codec::write_varbytes(&mut buf, &self.target).expect("writing to Vec never fails");
        buf.extend_from_slice(&self.challenge.0);
        crate::codec::write_varbytes(&mut buf, &self.pubkey).expect("writing to Vec never fails");
        crate::codec::write_varbytes(&mut buf, &self.proof.x).expect("writing to Vec never fails");
        crate::codec::write_varbytes(&mut buf, &self.proof.x_prime).expect("writing to Vec never fails");
        buf.push(self.proof.bit_length);
        buf
    }

    pub(crate) fn target_value(&self) -> BigUint {
        BigUint::from_bytes_be(&self.target)
    }

    fn sighash(&self) -> Hash {
        self.block_hash()
    }
}

/// Derives the PoC quality value for this header, a monotone function of the
/// proof and the miner's public key that contextual checks compare against
/// `target`. The exact quality transform is an external PoC-engine concern
/// (§1 Non-goals); this crate treats it as a black box reachable through the
/// `PocVerifier` trait so header checks stay independent of plot-file format.
pub trait PocVerifier {
    /// Computes quality for `(challenge, proof, bit_length, pubkey_hash, slot, height)`.
    /// Larger is better; `Ok(quality) >= target` is the acceptance rule.
    fn quality(&self, header: &BlockHeader, slot: u64) -> Result<BigUint, HeaderError>;
}

/// Context-free header checks (4.E): no chain state, just the header's own
/// structural validity.
pub fn check_header_sanity(header: &BlockHeader, params: &ChainParams, now: i64) -> Result<(), HeaderError> {
    if header.chain_id != params.chain_id {
        return Err(HeaderError::ChainID);
    }
    if header.version < crate::config::MIN_BLOCK_VERSION {
        return Err(HeaderError::InvalidBlockVersion);
    }
    if header.timestamp <= 0 {
        return Err(HeaderError::InvalidTime);
    }
    if header.timestamp > now + MAX_TIMESTAMP_DRIFT_SECONDS {
        return Err(HeaderError::TimeTooNew);
    }

    let target_value = header.target_value();
    if target_value == BigUint::from(0u32) || target_value < params.poc_limit {
        return Err(HeaderError::UnexpectedDifficulty);
    }

    let mut seen = std::collections::HashSet::with_capacity(header.ban_list.len());
    for pk in &header.ban_list {
        if pk == &header.pubkey {
            return Err(HeaderError::BanSelfPk);
        }
        if !seen.insert(pk.clone()) {
            return Err(HeaderError::BanList);
        }
    }

    Ok(())
}

/// Verifies the header's self-signature over its own hash, using the
/// miner's advertised pubkey. DER-encoded, per §6.
pub fn check_header_signature(header: &BlockHeader) -> Result<(), HeaderError> {
    use secp256k1::ecdsa::Signature;
    use secp256k1::{Message, PublicKey, Secp256k1};

    let secp = Secp256k1::verification_only();
    let sig = Signature::from_der(&header.signature).map_err(|_| HeaderError::BlockSIG)?;
    let pk = PublicKey::from_slice(&header.pubkey).map_err(|_| HeaderError::BlockSIG)?;
    let msg = Message::from_digest(header.sighash().0);
    secp.verify_ecdsa(&msg, &sig, &pk).map_err(|_| HeaderError::BlockSIG)
}

/// Contextual header checks (4.E): requires the parent header, the effective
/// ban list derived from ancestry, recent timestamps for the median-time
/// rule, the consensus parameters needed to re-derive the retarget, and the
/// PoC quality verifier. Enforces both the median-time floor and the
/// independent "strictly newer PoC slot than the parent" rule
/// (`floor(timestamp/PoC_slot) > floor(prev.timestamp/PoC_slot)`); a header
/// can satisfy the median and still land in the parent's own slot.
#[allow(clippy::too_many_arguments)]
pub fn check_header_context(
    header: &BlockHeader,
    parent: &BlockHeader,
    parent_bit_length: Option<u8>,
    recent_timestamps: &[i64],
    effective_ban_list: &[Vec<u8>],
    slot: u64,
    verifier: &dyn PocVerifier,
    params: &ChainParams,
) -> Result<(), HeaderError> {
    if header.height != parent.height + 1 {
        return Err(HeaderError::BadBlockHeight);
    }

    if let Some(min_bit_length) = parent_bit_length {
        if header.proof.bit_length < min_bit_length {
            return Err(HeaderError::InvalidBitLength);
        }
    }

    if header.target_value() != calc_next_target(parent, header.timestamp, params) {
        return Err(HeaderError::UnexpectedDifficulty);
    }
    if header.challenge != calc_next_challenge(parent) {
        return Err(HeaderError::UnexpectedDifficulty);
    }

    let median = median_time(recent_timestamps);
    if header.timestamp <= median {
        return Err(HeaderError::TimeTooOld);
    }

    let poc_slot = params.poc_slot_seconds as i64;
    if header.timestamp / poc_slot <= parent.timestamp / poc_slot {
        return Err(HeaderError::TimeTooOld);
    }

    if effective_ban_list.iter().any(|pk| pk == &header.pubkey) {
        return Err(HeaderError::BannedPk);
    }

    let quality = verifier.quality(header, slot)?;
    if quality < header.target_value() {
        return Err(HeaderError::LowQuality);
    }

    Ok(())
}

/// Derives the next block's required target from the parent alone: a
/// per-block retarget using the realized gap since the parent's timestamp
/// against the intended one-slot cadence, clamped per `retarget` (4.E "target
/// matches `calc_next_target(prev, timestamp)`"). Wired into
/// `check_header_context`, which rejects any header whose `target` disagrees.
pub fn calc_next_target(parent: &BlockHeader, timestamp: i64, params: &ChainParams) -> BigUint {
    let intended = params.poc_slot_seconds as i64;
    let actual = (timestamp - parent.timestamp).max(1);
    retarget(&parent.target_value(), actual, intended, &params.poc_limit)
}

/// Derives the next block's challenge deterministically from the parent
/// header alone (4.E "challenge matches `calc_next_challenge(prev)`"):
/// `sha256d(prev.challenge ‖ prev.block_hash())`, so the challenge sequence
/// is an unbroken hash chain tied to ancestry and cannot be grinded
/// independently of the parent's own hash.
pub fn calc_next_challenge(parent: &BlockHeader) -> Hash {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&parent.challenge.0);
    buf.extend_from_slice(&parent.block_hash().0);
    sha256d(&buf)
}

/// Median of the last `MEDIAN_TIME_BLOCKS` timestamps (4.D/4.E finality rule).
/// Caller supplies exactly the trailing window; fewer than 11 entries are
/// accepted (early chain) and simply median the window given.
pub fn median_time(timestamps: &[i64]) -> i64 {
    let mut window: Vec<i64> = timestamps
        .iter()
        .rev()
        .take(MEDIAN_TIME_BLOCKS)
        .copied()
        .collect();
    window.sort_unstable();
    window[window.len() / 2]
}

/// Retargets the PoC `target` for the next block given the realized timespan
/// over the last retarget interval versus the intended one, clamped to a
/// quarter/quadruple band, mirroring the teacher's clamped-adjustment shape
/// generalized to big-integer targets. `poc_limit` is a floor, not a
/// ceiling — the easiest target the network ever permits (4.E, consistent
/// with `check_header_sanity`'s `target < poc_limit` rejection) — so the
/// retargeted value never drops below it.
pub fn retarget(previous_target: &BigUint, actual_timespan: i64, intended_timespan: i64, poc_limit: &BigUint) -> BigUint {
    let clamped = actual_timespan.clamp(intended_timespan / 4, intended_timespan * 4);
    let new_target = (previous_target * BigUint::from(clamped as u64)) / BigUint::from(intended_timespan as u64);
    new_target.max(poc_limit.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            chain_id: Hash::zero(),
            version: 1,
            height: 5,
            timestamp: 1_000,
            previous: Hash([1u8; 32]),
            transaction_root: Hash([2u8; 32]),
            witness_root: Hash([2u8; 32]),
            proposal_root: Hash([3u8; 32]),
            target: vec![0x01, 0x00],
            challenge: Hash([4u8; 32]),
            pubkey: vec![0x02; 33],
            proof: Proof {
                x: vec![0xaa],
                x_prime: vec![0xbb],
                bit_length: 28,
            },
            signature: vec![],
            ban_list: vec![],
        }
    }

    #[test]
    fn sanity_rejects_future_timestamp() {
        let params = ChainParams::default();
        let header = sample_header();
        assert!(check_header_sanity(&header, &params, 1_000 - MAX_TIMESTAMP_DRIFT_SECONDS).is_ok());

        let future = sample_header();
        let err = check_header_sanity(&future, &params, 1_000 - MAX_TIMESTAMP_DRIFT_SECONDS - 1).unwrap_err();
        assert_eq!(err, HeaderError::TimeTooNew);
    }

    #[test]
    fn sanity_rejects_self_ban() {
        let params = ChainParams::default();
        let mut header = sample_header();
        header.ban_list.push(header.pubkey.clone());
        assert_eq!(check_header_sanity(&header, &params, 10_000), Err(HeaderError::BanSelfPk));
    }

    #[test]
    fn sanity_rejects_duplicate_ban_entries() {
        let params = ChainParams::default();
        let mut header = sample_header();
        header.ban_list.push(vec![0x09; 33]);
        header.ban_list.push(vec![0x09; 33]);
        assert_eq!(check_header_sanity(&header, &params, 10_000), Err(HeaderError::BanList));
    }

    #[test]
    fn median_time_is_middle_of_sorted_window() {
        let ts = vec![5, 1, 3, 2, 4];
        assert_eq!(median_time(&ts), 3);
    }

    #[test]
    fn bad_height_rejected() {
        struct AlwaysPass;
        impl PocVerifier for AlwaysPass {
            fn quality(&self, _h: &BlockHeader, _slot: u64) -> Result<BigUint, HeaderError> {
                Ok(BigUint::from(u64::MAX))
            }
        }
        let params = ChainParams::default();
        let parent = sample_header();
        let mut child = sample_header();
        child.height = parent.height + 2;
        let err = check_header_context(&child, &parent, None, &[1, 2, 3], &[], 0, &AlwaysPass, &params).unwrap_err();
        assert_eq!(err, HeaderError::BadBlockHeight);
    }

    #[test]
    fn context_rejects_target_not_matching_retarget() {
        struct AlwaysPass;
        impl PocVerifier for AlwaysPass {
            fn quality(&self, _h: &BlockHeader, _slot: u64) -> Result<BigUint, HeaderError> {
                Ok(BigUint::from(u64::MAX))
            }
        }
        let params = ChainParams::default();
        let parent = sample_header();
        let mut child = sample_header();
        child.height = parent.height + 1;
        child.timestamp = parent.timestamp + params.poc_slot_seconds as i64 + 1;
        child.challenge = calc_next_challenge(&parent);
        child.target = vec![0xff, 0xff, 0xff, 0xff];
        let err = check_header_context(&child, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params).unwrap_err();
        assert_eq!(err, HeaderError::UnexpectedDifficulty);
    }

    #[test]
    fn context_rejects_challenge_not_chained_to_parent() {
        struct AlwaysPass;
        impl PocVerifier for AlwaysPass {
            fn quality(&self, _h: &BlockHeader, _slot: u64) -> Result<BigUint, HeaderError> {
                Ok(BigUint::from(u64::MAX))
            }
        }
        let params = ChainParams::default();
        let parent = sample_header();
        let mut child = sample_header();
        child.height = parent.height + 1;
        child.timestamp = parent.timestamp + params.poc_slot_seconds as i64 + 1;
        child.target = calc_next_target(&parent, child.timestamp, &params).to_bytes_be();
        child.challenge = Hash([0x55; 32]);
        let err = check_header_context(&child, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params).unwrap_err();
        assert_eq!(err, HeaderError::UnexpectedDifficulty);
    }

    #[test]
    fn context_accepts_correctly_retargeted_child() {
        struct AlwaysPass;
        impl PocVerifier for AlwaysPass {
            fn quality(&self, _h: &BlockHeader, _slot: u64) -> Result<BigUint, HeaderError> {
                Ok(BigUint::from(u64::MAX))
            }
        }
        let params = ChainParams::default();
        let parent = sample_header();
        let mut child = sample_header();
        child.height = parent.height + 1;
        child.timestamp = parent.timestamp + params.poc_slot_seconds as i64 + 1;
        child.target = calc_next_target(&parent, child.timestamp, &params).to_bytes_be();
        child.challenge = calc_next_challenge(&parent);
        assert!(check_header_context(&child, &parent, None, &[parent.timestamp], &[], 0, &AlwaysPass, &params).is_ok());
    }

    #[test]
    fn sanity_enforces_target_floor_at_poc_limit() {
        let mut params = ChainParams::default();
        params.poc_limit = BigUint::from(0x0100u32);

        let mut at_limit = sample_header();
        at_limit.target = vec![0x01, 0x00];
        assert!(check_header_sanity(&at_limit, &params, 10_000).is_ok());

        let mut below_limit = sample_header();
        below_limit.target = vec![0x00, 0xff];
        assert_eq!(
            check_header_sanity(&below_limit, &params, 10_000),
            Err(HeaderError::UnexpectedDifficulty)
        );
    }

    #[test]
    fn sanity_rejects_zero_target() {
        let params = ChainParams::default();
        let mut header = sample_header();
        header.target = vec![0x00];
        assert_eq!(check_header_sanity(&header, &params, 10_000), Err(HeaderError::UnexpectedDifficulty));
    }

    #[test]
    fn next_challenge_is_deterministic_and_chains_to_parent_hash() {
        let parent = sample_header();
        let a = calc_next_challenge(&parent);
        let b = calc_next_challenge(&parent);
        assert_eq!(a, b);

        let mut other_parent = parent.clone();
        other_parent.height += 1;
        assert_ne!(calc_next_challenge(&parent), calc_next_challenge(&other_parent));
    }

    #[test]
    fn next_target_tracks_realized_timespan() {
        let params = ChainParams::default();
        let parent = sample_header();
        let on_time = calc_next_target(&parent, parent.timestamp + params.poc_slot_seconds as i64, &params);
        let very_late = calc_next_target(&parent, parent.timestamp + 10_000, &params);
        // A much later timestamp clamps to the 4x band and eases (raises) the target.
        assert!(very_late >= on_time);
    }

    #[test]
    fn retarget_clamps_extreme_timespans() {
        let prev = BigUint::from(1_000_000u64);
        let limit = BigUint::from(0u32);
        let unclamped = retarget(&prev, 1_000_000, 1_000, &limit);
        let clamped_same = retarget(&prev, 4_000, 1_000, &limit);
        assert_eq!(unclamped, clamped_same);
    }

    #[test]
    fn retarget_floors_at_poc_limit() {
        let prev = BigUint::from(10u64);
        let limit = BigUint::from(1_000_000u64);
        let result = retarget(&prev, 1_000, 1_000, &limit);
        assert_eq!(result, limit);
    }
}
