//! Key-prefix encoding for the persistent store (component I).
//!
//! Byte layouts grounded in `original_source/database/ldb/govern_tx.go`'s
//! key-prefix scheme (`recordGovernTx = []byte("TXG")`, fixed-width
//! big/little-endian integer suffixes), generalized across every subsystem
//! the store tracks (§4.I), and correcting that source's key-builder bug
//! (it copies the transaction hash into both the `txHash` and `blockSha`
//! regions instead of the real block hash — §9 Open Question a).

use crate::codec::Hash;

pub const BLOCK_BY_HEIGHT: &[u8] = b"BLKHGT";
pub const BLOCK_BY_HASH: &[u8] = b"BLKSHA";
pub const TX_LOCATION: &[u8] = b"TXL";
pub const TX_SPENT_FLAGS: &[u8] = b"TXFS";
pub const HEIGHT_TIMESTAMPS: &[u8] = b"HTS";
pub const SIDE_TIP_LIST: &[u8] = b"STL";
pub const BAN_LIST_BY_HEIGHT: &[u8] = b"BANHGT";
/// Governance-transaction index key prefix; layout is
/// `prefix(3) ‖ id(u16 LE) ‖ height(u64 LE) ‖ txHash[32] ‖ blockSha[32]`.
pub const GOVERN_TX: &[u8] = b"TXG";
pub const BLOCK_LOCATOR: &[u8] = b"BL";
pub const META: &[u8] = b"META";

pub fn block_by_height_key(height: u64) -> Vec<u8> {
    let mut k = BLOCK_BY_HEIGHT.to_vec();
    k.extend_from_slice(&height.to_be_bytes());
    k
}

pub fn block_by_hash_key(hash: &Hash) -> Vec<u8> {
    let mut k = BLOCK_BY_HASH.to_vec();
    k.extend_from_slice(&hash.0);
    k
}

pub fn tx_location_key(tx_hash: &Hash) -> Vec<u8> {
    let mut k = TX_LOCATION.to_vec();
    k.extend_from_slice(&tx_hash.0);
    k
}

/// `TXFS ‖ txHash[32] ‖ confirmHeight(u64 BE)`: a write-once marker recorded
/// when every output of `tx_hash` becomes spent, archiving the fact rather
/// than tracking a live bitmap (the live bitmap lives on the `TXL` entry
/// itself, per §4.I).
pub fn tx_fully_spent_archive_key(tx_hash: &Hash, confirm_height: u64) -> Vec<u8> {
    let mut k = TX_SPENT_FLAGS.to_vec();
    k.extend_from_slice(&tx_hash.0);
    k.extend_from_slice(&confirm_height.to_be_bytes());
    k
}

pub fn height_timestamps_key(height: u64) -> Vec<u8> {
    let mut k = HEIGHT_TIMESTAMPS.to_vec();
    k.extend_from_slice(&height.to_be_bytes());
    k
}

pub fn ban_list_key(height: u64) -> Vec<u8> {
    let mut k = BAN_LIST_BY_HEIGHT.to_vec();
    k.extend_from_slice(&height.to_be_bytes());
    k
}

/// `id(u16 LE) ‖ height(u64 LE) ‖ txHash[32] ‖ blockSha[32]`, per the
/// byte-layout comment in the original source (`governKeyLength = 77`),
/// with the real block hash written into the `blockSha` suffix.
pub fn govern_tx_key(id: u16, height: u64, tx_hash: &Hash, block_sha: &Hash) -> Vec<u8> {
    let mut k = Vec::with_capacity(GOVERN_TX.len() + 2 + 8 + 32 + 32);
    k.extend_from_slice(GOVERN_TX);
    k.extend_from_slice(&id.to_le_bytes());
    k.extend_from_slice(&height.to_le_bytes());
    k.extend_from_slice(&tx_hash.0);
    k.extend_from_slice(&block_sha.0);
    k
}

pub fn block_locator_key(hash: &Hash) -> Vec<u8> {
    let mut k = BLOCK_LOCATOR.to_vec();
    k.extend_from_slice(&hash.0);
    k
}

pub fn meta_key(name: &str) -> Vec<u8> {
    let mut k = META.to_vec();
    k.extend_from_slice(name.as_bytes());
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_key_is_big_endian_for_range_scans() {
        let k1 = block_by_height_key(1);
        let k2 = block_by_height_key(2);
        let k256 = block_by_height_key(256);
        assert!(k1 < k2);
        assert!(k2 < k256);
    }

    #[test]
    fn govern_tx_key_has_expected_length_and_distinct_tx_block_regions() {
        let tx_hash = Hash([0xAA; 32]);
        let block_sha = Hash([0xBB; 32]);
        let key = govern_tx_key(7, 100, &tx_hash, &block_sha);
        assert_eq!(key.len(), GOVERN_TX.len() + 2 + 8 + 32 + 32);

        let tx_region_start = GOVERN_TX.len() + 2 + 8;
        let block_region_start = tx_region_start + 32;
        assert_eq!(&key[tx_region_start..block_region_start], &tx_hash.0[..]);
        assert_eq!(&key[block_region_start..], &block_sha.0[..]);
        assert_ne!(&key[tx_region_start..block_region_start], &key[block_region_start..]);
    }
}
