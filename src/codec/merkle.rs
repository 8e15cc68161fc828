//! Merkle tree construction, generalized from the teacher's
//! `crypto::merkle::calculate_merkle_root` (single SHA-256 per level) to the
//! double-SHA-256 scheme §6 mandates for chain hashes.

use super::hash::{sha256d, Hash};

/// Build a Merkle root from a sequence of 32-byte leaves. Duplicates the
/// last leaf on an odd count at every level, per 4.A. An empty input
/// produces the hash of an empty byte string, matching the teacher's
/// convention for the degenerate case.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return sha256d(b"");
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let combined = if pair.len() == 2 {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0].0);
                buf.extend_from_slice(&pair[1].0);
                sha256d(&buf)
            } else {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0].0);
                buf.extend_from_slice(&pair[0].0);
                sha256d(&buf)
            };
            next.push(combined);
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hash::sha256d as h;

    #[test]
    fn single_leaf_is_root() {
        let leaf = h(b"tx1");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn two_leaves_concat_and_hash() {
        let a = h(b"tx1");
        let b = h(b"tx2");
        let root = merkle_root(&[a, b]);
        let mut buf = Vec::new();
        buf.extend_from_slice(&a.0);
        buf.extend_from_slice(&b.0);
        assert_eq!(root, h(&buf));
    }

    #[test]
    fn odd_count_duplicates_last() {
        let a = h(b"tx1");
        let b = h(b"tx2");
        let c = h(b"tx3");
        let root = merkle_root(&[a, b, c]);

        let left = {
            let mut buf = Vec::new();
            buf.extend_from_slice(&a.0);
            buf.extend_from_slice(&b.0);
            h(&buf)
        };
        let right = {
            let mut buf = Vec::new();
            buf.extend_from_slice(&c.0);
            buf.extend_from_slice(&c.0);
            h(&buf)
        };
        let mut buf = Vec::new();
        buf.extend_from_slice(&left.0);
        buf.extend_from_slice(&right.0);
        assert_eq!(root, h(&buf));
    }

    #[test]
    fn empty_is_deterministic() {
        assert_eq!(merkle_root(&[]), sha256d(b""));
    }
}
