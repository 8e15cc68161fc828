//! Codecs & hashing (component A): fixed-size hashes, varint / length-prefixed
//! encodings, and the Merkle tree builder.

pub mod hash;
pub mod merkle;
pub mod varint;

pub use hash::{hash160, sha256, sha256d, Hash, HASH_LEN};
pub use merkle::merkle_root;
pub use varint::{read_varbytes, read_varint, write_varbytes, write_varint};
