//! Hashing primitives
//!
//! Object identities (block ids, transaction ids, prefix hashes) use the
//! BLAKE3 "fast hash". Proof of work uses a separate, opaque hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 32-byte hash output
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The null hash (previous hash of genesis, "no block")
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Create hash from hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

/// Fast hash of arbitrary bytes (BLAKE3)
pub fn hash_bytes(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash(*hash.as_bytes())
}

/// Hash two hashes together (tree hash node)
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&left.0);
    data.extend_from_slice(&right.0);
    hash_bytes(&data)
}

/// Proof-of-work hash of a block hashing blob.
///
/// Treated as an opaque primitive by the rest of the crate; only
/// `check_hash` interprets its output.
pub fn pow_hash(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash(out)
}

/// Check that `hash`, read as a little-endian 256-bit integer, times
/// `difficulty` stays below 2^256.
pub fn check_hash(hash: &Hash, difficulty: u64) -> bool {
    if difficulty == 0 {
        return false;
    }
    let mut carry: u128 = 0;
    for word in hash.0.chunks_exact(8) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(word);
        let product = u64::from_le_bytes(buf) as u128 * difficulty as u128 + carry;
        carry = product >> 64;
    }
    carry == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello world";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = hash_bytes(b"test");
        let recovered = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
        assert!(Hash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_hash_pair_order_matters() {
        let left = hash_bytes(b"left");
        let right = hash_bytes(b"right");
        assert_eq!(hash_pair(&left, &right), hash_pair(&left, &right));
        assert_ne!(hash_pair(&left, &right), hash_pair(&right, &left));
    }

    #[test]
    fn test_pow_hash_differs_from_fast_hash() {
        assert_ne!(pow_hash(b"blob"), hash_bytes(b"blob"));
    }

    #[test]
    fn test_check_hash_difficulty_one_always_passes() {
        assert!(check_hash(&Hash([0xff; 32]), 1));
        assert!(check_hash(&Hash::zero(), 1));
    }

    #[test]
    fn test_check_hash_overflow() {
        // top word 2^63 times 2 overflows 256 bits
        let mut bytes = [0u8; 32];
        bytes[31] = 0x80;
        assert!(!check_hash(&Hash(bytes), 2));
        bytes[31] = 0x7f;
        assert!(check_hash(&Hash(bytes), 2));
        assert!(!check_hash(&Hash::zero(), 0));
    }

    #[test]
    fn test_check_hash_carry_from_low_words() {
        // value just below 2^255 with low bits set: times 2 is still < 2^256
        let mut bytes = [0xffu8; 32];
        bytes[31] = 0x7f;
        assert!(check_hash(&Hash(bytes), 2));
        assert!(!check_hash(&Hash(bytes), 3));
    }
}
