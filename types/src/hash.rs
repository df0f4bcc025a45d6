//! 32-byte content hash shared by blocks and transactions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A Blake2b-256 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Lowercase hex encoding of the full hash. Used as the map key for
    /// transaction-pool lookups.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

// Inline hex encoding to avoid adding the `hex` crate as a dependency of types.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::new([1u8; 32]).is_zero());
    }

    #[test]
    fn hex_encoding_is_lowercase_and_full_width() {
        let h = Hash::new([0xAB; 32]);
        assert_eq!(h.to_hex().len(), 64);
        assert!(h.to_hex().starts_with("abab"));
    }

    #[test]
    fn display_matches_hex() {
        let h = Hash::new([7u8; 32]);
        assert_eq!(format!("{h}"), h.to_hex());
    }

    #[test]
    fn serde_roundtrip() {
        let h = Hash::new([42u8; 32]);
        let bytes = bincode::serialize(&h).unwrap();
        let back: Hash = bincode::deserialize(&bytes).unwrap();
        assert_eq!(h, back);
    }
}
