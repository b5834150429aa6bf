//! Deterministic FNV-1a hashing.
//!
//! `std`'s `DefaultHasher` is randomly seeded per process, so two runs of the
//! same seeded scenario would disagree on every state checksum. The hasher here
//! has no seed: identical bytes always hash to the identical value, on every
//! platform and in every run.
//!
//! ```
//! use rewindkit::hash::{fnv1a_hash, DeterministicHasher};
//! use std::hash::{Hash, Hasher};
//!
//! let mut hasher = DeterministicHasher::new();
//! 17u32.hash(&mut hasher);
//! assert_eq!(hasher.finish(), fnv1a_hash(&17u32));
//! ```
//!
//! FNV-1a is NOT cryptographically secure. It detects accidental divergence,
//! not tampering.

use std::hash::{Hash, Hasher};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// A 64-bit FNV-1a [`Hasher`] with a fixed offset basis.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// Creates a hasher in its initial state.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Returns the 64-bit digest folded to 32 bits by xoring its halves.
    #[inline]
    #[must_use]
    pub fn finish_u32(&self) -> u32 {
        fold_to_u32(self.state)
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Hashes any [`Hash`] value with [`DeterministicHasher`].
#[inline]
pub fn fnv1a_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DeterministicHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Folds a 64-bit digest into 32 bits, keeping entropy from both halves.
#[inline]
#[must_use]
pub const fn fold_to_u32(digest: u64) -> u32 {
    ((digest >> 32) ^ (digest & 0xFFFF_FFFF)) as u32
}

/// A [`std::hash::BuildHasher`] producing [`DeterministicHasher`]s.
///
/// Used for lookup-only sets (such as the server's processed sequence numbers)
/// where iteration order never leaks into results.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicBuildHasher;

impl std::hash::BuildHasher for DeterministicBuildHasher {
    type Hasher = DeterministicHasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        DeterministicHasher::new()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn same_value_same_hash() {
        assert_eq!(fnv1a_hash(&42u32), fnv1a_hash(&42u32));
        assert_ne!(fnv1a_hash(&42u32), fnv1a_hash(&43u32));
    }

    #[test]
    fn empty_input_is_offset_basis() {
        let hasher = DeterministicHasher::new();
        assert_eq!(hasher.finish(), FNV_OFFSET_BASIS);
    }

    #[test]
    fn known_reference_values() {
        let mut hasher = DeterministicHasher::new();
        hasher.write(b"a");
        assert_eq!(hasher.finish(), 0xaf63_dc4c_8601_ec8c);

        let mut hasher = DeterministicHasher::new();
        hasher.write(b"foobar");
        assert_eq!(hasher.finish(), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn fold_mixes_both_halves() {
        assert_eq!(fold_to_u32(0x0000_0001_0000_0000), 1);
        assert_eq!(fold_to_u32(0x0000_0000_0000_0002), 2);
        assert_eq!(fold_to_u32(0xFFFF_FFFF_FFFF_FFFF), 0);
    }

    #[test]
    fn build_hasher_in_hash_set() {
        use std::collections::HashSet;

        let mut set: HashSet<u32, DeterministicBuildHasher> =
            HashSet::with_hasher(DeterministicBuildHasher);
        assert!(set.insert(7));
        assert!(!set.insert(7));
        assert!(set.contains(&7));
    }
}
