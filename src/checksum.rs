//! State checksums for desync detection.
//!
//! Two flavors are provided:
//!
//! - [`position_checksum`]: the cheap per-state checksum stored in every
//!   [`GameState`](crate::prediction::GameState). Positions are quantized to two
//!   decimal places first, so states that agree to within a centimetre share
//!   a checksum.
//! - [`compute_checksum`]: a digest of any serializable value, used to
//!   fingerprint whole scenario outcomes so that two seeded runs can be
//!   compared with a single number.
//!
//! Both are deterministic across processes and platforms. Neither is a
//! cryptographic integrity check.
//!
//! ```
//! use rewindkit::checksum::position_checksum;
//! use rewindkit::Vector3;
//!
//! let a = position_checksum(Vector3::new(1.001, 0.0, 2.0));
//! let b = position_checksum(Vector3::new(1.004, 0.0, 2.0));
//! assert_eq!(a, b);
//! ```

use std::hash::Hasher;

use serde::Serialize;

use crate::hash::DeterministicHasher;
use crate::{RewindError, Vector3};

/// Scale applied before rounding: two decimal places.
const QUANTIZATION: f64 = 100.0;

/// Serializes with fixed-width integers so the byte layout never depends on
/// the magnitude of a value.
fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Quantized-position checksum.
#[must_use]
pub fn position_checksum(position: Vector3) -> u32 {
    let mut hasher = DeterministicHasher::new();
    for component in [position.x, position.y, position.z] {
        hasher.write_i64(quantize(component));
    }
    hasher.finish_u32()
}

/// Rounds to two decimal places and widens to an integer; non-finite values
/// map to fixed sentinels so they still hash deterministically.
fn quantize(component: f64) -> i64 {
    if component.is_nan() {
        return i64::MIN;
    }
    // `as` saturates for out-of-range and infinite floats.
    (component * QUANTIZATION).round() as i64
}

/// Computes a deterministic 64-bit checksum of a serializable value.
///
/// # Errors
///
/// Returns [`RewindError::SerializationError`] if `value` cannot be encoded.
pub fn compute_checksum<T: Serialize>(value: &T) -> Result<u64, RewindError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode_config()).map_err(|err| {
        RewindError::SerializationError {
            context: format!("checksum encoding failed: {err}"),
        }
    })?;
    Ok(hash_bytes_fnv1a(&bytes))
}

/// FNV-1a over raw bytes.
#[inline]
#[must_use]
pub fn hash_bytes_fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = DeterministicHasher::new();
    hasher.write(bytes);
    hasher.finish()
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

    #[derive(Serialize)]
    struct Sample {
        tick: u32,
        position: Vector3,
        label: String,
    }

    #[test]
    fn position_checksum_ignores_sub_centimetre_noise() {
        let base = position_checksum(Vector3::new(10.0, 1.0, -3.0));
        assert_eq!(base, position_checksum(Vector3::new(10.004, 1.0, -3.0)));
        assert_ne!(base, position_checksum(Vector3::new(10.02, 1.0, -3.0)));
    }

    #[test]
    fn position_checksum_is_component_order_sensitive() {
        let a = position_checksum(Vector3::new(1.0, 2.0, 3.0));
        let b = position_checksum(Vector3::new(3.0, 2.0, 1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn position_checksum_handles_non_finite() {
        let nan = position_checksum(Vector3::new(f64::NAN, 0.0, 0.0));
        assert_eq!(nan, position_checksum(Vector3::new(f64::NAN, 0.0, 0.0)));
        let _ = position_checksum(Vector3::new(f64::INFINITY, f64::NEG_INFINITY, 0.0));
    }

    #[test]
    fn compute_checksum_is_deterministic() {
        let sample = Sample {
            tick: 9,
            position: Vector3::new(1.5, 0.0, 2.5),
            label: "client-1".to_string(),
        };
        let a = compute_checksum(&sample).unwrap();
        let b = compute_checksum(&sample).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn compute_checksum_detects_change() {
        let mut sample = Sample {
            tick: 9,
            position: Vector3::new(1.5, 0.0, 2.5),
            label: "client-1".to_string(),
        };
        let before = compute_checksum(&sample).unwrap();
        sample.tick = 10;
        assert_ne!(before, compute_checksum(&sample).unwrap());
    }

    #[test]
    fn hash_bytes_matches_hasher() {
        assert_eq!(hash_bytes_fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
