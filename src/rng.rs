//! Seeded PCG32 random number generator.
//!
//! Every scenario owns its generator explicitly; there is no process-wide or
//! thread-local source of randomness in this crate. Two runs with the same
//! seed generate identical movement, shots, latencies and drop decisions.
//!
//! # PCG32 Algorithm
//!
//! PCG (Permuted Congruential Generator) with the XSH-RR output function:
//! - 64 bits of state, 32-bit output
//! - Period of 2^64
//! - Independent streams selected by the increment
//!
//! Reference: <https://www.pcg-random.org/>
//!
//! # Usage
//!
//! ```rust
//! use rewindkit::rng::{Pcg32, Rng, SeedableRng};
//!
//! let mut rng = Pcg32::seed_from_u64(12345);
//! let latency_ms = rng.gen_range_f64(20.0, 80.0);
//! assert!((20.0..80.0).contains(&latency_ms));
//! ```

/// PCG32 random number generator.
///
/// NOT cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

/// Default stream for single-stream use.
const PCG_DEFAULT_STREAM: u64 = 1442695040888963407;

/// LCG multiplier for 64-bit state PCG.
const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl Pcg32 {
    /// Creates a new generator with the given initial state and stream.
    ///
    /// Distinct streams produce statistically independent sequences from the
    /// same state, which is how concurrent clients derive their own generators
    /// from a single scenario seed.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        let mut pcg = Self { state: 0, inc };
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg.state = pcg.state.wrapping_add(state);
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg
    }

    /// Generates the next 32-bit random value.
    #[inline]
    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates the next 64-bit random value from two 32-bit outputs.
    #[inline]
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    /// Derives an independent generator for a sub-task (e.g. one client).
    ///
    /// The child's sequence depends only on this generator's current output
    /// and `stream`, so spawning order does not matter as long as children are
    /// derived in a fixed order.
    #[must_use]
    pub fn fork(&mut self, stream: u64) -> Self {
        Self::new(self.next_u64(), stream)
    }
}

/// Trait for seeding random number generators.
pub trait SeedableRng: Sized {
    /// Creates a new RNG seeded from a 64-bit value.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, PCG_DEFAULT_STREAM)
    }
}

/// Trait for random number generation.
pub trait Rng {
    /// Returns the next 32-bit random value.
    fn next_u32(&mut self) -> u32;

    /// Returns the next 64-bit random value.
    fn next_u64(&mut self) -> u64;

    /// Generates a random value of type `T`.
    fn gen<T: RandomValue>(&mut self) -> T {
        T::random(self)
    }

    /// Generates a uniform `f64` in `[0, 1)`.
    fn gen_f64(&mut self) -> f64 {
        f64::random(self)
    }

    /// Generates a uniform `f64` in `[low, high)`.
    ///
    /// If `high <= low` the range is empty and `low` is returned.
    fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        let value = low + (high - low) * self.gen_f64();
        // Rounding can land exactly on `high` for tiny spans.
        if value >= high {
            low
        } else {
            value
        }
    }

    /// Generates a random `usize` in `[range.start, range.end)`.
    ///
    /// If the range is empty, `range.start` is returned.
    fn gen_range_usize(&mut self, range: std::ops::Range<usize>) -> usize {
        let span = range.end.saturating_sub(range.start) as u64;
        if span == 0 {
            return range.start;
        }

        // Rejection sampling avoids modulo bias.
        let threshold = span.wrapping_neg() % span;
        loop {
            let random_value = self.next_u64();
            if random_value >= threshold {
                return range.start + (random_value % span) as usize;
            }
        }
    }

    /// Returns `true` with the given probability (clamped to `[0, 1]`).
    fn gen_bool(&mut self, probability: f64) -> bool {
        let p = probability.clamp(0.0, 1.0);
        if p >= 1.0 {
            return true;
        }
        self.gen_f64() < p
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        Self::next_u32(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        Self::next_u64(self)
    }
}

/// Types that can be sampled uniformly from an [`Rng`].
pub trait RandomValue {
    /// Draws one value.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl RandomValue for u32 {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.next_u32()
    }
}

impl RandomValue for u64 {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.next_u64()
    }
}

impl RandomValue for f64 {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Upper 53 bits: the full f64 mantissa.
        let val = rng.next_u64() >> 11;
        val as Self / (1u64 << 53) as Self
    }
}

impl RandomValue for bool {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.next_u32() & 1 == 1
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;

    #[test]
    fn test_pcg32_deterministic() {
        let mut rng1 = Pcg32::seed_from_u64(12345);
        let mut rng2 = Pcg32::seed_from_u64(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut rng1 = Pcg32::seed_from_u64(1);
        let mut rng2 = Pcg32::seed_from_u64(2);
        let same = (0..100)
            .filter(|_| rng1.next_u32() == rng2.next_u32())
            .count();
        assert!(same < 5);
    }

    #[test]
    fn test_fork_is_deterministic() {
        let mut parent1 = Pcg32::seed_from_u64(99);
        let mut parent2 = Pcg32::seed_from_u64(99);
        let mut a = parent1.fork(3);
        let mut b = parent2.fork(3);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_gen_f64_unit_interval() {
        let mut rng = Pcg32::seed_from_u64(7);
        for _ in 0..10_000 {
            let v = rng.gen_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_gen_range_f64_bounds() {
        let mut rng = Pcg32::seed_from_u64(42);
        for _ in 0..10_000 {
            let v = rng.gen_range_f64(-5.0, 5.0);
            assert!((-5.0..5.0).contains(&v));
        }
    }

    #[test]
    fn test_gen_range_f64_empty_returns_low() {
        let mut rng = Pcg32::seed_from_u64(42);
        assert_eq!(rng.gen_range_f64(3.0, 3.0), 3.0);
        assert_eq!(rng.gen_range_f64(3.0, 1.0), 3.0);
    }

    #[test]
    fn test_gen_range_usize_covers_range() {
        let mut rng = Pcg32::seed_from_u64(5);
        let mut seen = [false; 6];
        for _ in 0..1000 {
            let v = rng.gen_range_usize(0..6);
            seen[v] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(rng.gen_range_usize(4..4), 4);
    }

    #[test]
    fn test_gen_bool_extremes() {
        let mut rng = Pcg32::seed_from_u64(11);
        for _ in 0..1000 {
            assert!(!rng.gen_bool(0.0));
            assert!(rng.gen_bool(1.0));
        }
    }

    #[test]
    fn test_gen_bool_rate() {
        let mut rng = Pcg32::seed_from_u64(13);
        let hits = (0..10_000).filter(|_| rng.gen_bool(0.25)).count();
        assert!((2_200..2_800).contains(&hits), "hits = {hits}");
    }
}
