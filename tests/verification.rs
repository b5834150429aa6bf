//! Verification integration tests.
//!
//! - Determinism tests: same seed, same report
//! - Invariant tests: history invariants across record sequences
//! - Property tests: rewind and reconciliation properties with proptest
//! - Metamorphic tests: transformations that must not change outcomes

#[path = "common/mod.rs"]
mod common;

mod verification {
    pub mod determinism;
    pub mod invariants;
    pub mod metamorphic;
    pub mod property;
}
