//! Engine integration tests.
//!
//! Drives the rewind engine, the prediction client and the server simulation
//! through their public APIs only:
//! - Lag compensation: rewind lookups, shot classification, the compensation
//!   window and concurrent access
//! - Prediction: confirm, rollback and replay, desync, pending-input pruning
//! - Server: duplicate inputs and bounds enforcement

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

mod engines {
    pub mod lag_compensation;
    pub mod prediction;
    pub mod server;
}
