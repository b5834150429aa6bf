//! Scenario driver integration tests.
//!
//! Runs the virtual-clock drivers, the tokio runner and the suites end to
//! end and checks the aggregated reports.

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

mod scenarios {
    #[cfg(feature = "tokio")]
    pub mod concurrent;
    pub mod lag_compensation;
    pub mod prediction;
    pub mod reports;
}
