//! Error types returned by the rewindkit engines.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::EntityId;

/// This enum contains all caller errors this library can return.
///
/// Anomalies that are expected under adverse network conditions (rejected shots,
/// desyncs, duplicate inputs, lookups outside the retained history) are *not*
/// errors: they are reported as outcomes and telemetry events so that a scenario
/// can keep measuring them. A [`RewindError`] always means the caller broke a
/// precondition.
#[derive(Debug, Clone, PartialEq)]
pub enum RewindError {
    /// A snapshot was recorded with a timestamp older than the newest snapshot
    /// already retained for the same entity. The history is left unchanged.
    OutOfOrderSnapshot {
        /// The entity whose history rejected the snapshot.
        entity: EntityId,
        /// Timestamp of the newest retained snapshot.
        newest: f64,
        /// Timestamp of the rejected snapshot.
        attempted: f64,
    },
    /// A configuration value is outside its valid range.
    InvalidConfig {
        /// Further specifies which value was invalid and why.
        info: String,
    },
    /// Serialization of a state or report failed.
    SerializationError {
        /// A description of what failed to serialize.
        context: String,
    },
    /// A concurrent scenario task panicked or was cancelled before reporting.
    TaskFailed {
        /// What the runtime reported.
        info: String,
    },
}

impl Display for RewindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewindError::OutOfOrderSnapshot {
                entity,
                newest,
                attempted,
            } => {
                write!(
                    f,
                    "Out-of-order snapshot for entity {}: timestamp {} is older than newest retained {}",
                    entity, attempted, newest
                )
            }
            RewindError::InvalidConfig { info } => {
                write!(f, "Invalid configuration: {}", info)
            }
            RewindError::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            }
            RewindError::TaskFailed { info } => {
                write!(f, "Scenario task failed: {}", info)
            }
        }
    }
}

impl Error for RewindError {}

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
    fn out_of_order_display_names_entity_and_timestamps() {
        let err = RewindError::OutOfOrderSnapshot {
            entity: EntityId::new(7),
            newest: 2.5,
            attempted: 1.25,
        };
        let msg = err.to_string();
        assert!(msg.contains("entity 7"));
        assert!(msg.contains("1.25"));
        assert!(msg.contains("2.5"));
    }

    #[test]
    fn invalid_config_display() {
        let err = RewindError::InvalidConfig {
            info: "tick_rate_hz must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: tick_rate_hz must be positive"
        );
    }

    #[test]
    fn errors_are_std_errors() {
        let err: Box<dyn Error> = Box::new(RewindError::SerializationError {
            context: "report".to_string(),
        });
        assert!(err.to_string().contains("report"));
    }
}
