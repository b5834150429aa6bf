//! Structured event sink for lag-compensation and prediction anomalies.
//!
//! Every engine in this crate receives an [`EventObserver`] at construction
//! instead of logging through hidden process-wide state. Anomalies that the
//! system exists to *measure* (rejected shots, desyncs, rollbacks, duplicate
//! inputs) are emitted as [`NetEvent`]s, which can be:
//!
//! - Logged via tracing ([`TracingObserver`], the default)
//! - Collected programmatically for testing ([`CollectingObserver`])
//! - Fanned out to several sinks ([`CompositeObserver`])
//!
//! # Example
//!
//! ```
//! use rewindkit::telemetry::{CollectingObserver, EventKind};
//! use rewindkit::lag_compensation::LagCompensationEngine;
//! use rewindkit::config::LagCompensationConfig;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let engine = LagCompensationEngine::with_observer(
//!     LagCompensationConfig::default(),
//!     observer.clone(),
//! );
//!
//! assert!(observer.is_empty());
//! # let _ = engine;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{EntityId, SequenceNumber};

/// Severity of a reported event.
///
/// Severities are ordered from least to most severe, allowing filtering
/// and comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    /// Expected behavior worth recording, such as a rollback.
    Info,
    /// Degraded but recovered; the event is counted in metrics.
    Warning,
    /// A caller precondition was violated or an invariant broke.
    Error,
}

impl EventSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of reported events.
///
/// Each variant maps onto one anomaly class of the rewind/prediction core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A history lookup asked for a time older than the retained window or
    /// further ahead than extrapolation allows.
    OutOfRangeTimestamp,
    /// A shot implied a time in the future or beyond the compensation ceiling.
    InvalidCompensationWindow,
    /// A geometric hit failed post-hoc validation (false positive).
    InvalidHit,
    /// Reconciliation found no buffered state for the server's sequence number.
    Desync,
    /// Reconciliation discarded the prediction and replayed pending inputs.
    Rollback,
    /// The server saw an already-processed input sequence number.
    DuplicateInput,
    /// A snapshot arrived with a timestamp older than the entity's newest.
    OutOfOrderSnapshot,
    /// Runtime invariant check failed.
    Invariant,
}

impl EventKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfRangeTimestamp => "out_of_range_timestamp",
            Self::InvalidCompensationWindow => "invalid_compensation_window",
            Self::InvalidHit => "invalid_hit",
            Self::Desync => "desync",
            Self::Rollback => "rollback",
            Self::DuplicateInput => "duplicate_input",
            Self::OutOfOrderSnapshot => "out_of_order_snapshot",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded event with its diagnostic context.
///
/// Build one with [`net_event!`](crate::net_event), which fills in the source
/// location, then attach the entity, sequence number or extra context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NetEvent {
    /// The severity level of this event.
    pub severity: EventSeverity,
    /// The category of this event.
    pub kind: EventKind,
    /// Human-readable description.
    pub message: String,
    /// Source location where the event was raised (file:line).
    pub location: &'static str,
    /// The entity concerned, if any.
    pub entity: Option<EntityId>,
    /// The input sequence number concerned, if any.
    pub sequence: Option<SequenceNumber>,
    /// The simulation timestamp (seconds) at which the event applies, if any.
    pub timestamp: Option<f64>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl NetEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        severity: EventSeverity,
        kind: EventKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            entity: None,
            sequence: None,
            timestamp: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the entity this event concerns.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the input sequence number this event concerns.
    #[must_use]
    pub fn with_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Sets the simulation timestamp of this event.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Serializes this event to a JSON string.
    ///
    /// Returns `None` if serialization fails (which should not happen for
    /// well-formed events).
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for NetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(entity) = self.entity {
            write!(f, ", entity={entity}")?;
        }
        if let Some(sequence) = self.sequence {
            write!(f, ", seq={sequence}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Trait for observing reported events.
///
/// Observers are shared between concurrently running scenario tasks, so they
/// must be `Send + Sync`. `on_event` may be called on the hot path of shot
/// processing and reconciliation and should return quickly.
pub trait EventObserver: Send + Sync {
    /// Called when an event is reported.
    fn on_event(&self, event: &NetEvent);
}

/// Built-in observer that logs events via the `tracing` crate.
///
/// # Log Levels
///
/// - `Info` severity → `tracing::debug!` (rollbacks are routine)
/// - `Warning` severity → `tracing::warn!`
/// - `Error` severity → `tracing::error!`
///
/// All fields are emitted as structured tracing fields so that a JSON
/// formatter can pick them up.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn format_context(event: &NetEvent) -> String {
        if event.context.is_empty() {
            return "{}".to_string();
        }
        let pairs: Vec<String> = event
            .context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{{{}}}", pairs.join(", "))
    }
}

impl EventObserver for TracingObserver {
    fn on_event(&self, event: &NetEvent) {
        let kind = event.kind.as_str();
        let location = event.location;
        let entity = event.entity.map(|e| e.as_u32());
        let sequence = event.sequence.map(|s| s.as_u32());
        let context = Self::format_context(event);

        match event.severity {
            EventSeverity::Info => {
                tracing::debug!(kind, location, ?entity, ?sequence, context = %context, "{}", event.message);
            },
            EventSeverity::Warning => {
                tracing::warn!(kind, location, ?entity, ?sequence, context = %context, "{}", event.message);
            },
            EventSeverity::Error => {
                tracing::error!(kind, location, ?entity, ?sequence, context = %context, "{}", event.message);
            },
        }
    }
}

/// Built-in observer that collects events for testing.
///
/// # Example
///
/// ```
/// use rewindkit::net_event;
/// use rewindkit::telemetry::{CollectingObserver, EventKind, EventObserver, EventSeverity};
///
/// let observer = CollectingObserver::new();
/// observer.on_event(&net_event!(EventSeverity::Warning, EventKind::Desync, "no match"));
///
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_event(EventKind::Desync));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<NetEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty event list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<NetEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Checks if any event of the specified kind has been collected.
    #[must_use]
    pub fn has_event(&self, kind: EventKind) -> bool {
        self.events.lock().iter().any(|e| e.kind == kind)
    }

    /// Returns the number of collected events of the specified kind.
    #[must_use]
    pub fn count_of_kind(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Returns all events matching the specified kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<NetEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns all events at or above the specified severity.
    #[must_use]
    pub fn events_at_severity(&self, min_severity: EventSeverity) -> Vec<NetEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity >= min_severity)
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventObserver for CollectingObserver {
    fn on_event(&self, event: &NetEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A composite observer that forwards events to multiple observers.
///
/// Useful when a scenario should both log and collect.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite observer from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn EventObserver>>) -> Self {
        Self { observers }
    }
}

impl EventObserver for CompositeObserver {
    fn on_event(&self, event: &NetEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Returns the observer engines use when none is supplied.
#[must_use]
pub fn default_observer() -> Arc<dyn EventObserver> {
    Arc::new(TracingObserver)
}

/// Builds a [`NetEvent`] stamped with the current file and line.
///
/// # Syntax
///
/// ```text
/// net_event!(severity, kind, "message");
/// net_event!(severity, kind, "message with {}", format_args);
/// ```
///
/// # Example
///
/// ```
/// use rewindkit::{net_event, EntityId};
/// use rewindkit::telemetry::{EventKind, EventSeverity};
///
/// let event = net_event!(
///     EventSeverity::Warning,
///     EventKind::InvalidCompensationWindow,
///     "compensation time {:.3}s exceeds ceiling",
///     0.35
/// )
/// .with_entity(EntityId::new(3));
///
/// assert!(event.location.contains(".rs:"));
/// assert_eq!(event.entity, Some(EntityId::new(3)));
/// ```
#[macro_export]
macro_rules! net_event {
    ($severity:expr, $kind:expr, $msg:literal) => {
        $crate::telemetry::NetEvent::new($severity, $kind, $msg, concat!(file!(), ":", line!()))
    };

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {
        $crate::telemetry::NetEvent::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        )
    };
}

/// Asserts that a collecting observer saw an event of the specified kind.
///
/// # Panics
///
/// Panics if no event of the specified kind was found.
#[macro_export]
macro_rules! assert_event {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_event($kind),
            "Expected event of kind {:?}, but found: {:#?}",
            $kind,
            $observer.events()
        );
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// Result of an invariant check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant was violated.
    pub type_name: &'static str,
    /// Description of the violated invariant.
    pub invariant: String,
    /// Additional diagnostic context.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Adds additional details to the violation.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Types with internal invariants that can be checked at runtime.
pub trait InvariantChecker {
    /// Checks that all invariants of this type are satisfied.
    ///
    /// Returns `Ok(())` if all invariants hold, or an `InvariantViolation`
    /// describing the first broken invariant.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks invariants in debug builds (or with the `paranoid` feature) and
/// reports a violation to the given observer.
///
/// Compiles to nothing in release builds without `paranoid`.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($observer:expr, $expr:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $observer.on_event(&$crate::net_event!(
                $crate::telemetry::EventSeverity::Error,
                $crate::telemetry::EventKind::Invariant,
                "{}",
                violation
            ));
        }
    }};
}

/// No-op version for release builds without `paranoid` feature.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($observer:expr, $expr:expr) => {{}};
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
    fn severity_ordering() {
        assert!(EventSeverity::Info < EventSeverity::Warning);
        assert!(EventSeverity::Warning < EventSeverity::Error);
    }

    #[test]
    fn kind_labels_are_snake_case() {
        assert_eq!(
            EventKind::InvalidCompensationWindow.as_str(),
            "invalid_compensation_window"
        );
        assert_eq!(EventKind::Desync.to_string(), "desync");
    }

    #[test]
    fn net_event_macro_records_location() {
        let event = crate::net_event!(EventSeverity::Info, EventKind::Rollback, "replayed {}", 3);
        assert_eq!(event.message, "replayed 3");
        assert!(event.location.starts_with("src/telemetry.rs:"));
    }

    #[test]
    fn display_includes_entity_and_sequence() {
        let event = NetEvent::new(EventSeverity::Warning, EventKind::Desync, "no match", "x.rs:1")
            .with_entity(EntityId::new(4))
            .with_sequence(SequenceNumber::new(12))
            .with_context("buffered", 120);
        let text = event.to_string();
        assert!(text.contains("[warning/desync] no match"));
        assert!(text.contains("entity=4"));
        assert!(text.contains("seq=12"));
        assert!(text.contains("buffered"));
    }

    #[test]
    fn collecting_observer_filters() {
        let observer = CollectingObserver::new();
        observer.on_event(&NetEvent::new(
            EventSeverity::Info,
            EventKind::Rollback,
            "a",
            "x.rs:1",
        ));
        observer.on_event(&NetEvent::new(
            EventSeverity::Warning,
            EventKind::Desync,
            "b",
            "x.rs:2",
        ));
        observer.on_event(&NetEvent::new(
            EventSeverity::Warning,
            EventKind::Desync,
            "c",
            "x.rs:3",
        ));

        assert_eq!(observer.len(), 3);
        assert_eq!(observer.count_of_kind(EventKind::Desync), 2);
        assert_eq!(observer.events_of_kind(EventKind::Rollback).len(), 1);
        assert_eq!(observer.events_at_severity(EventSeverity::Warning).len(), 2);

        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn composite_forwards_to_all() {
        let a = Arc::new(CollectingObserver::new());
        let b = Arc::new(CollectingObserver::new());
        let composite = CompositeObserver::from_observers(vec![a.clone(), b.clone()]);

        composite.on_event(&NetEvent::new(
            EventSeverity::Warning,
            EventKind::DuplicateInput,
            "dup",
            "x.rs:1",
        ));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn tracing_observer_does_not_panic_without_subscriber() {
        let observer = TracingObserver::new();
        for severity in [
            EventSeverity::Info,
            EventSeverity::Warning,
            EventSeverity::Error,
        ] {
            observer.on_event(&NetEvent::new(severity, EventKind::Invariant, "x", "x.rs:1"));
        }
    }

    #[test]
    fn invariant_violation_display() {
        let violation = InvariantViolation::new("PositionHistory", "timestamps not sorted")
            .with_details("index 3");
        assert_eq!(
            violation.to_string(),
            "PositionHistory: timestamps not sorted (index 3)"
        );
    }
}
