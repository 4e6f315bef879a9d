// src/tracker.rs - Per-container condition tracking and staleness watchdog

use crate::alerts::ConditionKind;
use crate::classifier::{diagnose, ClassifierMargins};
use crate::container::{ConditionState, ContainerRecord};
use crate::error::{MonitorError, Result};
use crate::reading::{ContainerId, Reading};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// A change in a container's condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub container_id: ContainerId,
    pub from: ConditionState,
    pub to: ConditionState,

    /// Condition behind a non-safe `to` state
    pub kind: Option<ConditionKind>,

    /// Reading that caused the transition, `None` for watchdog transitions
    pub reading: Option<Reading>,

    pub at: DateTime<Utc>,
}

/// Applies the classifier to incoming readings and detects transitions.
#[derive(Debug, Clone)]
pub struct ConditionTracker {
    margins: ClassifierMargins,
    staleness: Duration,
}

impl ConditionTracker {
    pub fn new(margins: ClassifierMargins, staleness: Duration) -> Self {
        Self { margins, staleness }
    }

    pub fn margins(&self) -> &ClassifierMargins {
        &self.margins
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Record a reading and classify it.
    ///
    /// Returns a transition only when the condition or the dimension driving
    /// it changed. Readings older than the last accepted one are dropped.
    pub fn ingest(&self, record: &mut ContainerRecord, reading: Reading) -> Result<Option<TransitionEvent>> {
        let container = &mut record.container;

        let envelope = container
            .envelope
            .ok_or_else(|| MonitorError::MissingEnvelope(container.id.clone()))?;

        if !reading.is_finite() {
            return Err(MonitorError::InvalidReading(format!(
                "non-finite sample for '{}': {:?}",
                container.id, reading
            )));
        }

        if let Some(last) = container.last_reading {
            if reading.timestamp < last.timestamp {
                debug!(
                    container = %container.id,
                    "Dropping out-of-order reading ({} < {})",
                    reading.timestamp, last.timestamp
                );
                return Ok(None);
            }
        }

        let diagnosis = diagnose(&reading, &envelope, &self.margins);
        let from = container.condition();
        let to: ConditionState = diagnosis.state.into();
        let previous_kind = container.condition_kind;

        container.last_reading = Some(reading);
        container.disconnected = false;
        container.condition_kind = diagnosis.kind;

        if from == to && previous_kind == diagnosis.kind {
            trace!(container = %container.id, state = ?to, "Condition unchanged");
            return Ok(None);
        }

        container.current_state = diagnosis.state;
        if from == to {
            info!(
                container = %container.id,
                "Condition {:?} now driven by {:?} (was {:?})",
                to, diagnosis.kind, previous_kind
            );
        } else {
            info!(container = %container.id, "Condition {:?} -> {:?}", from, to);
        }

        Ok(Some(TransitionEvent {
            container_id: container.id.clone(),
            from,
            to,
            kind: diagnosis.kind,
            reading: Some(reading),
            at: reading.timestamp,
        }))
    }

    /// Watchdog check: mark the container disconnected once its last update
    /// is older than the staleness threshold.
    pub fn check_staleness(&self, record: &mut ContainerRecord, now: DateTime<Utc>) -> Option<TransitionEvent> {
        let container = &mut record.container;
        if container.disconnected || !container.active {
            return None;
        }

        let age = now - container.last_update();
        if age <= self.staleness {
            return None;
        }

        let from = container.condition();
        container.disconnected = true;
        info!(
            container = %container.id,
            "No data for {}s, marking disconnected",
            age.num_seconds()
        );

        Some(TransitionEvent {
            container_id: container.id.clone(),
            from,
            to: ConditionState::Disconnected,
            kind: Some(ConditionKind::SensorDisconnected),
            reading: None,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SafetyState;
    use crate::container::Container;
    use crate::reading::SafeEnvelope;

    fn record() -> ContainerRecord {
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        ContainerRecord::new(Container::new("BOX-001", Some(env)))
    }

    fn tracker() -> ConditionTracker {
        ConditionTracker::new(ClassifierMargins::default(), Duration::seconds(180))
    }

    #[test]
    fn test_same_state_updates_reading_only() {
        let t = tracker();
        let mut rec = record();
        let r = Reading::now(22.0, 50.0);
        assert!(t.ingest(&mut rec, r).unwrap().is_none());
        assert_eq!(rec.container.last_reading, Some(r));
        assert_eq!(rec.container.current_state, SafetyState::Safe);
    }

    #[test]
    fn test_transition_emitted_on_change() {
        let t = tracker();
        let mut rec = record();
        let ev = t.ingest(&mut rec, Reading::now(29.0, 50.0)).unwrap().unwrap();
        assert_eq!(ev.from, ConditionState::Safe);
        assert_eq!(ev.to, ConditionState::Warning);
        assert_eq!(ev.kind, Some(ConditionKind::HighTemperature));
        assert_eq!(rec.container.current_state, SafetyState::Warning);

        // same state again: nothing
        assert!(t.ingest(&mut rec, Reading::now(29.5, 50.0)).unwrap().is_none());
    }

    #[test]
    fn test_kind_change_within_same_state_is_a_transition() {
        let t = tracker();
        let mut rec = record();
        let now = Utc::now();
        t.ingest(&mut rec, Reading::new(29.0, 55.0, now)).unwrap().unwrap();
        assert_eq!(rec.container.condition_kind, Some(ConditionKind::HighTemperature));

        let ev = t
            .ingest(&mut rec, Reading::new(22.0, 75.0, now + Duration::seconds(1)))
            .unwrap()
            .unwrap();
        assert_eq!(ev.from, ConditionState::Warning);
        assert_eq!(ev.to, ConditionState::Warning);
        assert_eq!(ev.kind, Some(ConditionKind::HumidityOutOfRange));
        assert_eq!(rec.container.condition_kind, Some(ConditionKind::HumidityOutOfRange));

        // back to safe clears the driving dimension
        t.ingest(&mut rec, Reading::new(22.0, 55.0, now + Duration::seconds(2))).unwrap().unwrap();
        assert_eq!(rec.container.condition_kind, None);
    }

    #[test]
    fn test_missing_envelope_is_config_error() {
        let t = tracker();
        let mut rec = ContainerRecord::new(Container::new("BOX-X", None));
        let err = t.ingest(&mut rec, Reading::now(22.0, 50.0)).unwrap_err();
        assert!(err.is_configuration());
        assert!(rec.container.last_reading.is_none());
    }

    #[test]
    fn test_out_of_order_reading_dropped() {
        let t = tracker();
        let mut rec = record();
        let now = Utc::now();
        t.ingest(&mut rec, Reading::new(22.0, 50.0, now)).unwrap();
        let old = Reading::new(35.0, 50.0, now - Duration::seconds(10));
        assert!(t.ingest(&mut rec, old).unwrap().is_none());
        assert_eq!(rec.container.current_state, SafetyState::Safe);
    }

    #[test]
    fn test_non_finite_reading_rejected_without_state_change() {
        let t = tracker();
        let mut rec = record();
        let err = t.ingest(&mut rec, Reading::now(f64::NAN, 50.0)).unwrap_err();
        assert!(err.is_transient());
        assert!(rec.container.last_reading.is_none());
    }

    #[test]
    fn test_watchdog_marks_disconnected_once() {
        let t = tracker();
        let mut rec = record();
        let now = Utc::now();
        t.ingest(&mut rec, Reading::new(29.0, 50.0, now)).unwrap();

        assert!(t.check_staleness(&mut rec, now + Duration::seconds(60)).is_none());

        let ev = t.check_staleness(&mut rec, now + Duration::seconds(200)).unwrap();
        assert_eq!(ev.from, ConditionState::Warning);
        assert_eq!(ev.to, ConditionState::Disconnected);
        // classified state is preserved
        assert_eq!(rec.container.current_state, SafetyState::Warning);

        assert!(t.check_staleness(&mut rec, now + Duration::seconds(400)).is_none());
    }

    #[test]
    fn test_reconnect_emits_transition_even_if_state_unchanged() {
        let t = tracker();
        let mut rec = record();
        let now = Utc::now();
        t.ingest(&mut rec, Reading::new(29.0, 50.0, now)).unwrap();
        t.check_staleness(&mut rec, now + Duration::seconds(200)).unwrap();

        let ev = t
            .ingest(&mut rec, Reading::new(29.0, 50.0, now + Duration::seconds(210)))
            .unwrap()
            .unwrap();
        assert_eq!(ev.from, ConditionState::Disconnected);
        assert_eq!(ev.to, ConditionState::Warning);
        assert!(!rec.container.disconnected);
    }
}
