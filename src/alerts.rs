// File: src/alerts.rs
// Alert lifecycle management for monitored containers
//
// Alerts are created, deduplicated, escalated and resolved from condition
// transitions. At most one unresolved alert exists per (container, kind).

use crate::classifier::SafetyState;
use crate::container::{ConditionState, ContainerRecord};
use crate::error::{ConflictRule, MonitorError, Result};
use crate::escalation::EscalationLevel;
use crate::reading::{ContainerId, Excursion, Reading, SafeEnvelope};
use crate::tracker::TransitionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// SECTION 1: ALERT DATA STRUCTURES
// ==========================================

pub type AlertId = Uuid;

/// Category of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    HighTemperature,
    LowTemperature,
    HumidityOutOfRange,
    SensorDisconnected,
    /// An operator intervened against an unsafe condition
    ManualAction,
}

impl ConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::HighTemperature => "high_temperature",
            ConditionKind::LowTemperature => "low_temperature",
            ConditionKind::HumidityOutOfRange => "humidity_out_of_range",
            ConditionKind::SensorDisconnected => "sensor_disconnected",
            ConditionKind::ManualAction => "manual_action",
        }
    }

    /// Whether `reading` is back inside the envelope on this kind's dimension.
    /// Disconnects and manual actions never clear from a reading alone.
    pub fn cleared_by(self, reading: &Reading, envelope: &SafeEnvelope) -> bool {
        match self {
            ConditionKind::HighTemperature => {
                !matches!(envelope.temperature_excursion(reading.temperature), Excursion::Above(_))
            }
            ConditionKind::LowTemperature => {
                !matches!(envelope.temperature_excursion(reading.temperature), Excursion::Below(_))
            }
            ConditionKind::HumidityOutOfRange => {
                envelope.humidity_excursion(reading.humidity) == Excursion::Within
            }
            ConditionKind::SensorDisconnected | ConditionKind::ManualAction => false,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ConditionKind::HighTemperature => "High temperature",
            ConditionKind::LowTemperature => "Low temperature",
            ConditionKind::HumidityOutOfRange => "Humidity out of range",
            ConditionKind::SensorDisconnected => "Sensor disconnected",
            ConditionKind::ManualAction => "Manual action",
        }
    }
}

/// Alert severity, ordered so that `Critical` is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl From<SafetyState> for Severity {
    fn from(state: SafetyState) -> Self {
        match state {
            SafetyState::Safe => Severity::Info,
            SafetyState::Warning => Severity::Warning,
            SafetyState::Critical => Severity::Critical,
        }
    }
}

/// An open or resolved notice for one container and one condition kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub container_id: ContainerId,
    pub kind: ConditionKind,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// `system` for automatic resolution, otherwise the operator
    pub resolved_by: Option<String>,
    /// Snapshot of the container's fix-attempt counter
    pub fix_attempts: u32,
}

impl Alert {
    pub fn open(
        container_id: impl Into<ContainerId>,
        kind: ConditionKind,
        severity: Severity,
        fix_attempts: u32,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_id: container_id.into(),
            kind,
            severity,
            message: message.into(),
            created_at: now,
            updated_at: now,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            fix_attempts,
        }
    }

    pub fn escalation(&self, recall_threshold: u32) -> EscalationLevel {
        EscalationLevel::from_attempts(self.fix_attempts, recall_threshold)
    }

    fn close(&mut self, by: &str, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
        self.resolved_by = Some(by.to_string());
        self.updated_at = now;
    }
}

fn alert_message(container_id: &str, kind: ConditionKind, reading: Option<&Reading>) -> String {
    match (kind, reading) {
        (ConditionKind::HighTemperature | ConditionKind::LowTemperature, Some(r)) => {
            format!("{} in {}: {:.1}°C", kind.describe(), container_id, r.temperature)
        }
        (ConditionKind::HumidityOutOfRange, Some(r)) => {
            format!("{} in {}: {:.1}%", kind.describe(), container_id, r.humidity)
        }
        _ => format!("{} in {}", kind.describe(), container_id),
    }
}

// ==========================================
// SECTION 2: MUTATIONS AND OUTCOMES
// ==========================================

/// Alert changes produced by one lifecycle step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertMutation {
    pub opened: Vec<Alert>,
    /// Alerts whose severity was raised in place
    pub escalated: Vec<Alert>,
    pub resolved: Vec<Alert>,
}

impl AlertMutation {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.escalated.is_empty() && self.resolved.is_empty()
    }
}

/// Result of an operator resolve action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The container is safe, the alert is closed
    Accepted { alert: Alert },

    /// The reading disagrees with the operator; the alert stays open and the
    /// fix-attempt counter went up by one
    Rejected {
        alert: Alert,
        fix_attempts: u32,
        level: EscalationLevel,
    },
}

// ==========================================
// SECTION 3: LIFECYCLE MANAGER
// ==========================================

/// Applies transitions and operator actions to a container's alerts.
///
/// Every method takes the container record mutably; callers hold the store's
/// per-container critical section for the duration of the call.
#[derive(Debug, Clone)]
pub struct AlertLifecycle {
    recall_threshold: u32,
}

impl AlertLifecycle {
    pub fn new(recall_threshold: u32) -> Self {
        Self { recall_threshold: recall_threshold.max(1) }
    }

    pub fn recall_threshold(&self) -> u32 {
        self.recall_threshold
    }

    /// Apply a condition transition.
    pub fn on_transition(&self, record: &mut ContainerRecord, event: &TransitionEvent) -> AlertMutation {
        let mut mutation = AlertMutation::default();
        let now = event.at;

        match event.to {
            ConditionState::Safe => {
                for alert in record.alerts.iter_mut().filter(|a| !a.resolved) {
                    alert.close("system", now);
                    mutation.resolved.push(alert.clone());
                }
                record.container.fix_attempts = 0;
                if !mutation.resolved.is_empty() {
                    info!(
                        container = %record.container.id,
                        "Returned to safe, auto-resolved {} alert(s)",
                        mutation.resolved.len()
                    );
                }
            }
            ConditionState::Disconnected => {
                self.raise(
                    record,
                    ConditionKind::SensorDisconnected,
                    Severity::Warning,
                    None,
                    now,
                    &mut mutation,
                );
            }
            ConditionState::Warning | ConditionState::Critical => {
                if event.from == ConditionState::Disconnected {
                    if let Some(alert) = record.open_alert_mut(ConditionKind::SensorDisconnected) {
                        alert.close("system", now);
                        mutation.resolved.push(alert.clone());
                    }
                }

                let severity = match event.to {
                    ConditionState::Critical => Severity::Critical,
                    _ => Severity::Warning,
                };
                let kind = event.kind.unwrap_or(ConditionKind::HighTemperature);

                // The driving dimension moved: close the ones that recovered.
                if let (Some(reading), Some(envelope)) = (event.reading.as_ref(), record.container.envelope) {
                    for alert in record
                        .alerts
                        .iter_mut()
                        .filter(|a| !a.resolved && a.kind != kind && a.kind.cleared_by(reading, &envelope))
                    {
                        alert.close("system", now);
                        mutation.resolved.push(alert.clone());
                        info!(
                            container = %record.container.id,
                            alert = %alert.id,
                            "{} back within range, auto-resolved",
                            alert.kind.describe()
                        );
                    }
                }

                self.raise(record, kind, severity, event.reading.as_ref(), now, &mut mutation);
            }
        }

        mutation
    }

    /// Open an alert of `kind`, or update the open one in place.
    fn raise(
        &self,
        record: &mut ContainerRecord,
        kind: ConditionKind,
        severity: Severity,
        reading: Option<&Reading>,
        now: DateTime<Utc>,
        mutation: &mut AlertMutation,
    ) {
        let fix_attempts = record.container.fix_attempts;
        let container_id = record.container.id.clone();

        if let Some(existing) = record.open_alert_mut(kind) {
            if existing.severity == severity {
                debug!(container = %container_id, kind = kind.as_str(), "Alert already open");
                return;
            }
            let upgraded = severity > existing.severity;
            existing.severity = severity;
            existing.fix_attempts = fix_attempts;
            existing.message = alert_message(&container_id, kind, reading);
            existing.updated_at = now;
            if upgraded {
                info!(container = %container_id, kind = kind.as_str(), "Alert escalated to {:?}", severity);
                mutation.escalated.push(existing.clone());
            }
            return;
        }

        let alert = Alert::open(
            container_id.clone(),
            kind,
            severity,
            fix_attempts,
            alert_message(&container_id, kind, reading),
            now,
        );
        if let Err(e) = record.push_alert(alert.clone()) {
            warn!(container = %container_id, kind = kind.as_str(), "Alert not opened: {}", e);
            return;
        }
        info!(container = %container_id, alert = %alert.id, kind = kind.as_str(), "Alert opened");
        mutation.opened.push(alert);
    }

    /// Open a `ManualAction` alert unless one is already open.
    pub fn record_manual_action(
        &self,
        record: &mut ContainerRecord,
        note: &str,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let alert = Alert::open(
            record.container.id.clone(),
            ConditionKind::ManualAction,
            Severity::Info,
            record.container.fix_attempts,
            format!("{} in {}: {}", ConditionKind::ManualAction.describe(), record.container.id, note),
            now,
        );
        record.push_alert(alert.clone()).ok()?;
        Some(alert)
    }

    /// Operator claims the condition behind `alert_id` is fixed.
    ///
    /// Accepted outright when the container is safe. Otherwise the alert stays
    /// open and the container's fix-attempt counter is incremented.
    pub fn resolve(
        &self,
        record: &mut ContainerRecord,
        alert_id: &AlertId,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let condition = record.container.condition();
        let threshold = self.recall_threshold;

        if condition.is_safe() {
            let alert = record
                .alert_mut(alert_id)
                .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))?;
            if alert.resolved {
                return Err(MonitorError::Conflict(ConflictRule::AlertAlreadyResolved));
            }
            alert.close(operator, now);
            info!(alert = %alert.id, operator, "Alert resolved by operator");
            return Ok(ResolveOutcome::Accepted { alert: alert.clone() });
        }

        {
            let alert = record
                .alert_mut(alert_id)
                .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))?;
            if alert.resolved {
                return Err(MonitorError::Conflict(ConflictRule::AlertAlreadyResolved));
            }
        }

        // Silent but last seen safe: not a failed fix.
        if record.container.disconnected && record.container.current_state.is_safe() {
            debug!(alert = %alert_id, operator, "Resolve refused, waiting for readings");
            return Err(MonitorError::Conflict(ConflictRule::AwaitingReadings));
        }

        record.container.fix_attempts += 1;
        let fix_attempts = record.container.fix_attempts;

        let alert = record
            .alert_mut(alert_id)
            .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))?;
        alert.fix_attempts = fix_attempts;
        alert.updated_at = now;

        let level = EscalationLevel::from_attempts(fix_attempts, threshold);
        warn!(
            alert = %alert.id,
            operator,
            fix_attempts,
            "Resolve rejected, container still {:?}; next step: {}",
            condition,
            level.wording()
        );

        Ok(ResolveOutcome::Rejected { alert: alert.clone(), fix_attempts, level })
    }
}

// ==========================================
// SECTION 4: TESTS
// ==========================================
