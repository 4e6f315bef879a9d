// src/container.rs - Monitored storage containers

use crate::alerts::{Alert, AlertId, ConditionKind};
use crate::classifier::SafetyState;
use crate::error::{ConflictRule, MonitorError, Result};
use crate::reading::{ContainerId, Reading, SafeEnvelope};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Condition of a container including the `Disconnected` pseudo-state.
///
/// `Disconnected` only ever appears in transitions; it never overwrites a
/// container's classified state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionState {
    Safe,
    Warning,
    Critical,
    Disconnected,
}

impl ConditionState {
    pub fn is_safe(self) -> bool {
        self == ConditionState::Safe
    }
}

impl From<SafetyState> for ConditionState {
    fn from(state: SafetyState) -> Self {
        match state {
            SafetyState::Safe => ConditionState::Safe,
            SafetyState::Warning => ConditionState::Warning,
            SafetyState::Critical => ConditionState::Critical,
        }
    }
}

/// Automatic cooling hysteresis for one container
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoCooling {
    /// Switch cooling on at or above this temperature
    pub temp_on: f64,

    /// Switch cooling off at or below this temperature
    pub temp_off: f64,

    /// Minimum seconds between two switches
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_cooldown() -> u64 { 60 }

impl AutoCooling {
    pub fn is_valid(&self) -> bool {
        self.temp_on.is_finite() && self.temp_off.is_finite() && self.temp_on > self.temp_off
    }
}

/// A physical storage unit under monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,

    /// `None` is a configuration error for this container's monitor
    pub envelope: Option<SafeEnvelope>,

    pub current_state: SafetyState,

    /// Dimension behind a non-safe state, `None` while safe
    #[serde(default)]
    pub condition_kind: Option<ConditionKind>,

    pub last_reading: Option<Reading>,

    /// Operator-controlled, updated optimistically
    pub cooling_active: bool,

    /// Failed fix attempts in the current escalation episode
    pub fix_attempts: u32,

    /// Set by the staleness watchdog, cleared by the next reading
    pub disconnected: bool,

    /// Deactivated containers keep their history but are no longer monitored
    pub active: bool,

    #[serde(default)]
    pub auto_cooling: Option<AutoCooling>,

    #[serde(default)]
    pub last_cooling_switch: Option<DateTime<Utc>>,

    pub registered_at: DateTime<Utc>,
}

impl Container {
    pub fn new(id: impl Into<ContainerId>, envelope: Option<SafeEnvelope>) -> Self {
        Self {
            id: id.into(),
            envelope,
            current_state: SafetyState::Safe,
            condition_kind: None,
            last_reading: None,
            cooling_active: false,
            fix_attempts: 0,
            disconnected: false,
            active: true,
            auto_cooling: None,
            last_cooling_switch: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_auto_cooling(mut self, policy: AutoCooling) -> Self {
        self.auto_cooling = Some(policy);
        self
    }

    pub fn with_cooling(mut self, active: bool) -> Self {
        self.cooling_active = active;
        self
    }

    /// Current condition, `Disconnected` while the watchdog flag is set
    pub fn condition(&self) -> ConditionState {
        if self.disconnected {
            ConditionState::Disconnected
        } else {
            self.current_state.into()
        }
    }

    /// Time of the last reading, or of registration if none arrived yet
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_reading.map(|r| r.timestamp).unwrap_or(self.registered_at)
    }

    /// Whether the data shown for this container is older than `threshold`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.disconnected || now - self.last_update() > threshold
    }
}

/// A container together with every alert ever raised for it.
///
/// Stores keep one record per container so that the record is the unit of
/// mutual exclusion for all alert mutations of that container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container: Container,
    pub alerts: Vec<Alert>,
}

impl ContainerRecord {
    pub fn new(container: Container) -> Self {
        Self { container, alerts: Vec::new() }
    }

    pub fn open_alert(&self, kind: ConditionKind) -> Option<&Alert> {
        self.alerts.iter().find(|a| !a.resolved && a.kind == kind)
    }

    pub fn open_alert_mut(&mut self, kind: ConditionKind) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| !a.resolved && a.kind == kind)
    }

    /// Append a new alert. At most one alert per kind may be open.
    pub fn push_alert(&mut self, alert: Alert) -> Result<()> {
        if !alert.resolved && self.open_alert(alert.kind).is_some() {
            return Err(MonitorError::Conflict(ConflictRule::DuplicateOpenAlert));
        }
        self.alerts.push(alert);
        Ok(())
    }

    pub fn alert_mut(&mut self, id: &AlertId) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.id == *id)
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| !a.resolved)
    }

    pub fn open_alert_count(&self) -> usize {
        self.open_alerts().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_is_safe() {
        let c = Container::new("BOX-001", None);
        assert_eq!(c.current_state, SafetyState::Safe);
        assert_eq!(c.fix_attempts, 0);
        assert!(c.active);
        assert_eq!(c.condition(), ConditionState::Safe);
    }

    #[test]
    fn test_staleness() {
        let mut c = Container::new("BOX-001", None);
        let now = Utc::now();
        c.last_reading = Some(Reading::new(22.0, 50.0, now - Duration::seconds(200)));
        assert!(c.is_stale(now, Duration::seconds(180)));
        assert!(!c.is_stale(now, Duration::seconds(300)));

        c.disconnected = true;
        assert!(c.is_stale(now, Duration::seconds(300)));
        assert_eq!(c.condition(), ConditionState::Disconnected);
    }

    #[test]
    fn test_second_open_alert_of_a_kind_is_a_conflict() {
        let mut rec = ContainerRecord::new(Container::new("BOX-001", None));
        let now = Utc::now();
        let open = |kind| Alert::open("BOX-001", kind, crate::alerts::Severity::Warning, 0, "x", now);

        rec.push_alert(open(ConditionKind::HighTemperature)).unwrap();
        rec.push_alert(open(ConditionKind::HumidityOutOfRange)).unwrap();
        let err = rec.push_alert(open(ConditionKind::HighTemperature)).unwrap_err();
        assert!(matches!(err, MonitorError::Conflict(ConflictRule::DuplicateOpenAlert)));
        assert_eq!(rec.open_alert_count(), 2);
    }

    #[test]
    fn test_auto_cooling_hysteresis_validation() {
        assert!(AutoCooling { temp_on: 28.0, temp_off: 24.0, cooldown_secs: 60 }.is_valid());
        assert!(!AutoCooling { temp_on: 24.0, temp_off: 24.0, cooldown_secs: 60 }.is_valid());
    }
}
