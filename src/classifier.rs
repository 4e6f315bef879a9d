// src/classifier.rs - Reading → safety state classification
//
// Pure functions only. Margins come from configuration so boundaries can be
// probed exactly in tests.

use crate::alerts::ConditionKind;
use crate::reading::{Excursion, Reading, SafeEnvelope};
use serde::{Deserialize, Serialize};

/// Safety classification of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyState {
    Safe,
    Warning,
    Critical,
}

impl SafetyState {
    pub fn is_safe(self) -> bool {
        self == SafetyState::Safe
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SafetyState::Safe => "safe",
            SafetyState::Warning => "warning",
            SafetyState::Critical => "critical",
        }
    }
}

/// Distance outside the envelope at which an excursion becomes critical.
///
/// Any excursion strictly beyond the envelope but short of the margin is a
/// warning; reaching the margin is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMargins {
    #[serde(default = "default_temperature_margin")]
    pub temperature_critical_margin: f64,

    #[serde(default = "default_humidity_margin")]
    pub humidity_critical_margin: f64,
}

impl Default for ClassifierMargins {
    fn default() -> Self {
        Self {
            temperature_critical_margin: default_temperature_margin(),
            humidity_critical_margin: default_humidity_margin(),
        }
    }
}

fn default_temperature_margin() -> f64 { 5.0 }
fn default_humidity_margin() -> f64 { 10.0 }

/// Classification result together with the condition that drove it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnosis {
    pub state: SafetyState,
    /// `None` when the state is `Safe`
    pub kind: Option<ConditionKind>,
}

fn grade(excursion: &Excursion, critical_margin: f64) -> SafetyState {
    let amount = excursion.amount();
    if amount <= 0.0 {
        SafetyState::Safe
    } else if amount >= critical_margin {
        SafetyState::Critical
    } else {
        SafetyState::Warning
    }
}

/// Map a reading against an envelope to a safety state.
pub fn classify(reading: &Reading, envelope: &SafeEnvelope, margins: &ClassifierMargins) -> SafetyState {
    diagnose(reading, envelope, margins).state
}

/// Like [`classify`], also naming the condition kind behind the state.
///
/// When both dimensions are out of range the worse one wins; on a tie the
/// temperature condition is reported.
pub fn diagnose(reading: &Reading, envelope: &SafeEnvelope, margins: &ClassifierMargins) -> Diagnosis {
    let temperature = envelope.temperature_excursion(reading.temperature);
    let humidity = envelope.humidity_excursion(reading.humidity);

    let temp_state = grade(&temperature, margins.temperature_critical_margin);
    let hum_state = grade(&humidity, margins.humidity_critical_margin);

    if temp_state.is_safe() && hum_state.is_safe() {
        return Diagnosis { state: SafetyState::Safe, kind: None };
    }

    if temp_state >= hum_state {
        let kind = match temperature {
            Excursion::Below(_) => ConditionKind::LowTemperature,
            _ => ConditionKind::HighTemperature,
        };
        Diagnosis { state: temp_state, kind: Some(kind) }
    } else {
        Diagnosis { state: hum_state, kind: Some(ConditionKind::HumidityOutOfRange) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> SafeEnvelope {
        SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap()
    }

    fn at(temp: f64, humidity: f64) -> Reading {
        Reading::now(temp, humidity)
    }

    #[test]
    fn test_temperature_boundaries() {
        let m = ClassifierMargins::default();
        let env = envelope();
        assert_eq!(classify(&at(26.0, 50.0), &env, &m), SafetyState::Safe);
        assert_eq!(classify(&at(27.0, 50.0), &env, &m), SafetyState::Warning);
        assert_eq!(classify(&at(26.0 + 1e-9, 50.0), &env, &m), SafetyState::Warning);
        assert_eq!(classify(&at(30.9, 50.0), &env, &m), SafetyState::Warning);
        assert_eq!(classify(&at(31.0, 50.0), &env, &m), SafetyState::Critical);
    }

    #[test]
    fn test_reference_sequence() {
        let m = ClassifierMargins::default();
        let env = envelope();
        let states: Vec<_> = [22.0, 29.0, 31.0, 24.0]
            .iter()
            .map(|t| classify(&at(*t, 55.0), &env, &m))
            .collect();
        assert_eq!(
            states,
            vec![SafetyState::Safe, SafetyState::Warning, SafetyState::Critical, SafetyState::Safe]
        );
    }

    #[test]
    fn test_low_temperature_and_humidity() {
        let m = ClassifierMargins::default();
        let env = envelope();

        let d = diagnose(&at(18.0, 50.0), &env, &m);
        assert_eq!(d.state, SafetyState::Warning);
        assert_eq!(d.kind, Some(ConditionKind::LowTemperature));

        let d = diagnose(&at(22.0, 75.0), &env, &m);
        assert_eq!(d.state, SafetyState::Warning);
        assert_eq!(d.kind, Some(ConditionKind::HumidityOutOfRange));

        let d = diagnose(&at(22.0, 85.0), &env, &m);
        assert_eq!(d.state, SafetyState::Critical);
    }

    #[test]
    fn test_worse_dimension_wins() {
        let m = ClassifierMargins::default();
        let env = envelope();

        // warning temperature, critical humidity
        let d = diagnose(&at(27.0, 90.0), &env, &m);
        assert_eq!(d.state, SafetyState::Critical);
        assert_eq!(d.kind, Some(ConditionKind::HumidityOutOfRange));

        // tie goes to temperature
        let d = diagnose(&at(27.0, 71.0), &env, &m);
        assert_eq!(d.kind, Some(ConditionKind::HighTemperature));
    }

    #[test]
    fn test_margins_are_parameters() {
        let env = envelope();
        let tight = ClassifierMargins { temperature_critical_margin: 1.0, humidity_critical_margin: 1.0 };
        assert_eq!(classify(&at(27.0, 50.0), &env, &tight), SafetyState::Critical);
    }

    #[test]
    fn test_non_finite_is_critical() {
        let m = ClassifierMargins::default();
        assert_eq!(classify(&at(f64::NAN, 50.0), &envelope(), &m), SafetyState::Critical);
    }
}
