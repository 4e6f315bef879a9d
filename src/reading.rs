// src/reading.rs - Sensor samples and safe envelopes

use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a monitored container (box or hub).
pub type ContainerId = String;

/// A timestamped temperature/humidity sample for one container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature in °C
    pub temperature: f64,

    /// Relative humidity in percent
    pub humidity: f64,

    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64, timestamp: DateTime<Utc>) -> Self {
        Self { temperature, humidity, timestamp }
    }

    /// Reading stamped with the current time
    pub fn now(temperature: f64, humidity: f64) -> Self {
        Self::new(temperature, humidity, Utc::now())
    }

    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }
}

/// Position of a measurement relative to an allowed range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Excursion {
    Within,
    /// Below the minimum by the given amount
    Below(f64),
    /// Above the maximum by the given amount
    Above(f64),
}

impl Excursion {
    fn measure(value: f64, min: f64, max: f64) -> Self {
        // Non-finite values are treated as infinitely out of range.
        if !value.is_finite() {
            return Excursion::Above(f64::INFINITY);
        }
        if value > max {
            Excursion::Above(value - max)
        } else if value < min {
            Excursion::Below(min - value)
        } else {
            Excursion::Within
        }
    }

    /// Distance outside the range, 0 when within
    pub fn amount(&self) -> f64 {
        match self {
            Excursion::Within => 0.0,
            Excursion::Below(d) | Excursion::Above(d) => *d,
        }
    }
}

/// Configured acceptable temperature/humidity range for a container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeEnvelope {
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

impl SafeEnvelope {
    pub fn new(temp_min: f64, temp_max: f64, humidity_min: f64, humidity_max: f64) -> Result<Self> {
        let envelope = Self { temp_min, temp_max, humidity_min, humidity_max };
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = [self.temp_min, self.temp_max, self.humidity_min, self.humidity_max];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(MonitorError::Config("Envelope bounds must be finite".into()));
        }
        if self.temp_min > self.temp_max {
            return Err(MonitorError::Config(format!(
                "Inverted temperature range [{}, {}]",
                self.temp_min, self.temp_max
            )));
        }
        if self.humidity_min > self.humidity_max {
            return Err(MonitorError::Config(format!(
                "Inverted humidity range [{}, {}]",
                self.humidity_min, self.humidity_max
            )));
        }
        Ok(())
    }

    pub fn temperature_excursion(&self, temperature: f64) -> Excursion {
        Excursion::measure(temperature, self.temp_min, self.temp_max)
    }

    pub fn humidity_excursion(&self, humidity: f64) -> Excursion {
        Excursion::measure(humidity, self.humidity_min, self.humidity_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excursion_measurement() {
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        assert_eq!(env.temperature_excursion(26.0), Excursion::Within);
        assert_eq!(env.temperature_excursion(29.0), Excursion::Above(3.0));
        assert_eq!(env.temperature_excursion(18.5), Excursion::Below(1.5));
        assert_eq!(env.humidity_excursion(f64::NAN).amount(), f64::INFINITY);
    }

    #[test]
    fn test_envelope_validation() {
        assert!(SafeEnvelope::new(30.0, 20.0, 40.0, 70.0).is_err());
        assert!(SafeEnvelope::new(20.0, 26.0, 80.0, 70.0).is_err());
        assert!(SafeEnvelope::new(20.0, f64::INFINITY, 40.0, 70.0).is_err());
    }
}
