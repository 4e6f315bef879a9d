// src/config.rs - Configuration structures and validation

use crate::classifier::ClassifierMargins;
use crate::container::{AutoCooling, Container};
use crate::error::{MonitorError, Result};
use crate::reading::{ContainerId, SafeEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine timing
    #[serde(default)]
    pub engine: EngineConfig,

    /// Classification margins
    #[serde(default)]
    pub classifier: ClassifierMargins,

    /// Fix-attempt escalation
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Live reading endpoint; without it containers are push-only
    #[serde(default)]
    pub source: SourceConfig,

    /// Cooling actuator endpoint
    #[serde(default)]
    pub actuator: ActuatorConfig,

    /// Source verification allow-list
    #[serde(default)]
    pub verification: VerificationConfig,

    /// HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// Monitored containers
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,

    /// Lab samples registered at start-up
    #[serde(default)]
    pub samples: Vec<SampleConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no engine can run with.
    ///
    /// A container without an envelope passes; it fails on its own at
    /// start-up without affecting the others.
    pub fn validate(&self) -> Result<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(MonitorError::Config("engine.poll_interval_ms must be greater than 0".into()));
        }
        if self.engine.staleness_threshold_ms <= self.engine.poll_interval_ms {
            return Err(MonitorError::Config(format!(
                "engine.staleness_threshold_ms ({}) must exceed the poll interval ({})",
                self.engine.staleness_threshold_ms, self.engine.poll_interval_ms
            )));
        }
        if self.engine.event_capacity == 0 {
            return Err(MonitorError::Config("engine.event_capacity must be greater than 0".into()));
        }
        if self.escalation.recall_threshold == 0 {
            return Err(MonitorError::Config("escalation.recall_threshold must be at least 1".into()));
        }

        let margins = [
            ("temperature_critical_margin", self.classifier.temperature_critical_margin),
            ("humidity_critical_margin", self.classifier.humidity_critical_margin),
        ];
        for (name, value) in margins {
            if !value.is_finite() || value < 0.0 {
                return Err(MonitorError::Config(format!("classifier.{} must be a non-negative number", name)));
            }
        }

        let mut seen = HashSet::new();
        for container in &self.containers {
            if container.id.trim().is_empty() {
                return Err(MonitorError::Config("container id must not be empty".into()));
            }
            if !seen.insert(container.id.as_str()) {
                return Err(MonitorError::Config(format!("duplicate container id '{}'", container.id)));
            }
            if let Some(envelope) = &container.envelope {
                envelope
                    .validate()
                    .map_err(|e| MonitorError::Config(format!("container '{}': {}", container.id, e)))?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Engine runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between two polls of one container
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Age of the last update after which a container is disconnected
    #[serde(default = "default_staleness")]
    pub staleness_threshold_ms: u64,

    /// Buffered events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            staleness_threshold_ms: default_staleness(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Failed fix attempts before a recall is recommended
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { recall_threshold: default_recall_threshold() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_actuator_timeout")]
    pub timeout_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self { base_url: None, timeout_ms: default_actuator_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Herbs verified by sensor attestation instead of a scan
    #[serde(default = "default_exempt_herbs")]
    pub exempt_herbs: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { exempt_herbs: default_exempt_herbs() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address() }
    }
}

/// One monitored container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: ContainerId,

    #[serde(default)]
    pub envelope: Option<SafeEnvelope>,

    #[serde(default)]
    pub cooling_active: bool,

    #[serde(default)]
    pub auto_cooling: Option<AutoCooling>,
}

impl ContainerConfig {
    pub fn to_container(&self) -> Container {
        let mut container = Container::new(self.id.clone(), self.envelope).with_cooling(self.cooling_active);
        if let Some(policy) = self.auto_cooling {
            container = container.with_auto_cooling(policy);
        }
        container
    }
}

/// A lab sample seeded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    pub batch_id: String,
    pub herb_name: String,
    pub box_id: String,
    pub hub_id: String,
}

fn default_poll_interval() -> u64 { 3000 }
fn default_staleness() -> u64 { 180_000 }
fn default_event_capacity() -> usize { 1024 }
fn default_recall_threshold() -> u32 { 2 }
fn default_actuator_timeout() -> u64 { 5000 }
fn default_exempt_herbs() -> Vec<String> { vec!["Tulsi".to_string()] }
fn default_bind_address() -> String { "0.0.0.0:8080".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
engine:
  poll_interval_ms: 2000
classifier:
  temperature_critical_margin: 4.0
source:
  base_url: http://iot.local
containers:
  - id: BOX-001
    envelope: { temp_min: 20.0, temp_max: 26.0, humidity_min: 40.0, humidity_max: 70.0 }
    auto_cooling: { temp_on: 27.0, temp_off: 23.0 }
  - id: BOX-002
samples:
  - batch_id: B-2024-001
    herb_name: Brahmi
    box_id: BOX-001
    hub_id: HUB-001
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.poll_interval_ms, 3000);
        assert_eq!(config.engine.staleness_threshold_ms, 180_000);
        assert_eq!(config.escalation.recall_threshold, 2);
        assert_eq!(config.verification.exempt_herbs, vec!["Tulsi".to_string()]);
        assert_eq!(config.api.bind_address, "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.engine.poll_interval_ms, 2000);
        assert_eq!(config.engine.staleness_threshold_ms, 180_000);
        assert_eq!(config.classifier.temperature_critical_margin, 4.0);
        assert_eq!(config.classifier.humidity_critical_margin, 10.0);
        assert_eq!(config.containers.len(), 2);
        assert!(config.containers[1].envelope.is_none());

        let c = config.containers[0].to_container();
        assert_eq!(c.auto_cooling.unwrap().cooldown_secs, 60);
        assert_eq!(config.samples[0].herb_name, "Brahmi");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.source.base_url.as_deref(), Some("http://iot.local"));
    }

    #[test]
    fn test_validation_rejects() {
        let mut c = Config::default();
        c.engine.poll_interval_ms = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.engine.staleness_threshold_ms = c.engine.poll_interval_ms;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.escalation.recall_threshold = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.classifier.humidity_critical_margin = -1.0;
        assert!(c.validate().is_err());

        let dup = "containers:\n  - id: BOX-1\n  - id: BOX-1\n";
        assert!(Config::from_yaml(dup).unwrap_err().is_configuration());

        let inverted = "containers:\n  - id: BOX-1\n    envelope: { temp_min: 30, temp_max: 20, humidity_min: 40, humidity_max: 70 }\n";
        assert!(Config::from_yaml(inverted).is_err());
    }
}
