// src/actuator.rs - Cooling control
//
// Commands are fire-and-forget. The engine flips `cooling_active` before the
// call goes out and never waits for the device.

use crate::container::{AutoCooling, Container};
use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn is_on(self) -> bool {
        self == Power::On
    }
}

impl From<bool> for Power {
    fn from(on: bool) -> Self {
        if on { Power::On } else { Power::Off }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoolingActuator: Send + Sync {
    async fn set_cooling(&self, container_id: &str, power: Power) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PeltierCommand {
    power: Power,
}

/// Sends `POST {base_url}/actuators/{id}/peltier`
#[derive(Debug, Clone)]
pub struct HttpActuator {
    client: Client,
    base_url: String,
}

impl HttpActuator {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn peltier_url(&self, container_id: &str) -> String {
        format!("{}/actuators/{}/peltier", self.base_url, container_id)
    }
}

#[async_trait]
impl CoolingActuator for HttpActuator {
    async fn set_cooling(&self, container_id: &str, power: Power) -> Result<()> {
        let response = self
            .client
            .post(self.peltier_url(container_id))
            .json(&PeltierCommand { power })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::Transient(format!(
                "actuator for {} returned {}",
                container_id,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Actuator that only logs, used when no actuator endpoint is configured
#[derive(Debug, Clone, Default)]
pub struct LoggingActuator;

#[async_trait]
impl CoolingActuator for LoggingActuator {
    async fn set_cooling(&self, container_id: &str, power: Power) -> Result<()> {
        debug!(container = container_id, ?power, "Cooling command (no actuator configured)");
        Ok(())
    }
}

/// Send a command without waiting for the result. Failures are logged as
/// transient.
pub fn dispatch(actuator: Arc<dyn CoolingActuator>, container_id: String, power: Power) {
    tokio::spawn(async move {
        if let Err(e) = actuator.set_cooling(&container_id, power).await {
            warn!(container = %container_id, ?power, "Cooling command failed: {}", e);
        }
    });
}

/// Hysteresis decision for automatic cooling.
///
/// Returns the new power state, or `None` to hold.
pub fn decide(policy: &AutoCooling, container: &Container, reading: &Reading, now: DateTime<Utc>) -> Option<Power> {
    if !policy.is_valid() {
        return None;
    }

    if let Some(last) = container.last_cooling_switch {
        let cooldown = Duration::seconds(i64::try_from(policy.cooldown_secs).unwrap_or(i64::MAX));
        if now - last < cooldown {
            return None;
        }
    }

    if !container.cooling_active && reading.temperature >= policy.temp_on {
        Some(Power::On)
    } else if container.cooling_active && reading.temperature <= policy.temp_off {
        Some(Power::Off)
    } else {
        None
    }
}
