// src/source.rs - Reading sources polled by container monitors

use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Supplier of live samples for a container.
///
/// `Ok(None)` means the source had nothing new this cycle. Errors are
/// treated as missed samples by the monitor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self, container_id: &str) -> Result<Option<Reading>>;
}

#[derive(Debug, Deserialize)]
struct LivePayload {
    temperature: f64,
    humidity: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Polls `GET {base_url}/sensors/{id}/live`
#[derive(Debug, Clone)]
pub struct HttpReadingSource {
    client: Client,
    base_url: String,
}

impl HttpReadingSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn live_url(&self, container_id: &str) -> String {
        format!("{}/sensors/{}/live", self.base_url, container_id)
    }
}

#[async_trait]
impl ReadingSource for HttpReadingSource {
    async fn fetch(&self, container_id: &str) -> Result<Option<Reading>> {
        let url = self.live_url(container_id);
        trace!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(container = container_id, "No live data");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(MonitorError::Transient(format!("{} returned {}", url, status)));
            }
            _ => {}
        }

        let payload: LivePayload = response.json().await?;
        let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
        Ok(Some(Reading::new(payload.temperature, payload.humidity, timestamp)))
    }
}

/// Random-walk source for demos and soak runs
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    temperatures: Arc<DashMap<String, f64>>,
    base_temperature: f64,
    base_humidity: f64,
    step: f64,
    drop_rate: f64,
}

impl SimulatedSource {
    pub fn new(base_temperature: f64, base_humidity: f64) -> Self {
        Self {
            temperatures: Arc::new(DashMap::new()),
            base_temperature,
            base_humidity,
            step: 0.5,
            drop_rate: 0.0,
        }
    }

    /// Largest temperature change between two samples
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.abs();
        self
    }

    /// Probability in `[0, 1]` that a fetch yields no data
    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = rate.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl ReadingSource for SimulatedSource {
    async fn fetch(&self, container_id: &str) -> Result<Option<Reading>> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.drop_rate) {
            return Ok(None);
        }

        let delta = if self.step > 0.0 { rng.gen_range(-self.step..=self.step) } else { 0.0 };
        let humidity = self.base_humidity + rng.gen_range(-2.0..=2.0);

        let mut temp = self
            .temperatures
            .entry(container_id.to_string())
            .or_insert(self.base_temperature);
        *temp += delta;

        Ok(Some(Reading::now(*temp, humidity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_url() {
        let source = HttpReadingSource::new("http://iot.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.live_url("BOX-001"), "http://iot.local/sensors/BOX-001/live");
    }

    #[test]
    fn test_live_payload_without_timestamp() {
        let p: LivePayload = serde_json::from_str(r#"{"temperature":24.5,"humidity":51}"#).unwrap();
        assert_eq!(p.temperature, 24.5);
        assert!(p.timestamp.is_none());
    }

    #[tokio::test]
    async fn test_simulated_source_walks_per_container() {
        let source = SimulatedSource::new(22.0, 50.0).with_step(0.0);
        let a = source.fetch("BOX-1").await.unwrap().unwrap();
        assert_eq!(a.temperature, 22.0);

        let dropping = SimulatedSource::new(22.0, 50.0).with_drop_rate(1.0);
        assert!(dropping.fetch("BOX-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mut mock = MockReadingSource::new();
        mock.expect_fetch()
            .withf(|id| id == "BOX-9")
            .returning(|_| Ok(Some(Reading::now(25.0, 50.0))));
        assert!(mock.fetch("BOX-9").await.unwrap().is_some());
    }
}
