// src/engine.rs - Monitoring engine
//
// Every container mutation runs inside one `update_container` critical
// section: tracker ingest, alert lifecycle, auto-cooling and recall advice.
// Events are published and actuator commands sent after the section ends.

use crate::actuator::{self, CoolingActuator, HttpActuator, LoggingActuator, Power};
use crate::alerts::{Alert, AlertId, AlertLifecycle, AlertMutation, ResolveOutcome};
use crate::config::Config;
use crate::container::{ConditionState, Container};
use crate::dashboard::{Banner, DashboardAggregator, DashboardSummary};
use crate::error::{ConflictRule, MonitorError, Result};
use crate::escalation::EscalationLevel;
use crate::monitor;
use crate::reading::{ContainerId, Reading};
use crate::recall::{Recall, RecallAdvisor, RecallRecommendation, RecallRequest};
use crate::sample::{Sample, SampleId, SampleUpdate};
use crate::source::{HttpReadingSource, ReadingSource};
use crate::store::{InMemoryStore, MonitorStore};
use crate::tracker::{ConditionTracker, TransitionEvent};
use crate::verification::{ExemptionList, SourceVerificationGate, Verification};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

// ============================================================================
// EVENTS AND VIEWS
// ============================================================================

/// Notification published to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Transition(TransitionEvent),
    AlertOpened(Alert),
    AlertEscalated(Alert),
    AlertResolved(Alert),
    ResolveRejected {
        alert: Alert,
        fix_attempts: u32,
        level: EscalationLevel,
    },
    RecallRecommended(RecallRecommendation),
    RecallCreated(Recall),
    CoolingChanged {
        container_id: ContainerId,
        power: Power,
        automatic: bool,
    },
    SampleUpdated(Sample),
    MonitorFailed {
        container_id: ContainerId,
        error: String,
    },
}

/// Result of ingesting one reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub transition: Option<TransitionEvent>,
    pub alerts: AlertMutation,
    pub cooling: Option<Power>,
}

/// Container as listed to operators
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatus {
    #[serde(flatten)]
    pub container: Container,
    pub condition: ConditionState,
    /// Data older than the staleness threshold
    pub stale: bool,
    pub open_alerts: usize,
    pub escalation: EscalationLevel,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub containers: usize,
    pub active_monitors: usize,
    pub readings: u64,
    pub missed_samples: u64,
    pub transitions: u64,
    pub alerts_opened: u64,
    pub alerts_resolved: u64,
    pub recalls_created: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    readings: AtomicU64,
    missed: AtomicU64,
    transitions: AtomicU64,
    alerts_opened: AtomicU64,
    alerts_resolved: AtomicU64,
    recalls: AtomicU64,
}

struct MonitorHandle {
    /// Distinguishes a re-watched container's task from its predecessor
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine<S: MonitorStore = InMemoryStore> {
    store: S,
    tracker: ConditionTracker,
    lifecycle: AlertLifecycle,
    advisor: RecallAdvisor,
    aggregator: DashboardAggregator,
    gate: SourceVerificationGate,
    source: Option<Arc<dyn ReadingSource>>,
    actuator: Arc<dyn CoolingActuator>,
    events: broadcast::Sender<EngineEvent>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    monitors: DashMap<ContainerId, MonitorHandle>,
    monitor_generation: AtomicU64,
    running: AtomicBool,
    counters: Counters,
    start_time: Instant,
}

impl Engine<InMemoryStore> {
    /// Engine over an in-memory store, with HTTP source and actuator when
    /// their endpoints are configured.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_store(config, InMemoryStore::new())
    }
}

impl<S: MonitorStore> Engine<S> {
    pub fn with_store(config: &Config, store: S) -> Result<Self> {
        config.validate()?;

        let staleness = chrono::Duration::milliseconds(
            i64::try_from(config.engine.staleness_threshold_ms)
                .map_err(|_| MonitorError::Config("staleness threshold out of range".into()))?,
        );
        let threshold = config.escalation.recall_threshold;
        let poll_interval = config.engine.poll_interval();

        let source: Option<Arc<dyn ReadingSource>> = match &config.source.base_url {
            Some(url) => Some(Arc::new(HttpReadingSource::new(url.clone(), poll_interval)?)),
            None => None,
        };
        let actuator: Arc<dyn CoolingActuator> = match &config.actuator.base_url {
            Some(url) => Arc::new(HttpActuator::new(
                url.clone(),
                Duration::from_millis(config.actuator.timeout_ms),
            )?),
            None => Arc::new(LoggingActuator),
        };

        let (events, _) = broadcast::channel(config.engine.event_capacity);

        let engine = Self {
            store,
            tracker: ConditionTracker::new(config.classifier, staleness),
            lifecycle: AlertLifecycle::new(threshold),
            advisor: RecallAdvisor::new(threshold),
            aggregator: DashboardAggregator::new(threshold, staleness),
            gate: SourceVerificationGate::new(ExemptionList::new(config.verification.exempt_herbs.clone())),
            source,
            actuator,
            events,
            poll_interval,
            shutdown: CancellationToken::new(),
            monitors: DashMap::new(),
            monitor_generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            counters: Counters::default(),
            start_time: Instant::now(),
        };

        for container in &config.containers {
            let c = container.to_container();
            if let Some(policy) = &c.auto_cooling {
                if !policy.is_valid() {
                    warn!(container = %c.id, "Auto cooling needs temp_on > temp_off, policy disabled");
                }
            }
            engine.register_container(c)?;
        }
        for sample in &config.samples {
            engine.register_sample(&sample.batch_id, &sample.herb_name, &sample.box_id, &sample.hub_id);
        }

        info!(
            "Engine configured with {} containers, poll interval {}ms",
            config.containers.len(),
            config.engine.poll_interval_ms
        );
        Ok(engine)
    }

    pub fn with_source(mut self, source: Arc<dyn ReadingSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_actuator(mut self, actuator: Arc<dyn CoolingActuator>) -> Self {
        self.actuator = actuator;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn source(&self) -> Option<Arc<dyn ReadingSource>> {
        self.source.clone()
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_mutation(&self, mutation: &AlertMutation) {
        for alert in &mutation.opened {
            self.counters.alerts_opened.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("coldchain_alerts_opened_total").increment(1);
            self.publish(EngineEvent::AlertOpened(alert.clone()));
        }
        for alert in &mutation.escalated {
            self.publish(EngineEvent::AlertEscalated(alert.clone()));
        }
        for alert in &mutation.resolved {
            self.counters.alerts_resolved.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("coldchain_alerts_resolved_total").increment(1);
            self.publish(EngineEvent::AlertResolved(alert.clone()));
        }
    }

    // ------------------------------------------------------------------------
    // Containers and readings
    // ------------------------------------------------------------------------

    pub fn register_container(&self, container: Container) -> Result<()> {
        if container.envelope.is_none() {
            warn!(container = %container.id, "Registered without a safe envelope");
        }
        self.store.register(container)
    }

    /// Stop monitoring a container. History is kept.
    pub fn deactivate_container(&self, id: &str) -> Result<()> {
        self.store.update_container(id, |rec| rec.container.active = false)?;
        if let Some((_, monitor)) = self.monitors.remove(id) {
            monitor.token.cancel();
        }
        info!(container = id, "Container deactivated");
        Ok(())
    }

    pub fn container(&self, id: &str) -> Result<Container> {
        self.store
            .container(id)
            .ok_or_else(|| MonitorError::ContainerNotFound(id.to_string()))
    }

    pub fn containers(&self) -> Vec<ContainerStatus> {
        let now = Utc::now();
        let alerts = self.store.alerts();
        self.store
            .containers()
            .into_iter()
            .map(|c| {
                let open_alerts = alerts.iter().filter(|a| !a.resolved && a.container_id == c.id).count();
                ContainerStatus {
                    condition: c.condition(),
                    stale: c.is_stale(now, self.tracker.staleness()),
                    open_alerts,
                    escalation: EscalationLevel::from_attempts(c.fix_attempts, self.advisor.threshold()),
                    container: c,
                }
            })
            .collect()
    }

    /// Process one reading for a container.
    pub fn ingest(&self, id: &str, reading: Reading) -> Result<IngestOutcome> {
        let now = Utc::now();
        let (outcome, recommendation, accepted) = self.store.update_container(id, |rec| -> Result<_> {
            if !rec.container.active {
                return Err(MonitorError::Conflict(ConflictRule::ContainerInactive));
            }

            let transition = self.tracker.ingest(rec, reading)?;
            let accepted = rec.container.last_reading.map(|r| r.timestamp) == Some(reading.timestamp);

            let alerts = transition
                .as_ref()
                .map(|ev| self.lifecycle.on_transition(rec, ev))
                .unwrap_or_default();

            let cooling = match (accepted, rec.container.auto_cooling) {
                (true, Some(policy)) => actuator::decide(&policy, &rec.container, &reading, now),
                _ => None,
            };
            if let Some(power) = cooling {
                rec.container.cooling_active = power.is_on();
                rec.container.last_cooling_switch = Some(now);
            }

            let recommendation = transition.as_ref().and_then(|_| self.advisor.evaluate(&rec.container));
            Ok((IngestOutcome { transition, alerts, cooling }, recommendation, accepted))
        })??;

        // out-of-order drops are not counted
        if accepted {
            self.counters.readings.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("coldchain_readings_total").increment(1);
        }

        if let Some(ev) = &outcome.transition {
            self.counters.transitions.fetch_add(1, Ordering::Relaxed);
            self.publish(EngineEvent::Transition(ev.clone()));
        }
        self.publish_mutation(&outcome.alerts);

        if let Some(power) = outcome.cooling {
            info!(container = id, ?power, "Auto cooling switched");
            actuator::dispatch(self.actuator.clone(), id.to_string(), power);
            self.publish(EngineEvent::CoolingChanged { container_id: id.to_string(), power, automatic: true });
        }
        if let Some(rec) = recommendation {
            self.publish(EngineEvent::RecallRecommended(self.with_batches(rec)));
        }

        Ok(outcome)
    }

    /// Watchdog check for one container.
    pub fn check_staleness(&self, id: &str, now: DateTime<Utc>) -> Result<Option<TransitionEvent>> {
        let (transition, mutation) = self.store.update_container(id, |rec| {
            let transition = self.tracker.check_staleness(rec, now);
            let mutation = transition
                .as_ref()
                .map(|ev| self.lifecycle.on_transition(rec, ev))
                .unwrap_or_default();
            (transition, mutation)
        })?;

        if let Some(ev) = &transition {
            self.counters.transitions.fetch_add(1, Ordering::Relaxed);
            self.publish(EngineEvent::Transition(ev.clone()));
        }
        self.publish_mutation(&mutation);
        Ok(transition)
    }

    pub(crate) fn record_miss(&self, id: &str, reason: &str) {
        self.counters.missed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("coldchain_missed_samples_total").increment(1);
        debug!(container = id, "Missed sample: {}", reason);
    }

    pub(crate) fn report_failure(&self, id: &str, err: &MonitorError) {
        error!(container = id, "Monitor stopped: {}", err);
        self.publish(EngineEvent::MonitorFailed { container_id: id.to_string(), error: err.to_string() });
    }

    /// Operator cooling toggle, applied optimistically.
    ///
    /// Switching cooling off while the container is not safe opens a
    /// manual-action alert.
    pub fn set_cooling(&self, id: &str, power: Power, operator: &str) -> Result<Option<Alert>> {
        let now = Utc::now();
        let manual = self.store.update_container(id, |rec| -> Result<_> {
            if !rec.container.active {
                return Err(MonitorError::Conflict(ConflictRule::ContainerInactive));
            }
            rec.container.cooling_active = power.is_on();
            rec.container.last_cooling_switch = Some(now);

            if power == Power::Off && !rec.container.condition().is_safe() {
                let note = format!("cooling switched off by {}", operator);
                return Ok(self.lifecycle.record_manual_action(rec, &note, now));
            }
            Ok(None)
        })??;

        info!(container = id, operator, ?power, "Cooling toggled");
        actuator::dispatch(self.actuator.clone(), id.to_string(), power);
        self.publish(EngineEvent::CoolingChanged { container_id: id.to_string(), power, automatic: false });
        if let Some(alert) = &manual {
            self.counters.alerts_opened.fetch_add(1, Ordering::Relaxed);
            self.publish(EngineEvent::AlertOpened(alert.clone()));
        }
        Ok(manual)
    }

    // ------------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------------

    pub fn alerts(&self) -> Vec<Alert> {
        self.store.alerts()
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.store.alerts().into_iter().filter(|a| !a.resolved).collect()
    }

    /// Operator claims the condition behind an alert is fixed.
    pub fn resolve_alert(&self, alert_id: &AlertId, operator: &str) -> Result<ResolveOutcome> {
        let container_id = self
            .store
            .locate_alert(alert_id)
            .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))?;
        let now = Utc::now();

        let (outcome, recommendation) = self.store.update_container(&container_id, |rec| -> Result<_> {
            let outcome = self.lifecycle.resolve(rec, alert_id, operator, now)?;
            let recommendation = match &outcome {
                ResolveOutcome::Rejected { .. } => self.advisor.evaluate(&rec.container),
                ResolveOutcome::Accepted { .. } => None,
            };
            Ok((outcome, recommendation))
        })??;

        match &outcome {
            ResolveOutcome::Accepted { alert } => {
                self.counters.alerts_resolved.fetch_add(1, Ordering::Relaxed);
                self.publish(EngineEvent::AlertResolved(alert.clone()));
            }
            ResolveOutcome::Rejected { alert, fix_attempts, level } => {
                self.publish(EngineEvent::ResolveRejected {
                    alert: alert.clone(),
                    fix_attempts: *fix_attempts,
                    level: *level,
                });
            }
        }
        if let Some(rec) = recommendation {
            warn!(container = %rec.container_id, "Recall recommended: {}", rec.reason);
            self.publish(EngineEvent::RecallRecommended(self.with_batches(rec)));
        }
        Ok(outcome)
    }

    pub fn banner(&self) -> Option<Banner> {
        self.aggregator
            .aggregate(&self.store.containers(), &self.store.alerts(), &self.store.recalls())
    }

    pub fn dashboard(&self) -> DashboardSummary {
        let containers = self.store.containers();
        let alerts = self.store.alerts();
        let recalls = self.store.recalls();
        let pending = self.recommendations().len();
        let summary = self.aggregator.summarize(&containers, &alerts, &recalls, pending, Utc::now());

        #[cfg(feature = "metrics")]
        gauge!("coldchain_open_alerts").set(summary.open_alerts as f64);

        summary
    }

    // ------------------------------------------------------------------------
    // Recalls
    // ------------------------------------------------------------------------

    fn with_batches(&self, mut rec: RecallRecommendation) -> RecallRecommendation {
        let mut batches: Vec<_> = self
            .store
            .samples()
            .into_iter()
            .filter(|s| s.box_id == rec.container_id || s.hub_id == rec.container_id)
            .map(|s| s.batch_id)
            .collect();
        batches.sort();
        batches.dedup();
        rec.affected_batches = batches;
        rec
    }

    /// Pending recall advice for active containers
    pub fn recommendations(&self) -> Vec<RecallRecommendation> {
        self.store
            .containers()
            .iter()
            .filter(|c| c.active)
            .filter_map(|c| self.advisor.evaluate(c))
            .map(|rec| self.with_batches(rec))
            .collect()
    }

    /// Operator-confirmed recall. One open recall per batch.
    pub fn create_recall(&self, request: RecallRequest) -> Result<Recall> {
        if let Some(container_id) = &request.container_id {
            self.container(container_id)?;
        }
        let now = Utc::now();
        let batch_id = request.batch_id.clone();

        let recall = self.store.update_batch(&batch_id, |ledger| {
            if ledger.open_recall().is_some() {
                return Err(MonitorError::Conflict(ConflictRule::RecallAlreadyOpen));
            }
            let recall = Recall::open(request, now);
            ledger.recalls.push(recall.clone());
            Ok(recall)
        })?;

        self.counters.recalls.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("coldchain_recalls_total").increment(1);
        warn!(batch = %recall.batch_id, by = %recall.created_by, "Recall created: {}", recall.reason);
        self.publish(EngineEvent::RecallCreated(recall.clone()));
        Ok(recall)
    }

    pub fn recalls(&self) -> Vec<Recall> {
        self.store.recalls()
    }

    pub fn open_recalls(&self) -> Vec<Recall> {
        self.store.recalls().into_iter().filter(|r| r.is_open()).collect()
    }

    // ------------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------------

    pub fn register_sample(&self, batch_id: &str, herb_name: &str, box_id: &str, hub_id: &str) -> Sample {
        let sample = Sample::new(self.store.next_sample_id(), batch_id, herb_name, box_id, hub_id);
        debug!(sample = sample.id, batch = batch_id, "Sample registered");
        self.store.insert_sample(sample.clone());
        sample
    }

    pub fn sample(&self, id: SampleId) -> Result<Sample> {
        self.store.sample(id).ok_or(MonitorError::SampleNotFound(id))
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.store.samples()
    }

    /// Verify a sample's source.
    ///
    /// Exempt herbs without a scanned code go through sensor attestation.
    pub fn verify_sample(&self, id: SampleId, code: Option<&str>) -> Result<Verification> {
        let sample = self.sample(id)?;

        let verification = match code {
            None if self.gate.is_exempt(&sample) => {
                let container = self.store.container(&sample.box_id);
                self.gate.attest(&sample, container.as_ref())?
            }
            _ => self.gate.verify_scan(&sample, code.unwrap_or_default()),
        };

        if !verification.matched {
            info!(sample = id, "Source verification failed");
            return Ok(verification);
        }

        let now = Utc::now();
        let updated = self.store.update_batch(&sample.batch_id, |ledger| {
            if ledger.open_recall().is_some() {
                return Err(MonitorError::Conflict(ConflictRule::SampleLockedByRecall));
            }
            let sample = ledger.sample_mut(id).ok_or(MonitorError::SampleNotFound(id))?;
            sample.verified = true;
            sample.updated_at = now;
            Ok(sample.clone())
        })?;

        info!(sample = id, method = ?verification.method, "Source verified");
        self.publish(EngineEvent::SampleUpdated(updated));
        Ok(verification)
    }

    /// Write a lab result, subject to the recall lock and verification rules.
    pub fn update_sample(&self, id: SampleId, update: SampleUpdate) -> Result<Sample> {
        let batch_id = self.store.locate_sample(id).ok_or(MonitorError::SampleNotFound(id))?;
        let now = Utc::now();

        let result = self.store.update_batch(&batch_id, |ledger| -> Result<Sample> {
            let recall_open = ledger.open_recall().is_some();
            let sample = ledger.sample_mut(id).ok_or(MonitorError::SampleNotFound(id))?;
            self.gate.check_update(sample, &update, recall_open)?;
            sample.apply(&update, now);
            Ok(sample.clone())
        });

        match result {
            Ok(sample) => {
                info!(sample = id, batch = %batch_id, "Sample updated");
                self.publish(EngineEvent::SampleUpdated(sample.clone()));
                Ok(sample)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(sample = id, batch = %batch_id, "Sample update rejected: {}", e);
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn one monitor per active container. Returns the number spawned.
    ///
    /// Containers without a safe envelope are reported and skipped; the
    /// rest start normally.
    pub fn start(self: &Arc<Self>) -> usize {
        self.running.store(true, Ordering::SeqCst);
        if self.source.is_none() {
            info!("No reading source configured, monitors run the watchdog only");
        }

        let mut spawned = 0;
        for container in self.store.containers().into_iter().filter(|c| c.active) {
            if container.envelope.is_none() {
                self.report_failure(&container.id, &MonitorError::MissingEnvelope(container.id.clone()));
                continue;
            }
            if self.watch(&container.id) {
                spawned += 1;
            }
        }

        info!("Engine started with {} monitors", spawned);
        spawned
    }

    /// Start monitoring one container if it is not already monitored.
    pub fn watch(self: &Arc<Self>, id: &str) -> bool {
        match self.monitors.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let generation = self.monitor_generation.fetch_add(1, Ordering::Relaxed);
                let token = self.shutdown.child_token();
                let handle = monitor::spawn(Arc::clone(self), id.to_string(), generation, token.clone());
                slot.insert(MonitorHandle { generation, token, handle });
                true
            }
        }
    }

    /// Drop the handle of a monitor that stopped on its own, unless the
    /// slot already belongs to a newer one.
    pub(crate) fn release_monitor(&self, id: &str, generation: u64) {
        if self.monitors.remove_if(id, |_, m| m.generation == generation).is_some() {
            debug!(container = id, generation, "Monitor slot released");
        }
    }

    /// Cancel every monitor and wait for them to finish.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let ids: Vec<ContainerId> = self.monitors.iter().map(|m| m.key().clone()).collect();
        let pending: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.monitors.remove(&id))
            .map(|(id, monitor)| async move { (id, monitor.handle.await) })
            .collect();

        for (id, result) in join_all(pending).await {
            if let Err(e) = result {
                warn!(container = %id, "Monitor task ended abnormally: {}", e);
            }
        }
        info!("Engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            containers: self.store.containers().len(),
            active_monitors: self.monitors.iter().filter(|m| !m.handle.is_finished()).count(),
            readings: self.counters.readings.load(Ordering::Relaxed),
            missed_samples: self.counters.missed.load(Ordering::Relaxed),
            transitions: self.counters.transitions.load(Ordering::Relaxed),
            alerts_opened: self.counters.alerts_opened.load(Ordering::Relaxed),
            alerts_resolved: self.counters.alerts_resolved.load(Ordering::Relaxed),
            recalls_created: self.counters.recalls.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ConditionKind;
    use crate::reading::SafeEnvelope;
    use crate::sample::TestResult;

    fn engine() -> Engine {
        let engine = Engine::new(&Config::default()).unwrap();
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        engine.register_container(Container::new("BOX-001", Some(env))).unwrap();
        engine
    }

    #[tokio::test]
    async fn test_ingest_publishes_events() {
        let engine = engine();
        let mut rx = engine.subscribe();

        engine.ingest("BOX-001", Reading::now(29.0, 50.0)).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::Transition(_)));
        match rx.recv().await.unwrap() {
            EngineEvent::AlertOpened(alert) => assert_eq!(alert.kind, ConditionKind::HighTemperature),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_container() {
        let engine = engine();
        assert!(engine.ingest("BOX-404", Reading::now(22.0, 50.0)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_out_of_order_reading_not_counted() {
        let engine = engine();
        let now = Utc::now();
        engine.ingest("BOX-001", Reading::new(22.0, 50.0, now)).unwrap();
        let outcome = engine
            .ingest("BOX-001", Reading::new(35.0, 50.0, now - chrono::Duration::seconds(30)))
            .unwrap();

        assert!(outcome.transition.is_none());
        assert_eq!(engine.stats().readings, 1);
        assert_eq!(engine.container("BOX-001").unwrap().last_reading.unwrap().temperature, 22.0);
    }

    #[test]
    fn test_inactive_container_rejects_readings() {
        let engine = engine();
        engine.deactivate_container("BOX-001").unwrap();
        let err = engine.ingest("BOX-001", Reading::now(22.0, 50.0)).unwrap_err();
        assert!(matches!(err, MonitorError::Conflict(ConflictRule::ContainerInactive)));
        assert!(!engine.container("BOX-001").unwrap().active);
    }

    #[tokio::test]
    async fn test_cooling_off_while_unsafe_opens_manual_alert() {
        let engine = engine();
        engine.ingest("BOX-001", Reading::now(30.0, 50.0)).unwrap();

        assert!(engine.set_cooling("BOX-001", Power::On, "op").unwrap().is_none());
        assert!(engine.container("BOX-001").unwrap().cooling_active);

        let manual = engine.set_cooling("BOX-001", Power::Off, "op").unwrap().unwrap();
        assert_eq!(manual.kind, ConditionKind::ManualAction);
        assert_eq!(manual.severity, crate::alerts::Severity::Info);
        // deduplicated
        assert!(engine.set_cooling("BOX-001", Power::Off, "op").unwrap().is_none());
        assert_eq!(engine.open_alerts().len(), 2);

        engine.ingest("BOX-001", Reading::now(23.0, 50.0)).unwrap();
        assert!(engine.open_alerts().is_empty());
    }

    #[test]
    fn test_recall_locks_sample() {
        let engine = engine();
        let sample = engine.register_sample("B-2024-002", "Ashwagandha", "BOX-001", "HUB-001");

        engine.create_recall(RecallRequest::new("B-2024-002", "moisture exceeded safe limit")).unwrap();
        let again = engine.create_recall(RecallRequest::new("B-2024-002", "again")).unwrap_err();
        assert!(matches!(again, MonitorError::Conflict(ConflictRule::RecallAlreadyOpen)));

        let err = engine.update_sample(sample.id, SampleUpdate::result(TestResult::Fail)).unwrap_err();
        assert_eq!(err.to_string(), "Conflict: sample is locked due to recall");
    }

    #[test]
    fn test_recall_for_unknown_container() {
        let engine = engine();
        let err = engine
            .create_recall(RecallRequest::new("B-1", "x").for_container("BOX-404"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.open_recalls().is_empty());
    }

    #[test]
    fn test_stats_count_activity() {
        let engine = engine();
        engine.ingest("BOX-001", Reading::now(29.0, 50.0)).unwrap();
        engine.ingest("BOX-001", Reading::now(22.0, 50.0)).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.readings, 2);
        assert_eq!(stats.transitions, 2);
        assert_eq!(stats.alerts_opened, 1);
        assert_eq!(stats.alerts_resolved, 1);
        assert!(!stats.running);
    }
}
