// src/monitor.rs - Per-container polling task
//
// One task per container. A slow or failing source only ever delays its
// own container. Cancellation drops the in-flight fetch before anything is
// written.

use crate::engine::Engine;
use crate::error::{ConflictRule, MonitorError};
use crate::store::MonitorStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wall clock anchored to the tokio clock, so paused-time tests drive the
/// watchdog the same way real time does.
#[derive(Debug, Clone, Copy)]
struct MonitorClock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl MonitorClock {
    fn start() -> Self {
        Self { wall: Utc::now(), origin: Instant::now() }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

fn stops_monitor(err: &MonitorError) -> bool {
    err.is_configuration()
        || err.is_not_found()
        || matches!(err, MonitorError::Conflict(ConflictRule::ContainerInactive))
}

pub(crate) fn spawn<S: MonitorStore>(
    engine: Arc<Engine<S>>,
    container_id: String,
    generation: u64,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(engine, container_id, generation, token))
}

async fn run<S: MonitorStore>(engine: Arc<Engine<S>>, id: String, generation: u64, token: CancellationToken) {
    let poll = engine.poll_interval();
    let clock = MonitorClock::start();
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(container = %id, "Monitor started, polling every {:?}", poll);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(source) = engine.source() {
            let fetched = tokio::select! {
                _ = token.cancelled() => break,
                result = timeout(poll, source.fetch(&id)) => result,
            };

            match fetched {
                Ok(Ok(Some(reading))) => {
                    if let Err(e) = engine.ingest(&id, reading) {
                        if stops_monitor(&e) {
                            if e.is_configuration() {
                                engine.report_failure(&id, &e);
                            }
                            break;
                        }
                        warn!(container = %id, "Reading rejected: {}", e);
                        engine.record_miss(&id, "invalid reading");
                    }
                }
                Ok(Ok(None)) => engine.record_miss(&id, "no data"),
                Ok(Err(e)) => {
                    if e.is_transient() {
                        debug!(container = %id, "Source unavailable: {}", e);
                    } else {
                        warn!(container = %id, "Source error: {}", e);
                    }
                    engine.record_miss(&id, "source error");
                }
                Err(_) => engine.record_miss(&id, "timed out"),
            }
        }

        if let Err(e) = engine.check_staleness(&id, clock.now()) {
            if stops_monitor(&e) {
                break;
            }
        }
    }

    engine.release_monitor(&id, generation);
    info!(container = %id, "Monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::container::Container;
    use crate::reading::{Reading, SafeEnvelope};
    use crate::source::MockReadingSource;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = MonitorClock::start();
        let before = clock.now();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(clock.now() - before >= chrono::Duration::seconds(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_polls_and_ingests() {
        let mut source = MockReadingSource::new();
        source.expect_fetch().returning(|_| Ok(Some(Reading::now(29.0, 50.0))));

        let engine = Engine::new(&Config::default()).unwrap().with_source(Arc::new(source));
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        engine.register_container(Container::new("BOX-001", Some(env))).unwrap();
        let engine = Arc::new(engine);

        assert_eq!(engine.start(), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(engine.stats().readings >= 3);
        assert_eq!(engine.open_alerts().len(), 1);
        engine.shutdown().await;
        assert_eq!(engine.stats().active_monitors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_missing_envelope() {
        let engine = Arc::new(Engine::new(&Config::default()).unwrap());
        engine.register_container(Container::new("BOX-X", None)).unwrap();
        let mut rx = engine.subscribe();

        assert_eq!(engine.start(), 0);
        match rx.recv().await.unwrap() {
            crate::engine::EngineEvent::MonitorFailed { container_id, .. } => assert_eq!(container_id, "BOX-X"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_stopped_monitor_can_be_watched_again() {
        let mut source = MockReadingSource::new();
        source.expect_fetch().returning(|_| Ok(Some(Reading::now(22.0, 50.0))));

        let engine = Engine::new(&Config::default()).unwrap().with_source(Arc::new(source));
        engine.register_container(Container::new("BOX-X", None)).unwrap();
        let engine = Arc::new(engine);

        // no envelope: the first reading stops the monitor
        assert!(engine.watch("BOX-X"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.stats().active_monitors, 0);

        assert!(engine.watch("BOX-X"));
        assert!(!engine.watch("BOX-X"));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_watch_spawns_one_monitor() {
        let engine = Engine::new(&Config::default()).unwrap();
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        engine.register_container(Container::new("BOX-001", Some(env))).unwrap();
        let engine = Arc::new(engine);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.watch("BOX-001") })
            })
            .collect();

        let mut started = 0;
        for task in tasks {
            if task.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(engine.stats().active_monitors, 1);
        engine.shutdown().await;
    }
}
