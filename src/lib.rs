//! coldchain - storage condition monitoring and alert escalation
//!
//! Ingests temperature/humidity readings per storage container, classifies
//! them against each container's safe envelope, keeps one deduplicated alert
//! per condition, escalates failed operator fixes into recall advice and
//! gates lab results behind source verification.
//!
//! # Examples
//!
//! ```rust
//! use coldchain::{Config, Container, Engine, Reading, SafeEnvelope};
//!
//! let engine = Engine::new(&Config::default())?;
//! let envelope = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0)?;
//! engine.register_container(Container::new("BOX-001", Some(envelope)))?;
//!
//! engine.ingest("BOX-001", Reading::now(29.0, 55.0))?;
//! assert_eq!(engine.open_alerts().len(), 1);
//! # Ok::<(), coldchain::MonitorError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types and the crate `Result` alias
pub mod error;

/// Readings and safe envelopes
pub mod reading;

/// Reading classification
pub mod classifier;

/// Monitored containers
pub mod container;

/// Condition tracking and staleness watchdog
pub mod tracker;

/// Escalation levels
pub mod escalation;

/// Alerts and their lifecycle
pub mod alerts;

/// Recalls and recall advice
pub mod recall;

/// Dashboard aggregation
pub mod dashboard;

/// Lab samples
pub mod sample;

/// Source verification gate
pub mod verification;

/// Storage backends
pub mod store;

/// Configuration management with YAML support and validation
pub mod config;

// ============================================================================
// RUNTIME MODULES
// ============================================================================

/// Reading sources
pub mod source;

/// Cooling actuators
pub mod actuator;

mod monitor;

/// Monitoring engine
pub mod engine;

/// HTTP API
#[cfg(feature = "web")]
pub mod api;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use actuator::{CoolingActuator, Power};
pub use alerts::{Alert, AlertId, AlertLifecycle, ConditionKind, ResolveOutcome, Severity};
pub use classifier::{classify, ClassifierMargins, SafetyState};
pub use config::Config;
pub use container::{AutoCooling, ConditionState, Container};
pub use dashboard::{Banner, DashboardAggregator, DashboardSummary};
pub use engine::{Engine, EngineEvent, EngineStats};
pub use error::{ConflictRule, MonitorError, Result};
pub use escalation::EscalationLevel;
pub use reading::{ContainerId, Reading, SafeEnvelope};
pub use recall::{Recall, RecallAdvisor, RecallRecommendation, RecallRequest};
pub use sample::{Sample, SampleStatus, SampleUpdate, TestResult};
pub use source::ReadingSource;
pub use store::{InMemoryStore, MonitorStore};
pub use tracker::{ConditionTracker, TransitionEvent};
pub use verification::{verify, SourceVerificationGate, Verification};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("COLDCHAIN_GIT_HASH");

    /// Build timestamp (if available)
    pub const BUILD_TIMESTAMP: Option<&str> = option_env!("COLDCHAIN_BUILD_TIMESTAMP");
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber.
///
/// Honours `RUST_LOG`, defaulting to `coldchain=info`. Calling it twice is
/// harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coldchain=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        // Already initialized
        return;
    }

    #[cfg(feature = "metrics")]
    describe_metrics();

    tracing::info!("coldchain {} initialized", VERSION);
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!("coldchain_readings_total", "Readings accepted by the engine");
    describe_counter!("coldchain_missed_samples_total", "Poll cycles without usable data");
    describe_counter!("coldchain_alerts_opened_total", "Alerts opened");
    describe_counter!("coldchain_alerts_resolved_total", "Alerts resolved");
    describe_counter!("coldchain_recalls_total", "Recalls created by operators");
    describe_gauge!("coldchain_open_alerts", "Open alerts at the last dashboard refresh");
}
