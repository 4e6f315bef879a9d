// src/store.rs - Repository for containers, alerts, samples and recalls
//
// Containers are stored together with their alerts, one map entry per
// container. Samples and recalls are grouped per batch. A closure passed to
// `update_container` or `update_batch` runs while the entry is locked, which
// makes every check-then-write on one container or one batch atomic.
//
// Closures must not call back into the same store.

use crate::alerts::{Alert, AlertId};
use crate::container::{Container, ContainerRecord};
use crate::error::{ConflictRule, MonitorError, Result};
use crate::reading::ContainerId;
use crate::recall::Recall;
use crate::sample::{BatchId, Sample, SampleId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Samples and recalls of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchLedger {
    pub batch_id: BatchId,
    pub samples: Vec<Sample>,
    pub recalls: Vec<Recall>,
}

impl BatchLedger {
    pub fn new(batch_id: impl Into<BatchId>) -> Self {
        Self { batch_id: batch_id.into(), samples: Vec::new(), recalls: Vec::new() }
    }

    pub fn open_recall(&self) -> Option<&Recall> {
        self.recalls.iter().find(|r| r.is_open())
    }

    pub fn sample_mut(&mut self, id: SampleId) -> Option<&mut Sample> {
        self.samples.iter_mut().find(|s| s.id == id)
    }
}

/// Storage contract used by the engine.
///
/// Implementations must run each update closure under mutual exclusion with
/// every other update of the same key.
pub trait MonitorStore: Send + Sync + 'static {
    /// Register a new container. Ids are unique for the life of the store.
    fn register(&self, container: Container) -> Result<()>;

    fn container(&self, id: &str) -> Option<Container>;

    fn containers(&self) -> Vec<Container>;

    /// All alerts, open and resolved
    fn alerts(&self) -> Vec<Alert>;

    fn update_container<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ContainerRecord) -> R;

    /// Container owning an alert
    fn locate_alert(&self, id: &AlertId) -> Option<ContainerId>;

    fn next_sample_id(&self) -> SampleId;

    fn insert_sample(&self, sample: Sample);

    fn sample(&self, id: SampleId) -> Option<Sample>;

    fn samples(&self) -> Vec<Sample>;

    /// Run `f` on a batch ledger, creating an empty one if needed.
    fn update_batch<R, F>(&self, batch_id: &str, f: F) -> R
    where
        F: FnOnce(&mut BatchLedger) -> R;

    /// Batch holding a sample
    fn locate_sample(&self, id: SampleId) -> Option<BatchId>;

    fn recalls(&self) -> Vec<Recall>;
}

/// In-process store backed by [`DashMap`]
///
/// ```rust
/// use coldchain::{Container, InMemoryStore, MonitorStore};
///
/// let store = InMemoryStore::new();
/// store.register(Container::new("BOX-001", None))?;
/// let attempts = store.update_container("BOX-001", |rec| {
///     rec.container.fix_attempts += 1;
///     rec.container.fix_attempts
/// })?;
/// assert_eq!(attempts, 1);
/// # Ok::<(), coldchain::MonitorError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    containers: Arc<DashMap<ContainerId, ContainerRecord>>,
    batches: Arc<DashMap<BatchId, BatchLedger>>,
    sample_seq: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonitorStore for InMemoryStore {
    fn register(&self, container: Container) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.containers.entry(container.id.clone()) {
            Entry::Occupied(_) => Err(MonitorError::Conflict(ConflictRule::DuplicateContainer)),
            Entry::Vacant(slot) => {
                trace!(container = %container.id, "Registered");
                slot.insert(ContainerRecord::new(container));
                Ok(())
            }
        }
    }

    fn container(&self, id: &str) -> Option<Container> {
        self.containers.get(id).map(|rec| rec.container.clone())
    }

    fn containers(&self) -> Vec<Container> {
        let mut all: Vec<Container> = self.containers.iter().map(|rec| rec.container.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn alerts(&self) -> Vec<Alert> {
        let mut all: Vec<Alert> = self
            .containers
            .iter()
            .flat_map(|rec| rec.alerts.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    fn update_container<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ContainerRecord) -> R,
    {
        let mut rec = self
            .containers
            .get_mut(id)
            .ok_or_else(|| MonitorError::ContainerNotFound(id.to_string()))?;
        Ok(f(rec.value_mut()))
    }

    fn locate_alert(&self, id: &AlertId) -> Option<ContainerId> {
        self.containers
            .iter()
            .find(|rec| rec.alerts.iter().any(|a| a.id == *id))
            .map(|rec| rec.key().clone())
    }

    fn next_sample_id(&self) -> SampleId {
        self.sample_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn insert_sample(&self, sample: Sample) {
        let batch_id = sample.batch_id.clone();
        let mut ledger = self
            .batches
            .entry(batch_id.clone())
            .or_insert_with(|| BatchLedger::new(batch_id));
        ledger.samples.push(sample);
    }

    fn sample(&self, id: SampleId) -> Option<Sample> {
        self.batches
            .iter()
            .find_map(|ledger| ledger.samples.iter().find(|s| s.id == id).cloned())
    }

    fn samples(&self) -> Vec<Sample> {
        let mut all: Vec<Sample> = self.batches.iter().flat_map(|l| l.samples.clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    fn update_batch<R, F>(&self, batch_id: &str, f: F) -> R
    where
        F: FnOnce(&mut BatchLedger) -> R,
    {
        let mut ledger = self
            .batches
            .entry(batch_id.to_string())
            .or_insert_with(|| BatchLedger::new(batch_id));
        f(ledger.value_mut())
    }

    fn locate_sample(&self, id: SampleId) -> Option<BatchId> {
        self.batches
            .iter()
            .find(|ledger| ledger.samples.iter().any(|s| s.id == id))
            .map(|ledger| ledger.key().clone())
    }

    fn recalls(&self) -> Vec<Recall> {
        let mut all: Vec<Recall> = self.batches.iter().flat_map(|l| l.recalls.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }
}
