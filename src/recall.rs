// src/recall.rs - Recall records and the recall advisor

use crate::alerts::Severity;
use crate::classifier::SafetyState;
use crate::container::Container;
use crate::escalation::EscalationLevel;
use crate::reading::ContainerId;
use crate::sample::BatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RecallId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallStatus {
    Open,
    Resolved,
}

/// A batch pulled from the pipeline. While open, the batch's lab results are
/// immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recall {
    pub id: RecallId,
    pub batch_id: BatchId,
    pub container_id: Option<ContainerId>,
    pub severity: Severity,
    pub status: RecallStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Recall {
    pub fn open(request: RecallRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id: request.batch_id,
            container_id: request.container_id,
            severity: request.severity,
            status: RecallStatus::Open,
            reason: request.reason,
            created_at: now,
            created_by: request.created_by,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RecallStatus::Open
    }
}

/// Operator request to create a recall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallRequest {
    pub batch_id: BatchId,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

fn default_reason() -> String { "Failed lab quality test".to_string() }
fn default_severity() -> Severity { Severity::Critical }
fn default_operator() -> String { "operator".to_string() }

impl RecallRequest {
    pub fn new(batch_id: impl Into<BatchId>, reason: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            reason: reason.into(),
            container_id: None,
            severity: default_severity(),
            created_by: default_operator(),
        }
    }

    pub fn for_container(mut self, container_id: impl Into<ContainerId>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn by(mut self, operator: impl Into<String>) -> Self {
        self.created_by = operator.into();
        self
    }
}

/// Advice to recall what a container holds. Never creates a recall itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallRecommendation {
    pub container_id: ContainerId,
    pub state: SafetyState,
    pub fix_attempts: u32,
    pub level: EscalationLevel,
    /// Batches whose samples claim this container as their source
    #[serde(default)]
    pub affected_batches: Vec<BatchId>,
    pub reason: String,
}

/// Derives recall recommendations from fix-attempt escalation.
#[derive(Debug, Clone)]
pub struct RecallAdvisor {
    threshold: u32,
}

impl RecallAdvisor {
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1) }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Recommend a recall when fix attempts reached the threshold and the
    /// container is still not safe.
    pub fn evaluate(&self, container: &Container) -> Option<RecallRecommendation> {
        if container.current_state.is_safe() {
            return None;
        }
        let level = EscalationLevel::from_attempts(container.fix_attempts, self.threshold);
        if !level.recall_eligible() {
            return None;
        }

        Some(RecallRecommendation {
            container_id: container.id.clone(),
            state: container.current_state,
            fix_attempts: container.fix_attempts,
            level,
            affected_batches: Vec::new(),
            reason: format!(
                "{} fix attempt(s) failed, container still {}",
                container.fix_attempts,
                container.current_state.as_str()
            ),
        })
    }
}
