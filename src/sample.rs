// src/sample.rs - Lab test records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SampleId = u64;
pub type BatchId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Pending,
    InTesting,
    Completed,
    Rejected,
}

/// Lab verdict for a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestResult {
    Pass,
    Fail,
    #[serde(rename = "Requires Retest")]
    RequiresRetest,
}

impl TestResult {
    /// Pass and Fail close the test; a retest request does not.
    pub fn is_terminal(self) -> bool {
        matches!(self, TestResult::Pass | TestResult::Fail)
    }
}

/// A lab test record and the container it claims to come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub batch_id: BatchId,
    pub herb_name: String,
    pub status: SampleStatus,
    #[serde(default)]
    pub test_result: Option<TestResult>,
    #[serde(default)]
    pub remarks: Option<String>,
    pub box_id: String,
    pub hub_id: String,
    /// Only ever set by the verification gate
    #[serde(default)]
    pub verified: bool,
    pub updated_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        id: SampleId,
        batch_id: impl Into<BatchId>,
        herb_name: impl Into<String>,
        box_id: impl Into<String>,
        hub_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            batch_id: batch_id.into(),
            herb_name: herb_name.into(),
            status: SampleStatus::Pending,
            test_result: None,
            remarks: None,
            box_id: box_id.into(),
            hub_id: hub_id.into(),
            verified: false,
            updated_at: Utc::now(),
        }
    }

    /// Apply an already gated update.
    ///
    /// A terminal result without an explicit status marks the sample
    /// completed.
    pub fn apply(&mut self, update: &SampleUpdate, now: DateTime<Utc>) {
        if let Some(result) = update.test_result {
            self.test_result = Some(result);
            if result.is_terminal() && update.status.is_none() {
                self.status = SampleStatus::Completed;
            }
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(remarks) = &update.remarks {
            self.remarks = Some(remarks.clone());
        }
        self.updated_at = now;
    }
}

/// Partial update sent by the lab surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleUpdate {
    #[serde(default)]
    pub test_result: Option<TestResult>,
    #[serde(default)]
    pub status: Option<SampleStatus>,
    #[serde(default)]
    pub remarks: Option<String>,
    /// Accepted only as a no-op echo of the current flag
    #[serde(default)]
    pub verified: Option<bool>,
}

impl SampleUpdate {
    pub fn result(test_result: TestResult) -> Self {
        Self { test_result: Some(test_result), ..Default::default() }
    }
}
