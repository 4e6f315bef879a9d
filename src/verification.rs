// src/verification.rs - Source verification and the sample result gate
//
// A scanned identifier matches a sample only by exact equality with its
// recorded box id or hub id. Herbs on the exemption allow-list are verified
// by sensor attestation instead of a scan.

use crate::container::Container;
use crate::error::{ConflictRule, MonitorError, Result};
use crate::sample::{Sample, SampleUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which recorded field an identifier matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    BoxId,
    HubId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Scan,
    SensorAttestation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub matched: bool,
    pub matched_field: Option<MatchedField>,
    pub method: VerificationMethod,
}

impl Verification {
    fn scan(matched_field: Option<MatchedField>) -> Self {
        Self { matched: matched_field.is_some(), matched_field, method: VerificationMethod::Scan }
    }
}

/// Match a claimed identifier against a sample's recorded source.
pub fn verify(claimed: &str, sample: &Sample) -> Verification {
    if claimed.is_empty() {
        return Verification::scan(None);
    }
    let field = if claimed == sample.box_id {
        Some(MatchedField::BoxId)
    } else if claimed == sample.hub_id {
        Some(MatchedField::HubId)
    } else {
        None
    };
    Verification::scan(field)
}

/// Content of a scanned code: a bare identifier or a labelled JSON payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    Raw(String),
    Labelled {
        box_id: Option<String>,
        hub_id: Option<String>,
    },
}

#[derive(Deserialize)]
struct LabelledScan {
    #[serde(rename = "boxId", default)]
    box_id: Option<String>,
    #[serde(rename = "hubId", default)]
    hub_id: Option<String>,
}

impl ScanPayload {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with('{') {
            match serde_json::from_str::<LabelledScan>(trimmed) {
                Ok(scan) => {
                    return ScanPayload::Labelled { box_id: scan.box_id, hub_id: scan.hub_id };
                }
                Err(e) => debug!("Scan is not a labelled payload: {}", e),
            }
        }
        ScanPayload::Raw(trimmed.to_string())
    }

    /// Non-empty identifiers carried by the payload
    pub fn candidates(&self) -> Vec<&str> {
        let ids: Vec<&str> = match self {
            ScanPayload::Raw(code) => vec![code.as_str()],
            ScanPayload::Labelled { box_id, hub_id } => {
                [box_id.as_deref(), hub_id.as_deref()].into_iter().flatten().collect()
            }
        };
        ids.into_iter().filter(|c| !c.is_empty()).collect()
    }
}

/// Explicit allow-list of herbs verified by sensor attestation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptionList {
    herbs: Vec<String>,
}

impl ExemptionList {
    pub fn new<I, S>(herbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { herbs: herbs.into_iter().map(Into::into).collect() }
    }

    pub fn is_exempt(&self, herb_name: &str) -> bool {
        self.herbs.iter().any(|h| h == herb_name)
    }
}

/// Gatekeeper for source verification and lab result writes.
#[derive(Debug, Clone, Default)]
pub struct SourceVerificationGate {
    exemptions: ExemptionList,
}

impl SourceVerificationGate {
    pub fn new(exemptions: ExemptionList) -> Self {
        Self { exemptions }
    }

    pub fn exemptions(&self) -> &ExemptionList {
        &self.exemptions
    }

    pub fn is_exempt(&self, sample: &Sample) -> bool {
        self.exemptions.is_exempt(&sample.herb_name)
    }

    /// Verify a scanned code. Any identifier in the payload may match.
    pub fn verify_scan(&self, sample: &Sample, input: &str) -> Verification {
        ScanPayload::parse(input)
            .candidates()
            .into_iter()
            .map(|claimed| verify(claimed, sample))
            .find(|v| v.matched)
            .unwrap_or(Verification::scan(None))
    }

    /// Sensor attestation for exempt herbs.
    ///
    /// Succeeds when the sample's box is a monitored container that is
    /// reporting. Non-exempt samples cannot take this path.
    pub fn attest(&self, sample: &Sample, container: Option<&Container>) -> Result<Verification> {
        if !self.is_exempt(sample) {
            warn!(sample = sample.id, herb = %sample.herb_name, "Attestation refused for non-exempt herb");
            return Err(MonitorError::Conflict(ConflictRule::VerificationBypass));
        }

        let reporting = container
            .map(|c| c.id == sample.box_id && c.last_reading.is_some() && !c.disconnected)
            .unwrap_or(false);

        Ok(Verification {
            matched: reporting,
            matched_field: reporting.then_some(MatchedField::BoxId),
            method: VerificationMethod::SensorAttestation,
        })
    }

    /// Check a sample update against the recall lock and verification rules.
    pub fn check_update(&self, sample: &Sample, update: &SampleUpdate, recall_open: bool) -> Result<()> {
        if recall_open {
            return Err(MonitorError::Conflict(ConflictRule::SampleLockedByRecall));
        }
        if update.verified == Some(true) && !sample.verified {
            return Err(MonitorError::Conflict(ConflictRule::VerificationBypass));
        }
        let terminal = update.test_result.map(|r| r.is_terminal()).unwrap_or(false);
        if terminal && !sample.verified && !self.is_exempt(sample) {
            return Err(MonitorError::Conflict(ConflictRule::VerificationRequired));
        }
        Ok(())
    }
}
