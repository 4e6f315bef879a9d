use std::fmt;

use thiserror::Error;

/// Business rules whose violation is reported as a conflict rather than
/// silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictRule {
    /// A second open alert of the same kind for the same container
    DuplicateOpenAlert,
    /// The alert was already resolved
    AlertAlreadyResolved,
    /// The sample belongs to a batch with an open recall
    SampleLockedByRecall,
    /// A terminal test result was written for an unverified, non-exempt sample
    VerificationRequired,
    /// A client tried to mark a sample verified without going through the gate
    VerificationBypass,
    /// The batch already has an open recall
    RecallAlreadyOpen,
    /// The container is deactivated and no longer accepts readings
    ContainerInactive,
    /// A container with the same id is already registered
    DuplicateContainer,
    /// The last reading was safe but the sensor has since gone quiet
    AwaitingReadings,
}

impl fmt::Display for ConflictRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictRule::DuplicateOpenAlert => "an open alert of this kind already exists",
            ConflictRule::AlertAlreadyResolved => "alert is already resolved",
            ConflictRule::SampleLockedByRecall => "sample is locked due to recall",
            ConflictRule::VerificationRequired => "test result requires source verification",
            ConflictRule::VerificationBypass => "samples can only be verified through the verification gate",
            ConflictRule::RecallAlreadyOpen => "an open recall already exists for this batch",
            ConflictRule::ContainerInactive => "container is deactivated",
            ConflictRule::DuplicateContainer => "container is already registered",
            ConflictRule::AwaitingReadings => "container is disconnected, resolve once readings resume",
        };
        f.write_str(text)
    }
}

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Container has no safe envelope and cannot be classified
    #[error("Container '{0}' has no safe envelope configured")]
    MissingEnvelope(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding JSON payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport failure talking to a sensor or actuator
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Temporary failure that is retried on the next poll cycle
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A reading that cannot be classified (non-finite values)
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Rejected because it would violate a business rule
    #[error("Conflict: {0}")]
    Conflict(ConflictRule),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Sample not found: {0}")]
    SampleNotFound(u64),

    #[error("Recall not found: {0}")]
    RecallNotFound(String),
}

impl MonitorError {
    /// Errors that count as a missed sample instead of a failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::Transient(_) | MonitorError::Http(_) | MonitorError::InvalidReading(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MonitorError::Conflict(_))
    }

    /// Errors that stop a single container's monitor for good.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MonitorError::Config(_) | MonitorError::MissingEnvelope(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MonitorError::ContainerNotFound(_)
                | MonitorError::AlertNotFound(_)
                | MonitorError::SampleNotFound(_)
                | MonitorError::RecallNotFound(_)
        )
    }
}

/// Convenient alias over [`Result`] using [`MonitorError`]
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_names_the_rule() {
        let err = MonitorError::Conflict(ConflictRule::SampleLockedByRecall);
        assert_eq!(err.to_string(), "Conflict: sample is locked due to recall");
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn error_classes() {
        assert!(MonitorError::Transient("timeout".into()).is_transient());
        assert!(MonitorError::MissingEnvelope("BOX-1".into()).is_configuration());
        assert!(MonitorError::SampleNotFound(7).is_not_found());
        assert!(!MonitorError::Config("bad".into()).is_not_found());
    }
}
