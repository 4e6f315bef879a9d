// src/escalation.rs - Fix-attempt escalation levels
//
// Presentation and recall eligibility are looked up from the level, never
// derived from the raw counter at the call site.

use serde::{Deserialize, Serialize};

/// Escalation level derived from a container's fix-attempt counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// No failed fix attempts yet
    Resolve,
    /// At least one operator fix did not hold
    CorrectiveAction,
    /// Fix attempts reached the recall threshold
    Recall,
}

struct LevelPolicy {
    level: EscalationLevel,
    wording: &'static str,
    recall_eligible: bool,
}

const POLICY: [LevelPolicy; 3] = [
    LevelPolicy { level: EscalationLevel::Resolve, wording: "resolve", recall_eligible: false },
    LevelPolicy {
        level: EscalationLevel::CorrectiveAction,
        wording: "take corrective action",
        recall_eligible: false,
    },
    LevelPolicy { level: EscalationLevel::Recall, wording: "recall", recall_eligible: true },
];

impl EscalationLevel {
    /// Level for a fix-attempt count. `recall_threshold` must be at least 1.
    pub fn from_attempts(fix_attempts: u32, recall_threshold: u32) -> Self {
        if fix_attempts >= recall_threshold.max(1) {
            EscalationLevel::Recall
        } else if fix_attempts >= 1 {
            EscalationLevel::CorrectiveAction
        } else {
            EscalationLevel::Resolve
        }
    }

    fn policy(self) -> &'static LevelPolicy {
        // POLICY holds one entry per variant
        POLICY.iter().find(|p| p.level == self).unwrap_or(&POLICY[0])
    }

    /// Operator-facing instruction for this level
    pub fn wording(self) -> &'static str {
        self.policy().wording
    }

    pub fn recall_eligible(self) -> bool {
        self.policy().recall_eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_by_attempts() {
        assert_eq!(EscalationLevel::from_attempts(0, 2), EscalationLevel::Resolve);
        assert_eq!(EscalationLevel::from_attempts(1, 2), EscalationLevel::CorrectiveAction);
        assert_eq!(EscalationLevel::from_attempts(2, 2), EscalationLevel::Recall);
        assert_eq!(EscalationLevel::from_attempts(7, 2), EscalationLevel::Recall);
    }

    #[test]
    fn test_wording_table() {
        assert_eq!(EscalationLevel::Resolve.wording(), "resolve");
        assert_eq!(EscalationLevel::CorrectiveAction.wording(), "take corrective action");
        assert_eq!(EscalationLevel::Recall.wording(), "recall");
        assert!(EscalationLevel::Recall.recall_eligible());
        assert!(!EscalationLevel::CorrectiveAction.recall_eligible());
    }

    #[test]
    fn test_threshold_of_one() {
        assert_eq!(EscalationLevel::from_attempts(1, 1), EscalationLevel::Recall);
        // a zero threshold is treated as one
        assert_eq!(EscalationLevel::from_attempts(0, 0), EscalationLevel::Resolve);
    }
}
