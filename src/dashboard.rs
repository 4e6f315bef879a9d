// src/dashboard.rs - Worst-case banner and summary counts

use crate::alerts::{Alert, ConditionKind, Severity};
use crate::container::{ConditionState, Container};
use crate::escalation::EscalationLevel;
use crate::reading::ContainerId;
use crate::recall::Recall;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The single most severe open condition across all containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    pub severity: Severity,
    pub container_id: ContainerId,
    pub kind: ConditionKind,
    pub message: String,
    pub fix_attempts: u32,
    pub escalation: EscalationLevel,
    /// Operator instruction for the escalation level
    pub action: String,
    pub open_alerts: usize,
    pub open_recalls: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub safe: usize,
    pub warning: usize,
    pub critical: usize,
    pub disconnected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub banner: Option<Banner>,
    pub open_alerts: usize,
    pub open_recalls: usize,
    pub alerts_by_severity: SeverityCounts,
    pub containers_by_state: StateCounts,
    pub stale_containers: usize,
    pub pending_recommendations: usize,
    pub generated_at: DateTime<Utc>,
}

/// Reduces open alerts and recalls into one banner.
///
/// Read-only; works on snapshots and never mutates the store.
#[derive(Debug, Clone)]
pub struct DashboardAggregator {
    recall_threshold: u32,
    staleness: Duration,
}

// Most severe first, then oldest, then by id for a total order.
fn banner_order(a: &Alert, b: &Alert) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

fn open_recall_count(recalls: &[Recall]) -> usize {
    recalls.iter().filter(|r| r.is_open()).count()
}

impl DashboardAggregator {
    pub fn new(recall_threshold: u32, staleness: Duration) -> Self {
        Self { recall_threshold: recall_threshold.max(1), staleness }
    }

    /// Pick the worst open alert. Informational alerts never produce a
    /// banner.
    pub fn aggregate(&self, containers: &[Container], alerts: &[Alert], recalls: &[Recall]) -> Option<Banner> {
        self.banner(containers, alerts, open_recall_count(recalls))
    }

    fn banner(&self, containers: &[Container], alerts: &[Alert], open_recalls: usize) -> Option<Banner> {
        let open: Vec<&Alert> = alerts.iter().filter(|a| !a.resolved).collect();
        let worst = open
            .iter()
            .filter(|a| a.severity >= Severity::Warning)
            .min_by(|a, b| banner_order(a, b))?;

        // live counter from the container wins over the alert's snapshot
        let fix_attempts = containers
            .iter()
            .find(|c| c.id == worst.container_id)
            .map(|c| c.fix_attempts)
            .unwrap_or(worst.fix_attempts);
        let escalation = EscalationLevel::from_attempts(fix_attempts, self.recall_threshold);

        Some(Banner {
            severity: worst.severity,
            container_id: worst.container_id.clone(),
            kind: worst.kind,
            message: worst.message.clone(),
            fix_attempts,
            escalation,
            action: escalation.wording().to_string(),
            open_alerts: open.len(),
            open_recalls,
        })
    }

    pub fn summarize(
        &self,
        containers: &[Container],
        alerts: &[Alert],
        recalls: &[Recall],
        pending_recommendations: usize,
        now: DateTime<Utc>,
    ) -> DashboardSummary {
        let open_recalls = open_recall_count(recalls);

        let mut by_severity = SeverityCounts::default();
        for alert in alerts.iter().filter(|a| !a.resolved) {
            match alert.severity {
                Severity::Critical => by_severity.critical += 1,
                Severity::Warning => by_severity.warning += 1,
                Severity::Info => by_severity.info += 1,
            }
        }

        let mut by_state = StateCounts::default();
        let mut stale = 0;
        for container in containers.iter().filter(|c| c.active) {
            match container.condition() {
                ConditionState::Safe => by_state.safe += 1,
                ConditionState::Warning => by_state.warning += 1,
                ConditionState::Critical => by_state.critical += 1,
                ConditionState::Disconnected => by_state.disconnected += 1,
            }
            if container.is_stale(now, self.staleness) {
                stale += 1;
            }
        }

        DashboardSummary {
            banner: self.banner(containers, alerts, open_recalls),
            open_alerts: by_severity.critical + by_severity.warning + by_severity.info,
            open_recalls,
            alerts_by_severity: by_severity,
            containers_by_state: by_state,
            stale_containers: stale,
            pending_recommendations,
            generated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::RecallRequest;

    fn alert(container: &str, kind: ConditionKind, severity: Severity, age_secs: i64) -> Alert {
        Alert::open(container, kind, severity, 0, format!("{:?}", kind), Utc::now() - Duration::seconds(age_secs))
    }

    fn aggregator() -> DashboardAggregator {
        DashboardAggregator::new(2, Duration::seconds(180))
    }

    #[test]
    fn test_no_banner_without_alerts() {
        assert!(aggregator().aggregate(&[], &[], &[]).is_none());
    }

    #[test]
    fn test_info_alerts_do_not_raise_banner() {
        let alerts = vec![alert("BOX-1", ConditionKind::ManualAction, Severity::Info, 10)];
        assert!(aggregator().aggregate(&[], &alerts, &[]).is_none());
    }

    #[test]
    fn test_critical_beats_warning() {
        let alerts = vec![
            alert("BOX-1", ConditionKind::HighTemperature, Severity::Warning, 100),
            alert("BOX-2", ConditionKind::HumidityOutOfRange, Severity::Critical, 5),
            alert("BOX-3", ConditionKind::SensorDisconnected, Severity::Warning, 50),
        ];
        let banner = aggregator().aggregate(&[], &alerts, &[]).unwrap();
        assert_eq!(banner.severity, Severity::Critical);
        assert_eq!(banner.container_id, "BOX-2");
        assert_eq!(banner.open_alerts, 3);
    }

    #[test]
    fn test_tie_goes_to_oldest() {
        let alerts = vec![
            alert("BOX-1", ConditionKind::HighTemperature, Severity::Warning, 10),
            alert("BOX-2", ConditionKind::HighTemperature, Severity::Warning, 60),
        ];
        assert_eq!(aggregator().aggregate(&[], &alerts, &[]).unwrap().container_id, "BOX-2");
        // input order does not matter
        let reversed: Vec<_> = alerts.into_iter().rev().collect();
        assert_eq!(aggregator().aggregate(&[], &reversed, &[]).unwrap().container_id, "BOX-2");
    }

    #[test]
    fn test_banner_counts_open_recalls() {
        let alerts = vec![alert("BOX-1", ConditionKind::HighTemperature, Severity::Warning, 10)];
        let mut closed = Recall::open(RecallRequest::new("B-2", "heat"), Utc::now());
        closed.status = crate::recall::RecallStatus::Resolved;
        let recalls = vec![Recall::open(RecallRequest::new("B-1", "mould"), Utc::now()), closed];

        let banner = aggregator().aggregate(&[], &alerts, &recalls).unwrap();
        assert_eq!(banner.open_recalls, 1);
    }

    #[test]
    fn test_banner_uses_live_fix_attempts() {
        let mut c = Container::new("BOX-1", None);
        c.fix_attempts = 2;
        let alerts = vec![alert("BOX-1", ConditionKind::HighTemperature, Severity::Critical, 10)];
        let banner = aggregator().aggregate(&[c], &alerts, &[]).unwrap();
        assert_eq!(banner.escalation, EscalationLevel::Recall);
        assert_eq!(banner.action, "recall");
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let mut stale = Container::new("BOX-2", None);
        stale.registered_at = now - Duration::seconds(600);
        let mut fresh = Container::new("BOX-1", None);
        fresh.last_reading = Some(crate::reading::Reading::new(22.0, 50.0, now));

        let mut resolved = alert("BOX-1", ConditionKind::HighTemperature, Severity::Critical, 300);
        resolved.resolved = true;
        let alerts = vec![
            resolved,
            alert("BOX-2", ConditionKind::SensorDisconnected, Severity::Warning, 30),
            alert("BOX-2", ConditionKind::ManualAction, Severity::Info, 20),
        ];
        let recalls = vec![Recall::open(RecallRequest::new("B-1", "mould"), now)];

        let summary = aggregator().summarize(&[fresh, stale], &alerts, &recalls, 1, now);
        assert_eq!(summary.open_alerts, 2);
        assert_eq!(summary.alerts_by_severity.warning, 1);
        assert_eq!(summary.alerts_by_severity.info, 1);
        assert_eq!(summary.alerts_by_severity.critical, 0);
        assert_eq!(summary.open_recalls, 1);
        assert_eq!(summary.stale_containers, 1);
        assert_eq!(summary.containers_by_state.safe, 2);
        assert_eq!(summary.pending_recommendations, 1);
        let banner = summary.banner.unwrap();
        assert_eq!(banner.kind, ConditionKind::SensorDisconnected);
        assert_eq!(banner.open_recalls, 1);
    }
}
