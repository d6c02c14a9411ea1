//! The publishing job model.
//!
//! The in-memory fields the publishing engine needs — there is no durable
//! row for a live job, only the DLQ entry it produces on terminal failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::classify::ErrorKind;

/// Scheduling class assigned to a job at submit time and never changed
/// afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    /// Dequeued before Medium and Low; reserved for critical/firing alerts.
    High,
    /// The common case.
    Medium,
    /// Resolved alerts and info-severity noise.
    Low,
}

/// A job's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Sitting in a priority channel, not yet picked up by a worker.
    Queued,
    /// A worker has dequeued it and is running the per-job routine.
    Processing,
    /// A retryable failure happened; sleeping out the backoff before the
    /// next `Processing` attempt.
    Retrying,
    /// Terminal: the publisher accepted the delivery.
    Succeeded,
    /// Retries are exhausted or the failure was permanent; a DLQ write is
    /// about to be attempted.
    Failed,
    /// Terminal: a DLQ entry exists for this job.
    DeadLettered,
}

impl JobState {
    /// Terminal states are the only ones where `completed_at` is set.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::DeadLettered)
    }
}

/// Alert delivery status as produced by the (out-of-scope) enrichment layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    /// The alert condition is currently active.
    Firing,
    /// The alert condition has cleared.
    Resolved,
}

/// Optional classification attached by the (out-of-scope) enrichment layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Severity bucket, e.g. `"critical"`, `"warning"`, `"info"`.
    pub severity: String,
    /// Confidence of the classifier, 0.0–1.0, carried through opaquely.
    pub confidence: f32,
}

/// The enriched alert handed to the engine by the (out-of-scope) ingestion
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAlert {
    /// Opaque identifier deduplicating alert instances.
    pub fingerprint: String,
    /// Prometheus-style labels.
    pub labels: std::collections::BTreeMap<String, String>,
    /// Free-form annotations (summary, description, runbook URL, …).
    pub annotations: std::collections::BTreeMap<String, String>,
    /// Current alert status.
    pub status: AlertStatus,
    /// Optional enrichment classification.
    pub classification: Option<Classification>,
}

impl EnrichedAlert {
    /// The priority a job for this alert is assigned at submit.
    pub fn priority(&self) -> JobPriority {
        let severity_critical = self
            .classification
            .as_ref()
            .is_some_and(|c| c.severity.eq_ignore_ascii_case("critical"));
        let severity_info = self
            .classification
            .as_ref()
            .is_some_and(|c| c.severity.eq_ignore_ascii_case("info"));

        if severity_critical && matches!(self.status, AlertStatus::Firing) {
            JobPriority::High
        } else if severity_critical {
            JobPriority::High
        } else if matches!(self.status, AlertStatus::Resolved) || severity_info {
            JobPriority::Low
        } else {
            JobPriority::Medium
        }
    }
}

/// A named external recipient with a kind-specific opaque config bag.
/// Cloned on submit so mid-flight edits to the original descriptor cannot
/// race a running job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    /// Unique key identifying the destination; also the circuit breaker key.
    pub name: String,
    /// e.g. `"pagerduty"`, `"slack"`, `"webhook"`.
    pub kind: String,
    /// Kind-specific configuration, opaque to the core.
    pub config: Value,
}

/// The unit of delivery owned exclusively by the engine from submit until a
/// terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingJob {
    /// Opaque identifier.
    pub id: Uuid,
    /// The alert to deliver. Immutable while the job is alive.
    pub alert: EnrichedAlert,
    /// The destination to deliver to. Immutable while the job is alive.
    pub destination: DestinationDescriptor,
    /// Assigned once at submit; never changes.
    pub priority: JobPriority,
    /// When the job was accepted by `Submit`.
    pub submitted_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of retries performed so far; `<= EngineConfig::max_retries`.
    pub retry_count: u32,
    /// Set when a worker first dequeues the job.
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff `state.is_terminal()`.
    pub completed_at: Option<DateTime<Utc>>,
    /// The most recent delivery error message, if any.
    pub last_error: Option<String>,
    /// The most recent delivery error's classification, if any.
    pub error_kind: Option<ErrorKind>,
}

impl PublishingJob {
    /// Construct a freshly submitted job in the `Queued` state.
    pub fn new(alert: EnrichedAlert, destination: DestinationDescriptor) -> Self {
        let priority = alert.priority();
        Self {
            id: Uuid::new_v4(),
            alert,
            destination,
            priority,
            submitted_at: Utc::now(),
            state: JobState::Queued,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            error_kind: None,
        }
    }

    /// Project this job into the compact, immutable form stored in the
    /// tracking cache.
    pub fn snapshot(&self) -> crate::tracking::JobSnapshot {
        crate::tracking::JobSnapshot {
            id: self.id,
            fingerprint: self.alert.fingerprint.clone(),
            destination_name: self.destination.name.clone(),
            priority: self.priority,
            state: self.state,
            error_kind: self.error_kind,
            retry_count: self.retry_count,
            submitted_at: self.submitted_at.timestamp(),
            started_at: self.started_at.map(|t| t.timestamp()),
            completed_at: self.completed_at.map(|t| t.timestamp()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(status: AlertStatus, severity: Option<&str>) -> EnrichedAlert {
        EnrichedAlert {
            fingerprint: "abc".into(),
            labels: Default::default(),
            annotations: Default::default(),
            status,
            classification: severity.map(|s| Classification {
                severity: s.to_string(),
                confidence: 1.0,
            }),
        }
    }

    #[test]
    fn critical_firing_is_high() {
        let a = alert(AlertStatus::Firing, Some("critical"));
        assert_eq!(a.priority(), JobPriority::High);
    }

    #[test]
    fn critical_resolved_is_still_high() {
        let a = alert(AlertStatus::Resolved, Some("critical"));
        assert_eq!(a.priority(), JobPriority::High);
    }

    #[test]
    fn resolved_non_critical_is_low() {
        let a = alert(AlertStatus::Resolved, Some("warning"));
        assert_eq!(a.priority(), JobPriority::Low);
    }

    #[test]
    fn info_severity_is_low() {
        let a = alert(AlertStatus::Firing, Some("info"));
        assert_eq!(a.priority(), JobPriority::Low);
    }

    #[test]
    fn default_case_is_medium() {
        let a = alert(AlertStatus::Firing, Some("warning"));
        assert_eq!(a.priority(), JobPriority::Medium);
    }

    #[test]
    fn no_classification_is_medium_when_firing() {
        let a = alert(AlertStatus::Firing, None);
        assert_eq!(a.priority(), JobPriority::Medium);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::DeadLettered.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
        assert!(!JobState::Failed.is_terminal());
    }
}
