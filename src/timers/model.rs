//! Timer and group-snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three timer kinds a group can have active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Delay before first notification for a newly formed group (default 30s).
    GroupWait,
    /// Minimum spacing between notifications for a group with new alerts
    /// (default 5m).
    GroupInterval,
    /// Periodic re-notification when nothing changed (default 4h).
    RepeatInterval,
}

/// A timer's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    /// Installed, counting down.
    Active,
    /// Fired normally; the expiration pipeline ran.
    Expired,
    /// Cancelled before firing (superseded by `ResetTimer`/`CancelTimer`, or
    /// shutdown).
    Cancelled,
    /// Found already past `expires_at` during `RestoreTimers` and fired
    /// immediately rather than being silently dropped.
    Missed,
}

/// Observability metadata that does not affect correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerMetadata {
    pub version: u32,
    pub reset_count: u32,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub created_by_instance: String,
}

impl TimerMetadata {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            reset_count: 0,
            last_reset_at: None,
            created_by_instance: instance_id.into(),
        }
    }
}

/// A persisted, per-group timer, keyed by `timer:{group_key}` in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTimer {
    pub group_key: String,
    pub timer_kind: TimerKind,
    pub duration: std::time::Duration,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: TimerState,
    pub metadata: TimerMetadata,
}

impl GroupTimer {
    pub fn new(
        group_key: impl Into<String>,
        timer_kind: TimerKind,
        duration: std::time::Duration,
        instance_id: impl Into<String>,
    ) -> Self {
        let started_at = Utc::now();
        let expires_at = started_at
            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        Self {
            group_key: group_key.into(),
            timer_kind,
            duration,
            started_at,
            expires_at,
            state: TimerState::Active,
            metadata: TimerMetadata::new(instance_id),
        }
    }

    /// Remaining time until expiry, clamped to zero if already past.
    pub fn remaining(&self) -> std::time::Duration {
        let delta = self.expires_at - Utc::now();
        delta.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Opaque snapshot fetched from the (out-of-scope) alert-group manager at
/// expiration. The core only needs to hand this
/// back to callbacks, never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group_key: String,
    pub alert_count: usize,
    pub labels: std::collections::BTreeMap<String, String>,
}
