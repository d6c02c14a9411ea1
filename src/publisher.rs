//! External collaborator traits consumed by the core.
//!
//! These are the seams the engine and timer manager call through but never
//! implement; kind-specific publishers, the enrichment pipeline, and the
//! alert-group manager all live outside this crate, consumed only through
//! these trait boundaries.

use async_trait::async_trait;
use std::time::Duration;

use crate::classify::StatusCarrier;
use crate::job::{DestinationDescriptor, EnrichedAlert};
use crate::timers::model::GroupSnapshot;

/// The error a [`Publisher`] reports back to the engine. Concrete enough to
/// be object-safe (`Arc<dyn Publisher>` in a kind registry) while still
/// carrying structured hints: a status-code carrier and temporary/timeout
/// markers a classifier can inspect directly instead of pattern-matching
/// on the message text.
#[derive(Debug, Clone)]
pub struct PublishError {
    pub message: String,
    pub status_code: Option<u16>,
    pub transport_temporary: bool,
    pub validation_failure: bool,
    /// Server-provided `Retry-After`, when present.
    pub retry_after: Option<Duration>,
}

impl PublishError {
    /// A plain delivery failure with no structured hints, classified purely
    /// by substring matching `message`.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            transport_temporary: false,
            validation_failure: false,
            retry_after: None,
        }
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PublishError {}

impl StatusCarrier for PublishError {
    fn status_code(&self) -> Option<u16> {
        self.status_code
    }
    fn is_transport_temporary(&self) -> bool {
        self.transport_temporary
    }
    fn is_validation_failure(&self) -> bool {
        self.validation_failure
    }
}

/// Delivers an enriched alert to one destination. Implemented per
/// destination kind (PagerDuty, Slack, a generic webhook, …) outside this
/// crate and registered with the engine by `destination.kind`.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver `alert` to `destination`, aborting if `deadline` elapses
    /// first.
    async fn deliver(
        &self,
        alert: &EnrichedAlert,
        destination: &DestinationDescriptor,
        deadline: Duration,
    ) -> Result<(), PublishError>;
}

/// The alert-group manager the timer manager consults at expiration.
#[async_trait]
pub trait AlertGroupManager: Send + Sync {
    /// Fetch the current snapshot of a group, opaque beyond what the timer
    /// callbacks need to format a notification.
    async fn get_group(&self, group_key: &str) -> Option<GroupSnapshot>;
}
