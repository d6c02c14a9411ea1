//! The [`DeadLetterStore`] trait and its record/filter/stats types.
//!
//! One durable async CRUD surface over a terminal-failure record, rather
//! than a live job queue with claim/lease semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::classify::ErrorKind;
use crate::error::DlqError;
use crate::job::{DestinationDescriptor, EnrichedAlert, JobPriority, PublishingJob};

/// A durable record of a job that exhausted retries or failed permanently.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub alert: EnrichedAlert,
    pub destination: DestinationDescriptor,
    pub priority: JobPriority,
    pub error_kind: ErrorKind,
    pub last_error: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
    pub replayed: bool,
    pub replayed_job_id: Option<Uuid>,
}

impl DlqEntry {
    /// Build the entry that corresponds to a job reaching `Failed` terminally.
    pub fn from_job(job: &PublishingJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            alert: job.alert.clone(),
            destination: job.destination.clone(),
            priority: job.priority,
            error_kind: job.error_kind.unwrap_or(ErrorKind::Unknown),
            last_error: job.last_error.clone().unwrap_or_default(),
            retry_count: job.retry_count,
            failed_at: Utc::now(),
            replayed: false,
            replayed_job_id: None,
        }
    }
}

/// Filter predicates for [`DeadLetterStore::list`].
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub destination: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub priority: Option<JobPriority>,
    pub since: Option<DateTime<Utc>>,
}

/// Aggregate counts returned by [`DeadLetterStore::stats`].
#[derive(Debug, Clone, Default)]
pub struct DlqStats {
    pub total: u64,
    pub by_destination: HashMap<String, u64>,
    pub by_error_kind: HashMap<String, u64>,
    pub by_priority: HashMap<String, u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub replayed_count: u64,
}

/// The result of a [`DeadLetterStore::replay`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// The stable job id to resubmit under, unchanged across repeat calls.
    pub job_id: Uuid,
    /// `true` iff this call performed the replayed-flag flip. `false` means
    /// the entry was already replayed and the caller must not resubmit again.
    pub first_replay: bool,
}

/// Durable, indexed dead-letter storage.
///
/// Implementations must make `write` durable before the caller transitions
/// the originating job to `DeadLettered`, and must make `replay` idempotent:
/// a second `replay` of an already-replayed entry reports `first_replay:
/// false` rather than letting the caller resubmit a duplicate job. The store
/// only performs this bookkeeping; resubmission itself is the caller's
/// responsibility (see `PublishingEngine::replay`), since the store has no
/// handle to the in-memory queue.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Durably insert a new entry for a finally-failed job.
    async fn write(&self, job: &PublishingJob) -> Result<DlqEntry, DlqError>;

    /// Paginated, `failed_at DESC`-ordered listing.
    async fn list(
        &self,
        filter: &DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, DlqError>;

    /// Fetch a single entry by id.
    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, DlqError>;

    /// Mark `id` as replayed and return the job id to re-submit. Idempotent.
    async fn replay(&self, id: Uuid) -> Result<ReplayOutcome, DlqError>;

    /// Delete entries older than `older_than`, returning the count removed.
    async fn purge(&self, older_than: chrono::Duration) -> Result<u64, DlqError>;

    /// Aggregate counts across the whole store.
    async fn stats(&self) -> Result<DlqStats, DlqError>;
}
