//! In-process [`DeadLetterStore`] fallback, used by tests and by deployments
//! that have not wired Postgres (durability is then best-effort only —
//! callers should prefer [`super::PostgresDeadLetterStore`] in production).

use async_trait::async_trait;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::DlqError;
use crate::job::PublishingJob;

use super::store::{DeadLetterStore, DlqEntry, DlqFilter, DlqStats, ReplayOutcome};

/// An `RwLock<Vec<DlqEntry>>`-backed store, in the style of an in-memory
/// test double kept alongside a durable store's real implementation.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<Vec<DlqEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn write(&self, job: &PublishingJob) -> Result<DlqEntry, DlqError> {
        let entry = DlqEntry::from_job(job);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(entry)
    }

    async fn list(
        &self,
        filter: &DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<DlqEntry> = entries
            .iter()
            .filter(|e| {
                filter
                    .destination
                    .as_deref()
                    .is_none_or(|d| d == e.destination.name)
                    && filter.error_kind.is_none_or(|k| k == e.error_kind)
                    && filter.priority.is_none_or(|p| p == e.priority)
                    && filter.since.is_none_or(|s| e.failed_at >= s)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, DlqError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn replay(&self, id: Uuid) -> Result<ReplayOutcome, DlqError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(DlqError::NotFound(id))?;

        if entry.replayed {
            let job_id = entry.replayed_job_id.ok_or(DlqError::NotFound(id))?;
            return Ok(ReplayOutcome {
                job_id,
                first_replay: false,
            });
        }

        let job_id = Uuid::new_v4();
        entry.replayed = true;
        entry.replayed_job_id = Some(job_id);
        Ok(ReplayOutcome {
            job_id,
            first_replay: true,
        })
    }

    async fn purge(&self, older_than: chrono::Duration) -> Result<u64, DlqError> {
        let cutoff = chrono::Utc::now() - older_than;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.failed_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<DlqStats, DlqError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = DlqStats {
            total: entries.len() as u64,
            ..Default::default()
        };
        for e in entries.iter() {
            *stats.by_destination.entry(e.destination.name.clone()).or_insert(0) += 1;
            *stats
                .by_error_kind
                .entry(format!("{:?}", e.error_kind))
                .or_insert(0) += 1;
            *stats.by_priority.entry(format!("{:?}", e.priority)).or_insert(0) += 1;
            if e.replayed {
                stats.replayed_count += 1;
            }
            stats.oldest = Some(stats.oldest.map_or(e.failed_at, |o| o.min(e.failed_at)));
            stats.newest = Some(stats.newest.map_or(e.failed_at, |n| n.max(e.failed_at)));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AlertStatus, DestinationDescriptor, EnrichedAlert, JobPriority, JobState};

    fn job() -> PublishingJob {
        let mut job = PublishingJob::new(
            EnrichedAlert {
                fingerprint: "fp-1".into(),
                labels: Default::default(),
                annotations: Default::default(),
                status: AlertStatus::Firing,
                classification: None,
            },
            DestinationDescriptor {
                name: "pagerduty-prod".into(),
                kind: "pagerduty".into(),
                config: serde_json::json!({}),
            },
        );
        job.state = JobState::Failed;
        job.retry_count = 3;
        job.last_error = Some("503 service unavailable".into());
        job.error_kind = Some(crate::classify::ErrorKind::Transient);
        job
    }

    #[tokio::test]
    async fn write_then_get_round_trips() {
        let store = InMemoryDeadLetterStore::new();
        let entry = store.write(&job()).await.unwrap();
        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.job_id, entry.job_id);
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let store = InMemoryDeadLetterStore::new();
        let entry = store.write(&job()).await.unwrap();
        let first = store.replay(entry.id).await.unwrap();
        let second = store.replay(entry.id).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(first.first_replay);
        assert!(!second.first_replay);
    }

    #[tokio::test]
    async fn replay_unknown_id_errors() {
        let store = InMemoryDeadLetterStore::new();
        let err = store.replay(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DlqError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_orders_by_failed_at_desc() {
        let store = InMemoryDeadLetterStore::new();
        let first = store.write(&job()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.write(&job()).await.unwrap();
        let listed = store.list(&DlqFilter::default(), 10, 0).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn stats_aggregate_by_destination() {
        let store = InMemoryDeadLetterStore::new();
        store.write(&job()).await.unwrap();
        store.write(&job()).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_destination.get("pagerduty-prod"), Some(&2));
    }

    #[tokio::test]
    async fn purge_removes_entries_older_than_cutoff() {
        let store = InMemoryDeadLetterStore::new();
        store.write(&job()).await.unwrap();
        let removed = store.purge(chrono::Duration::seconds(-1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.stats().await.unwrap().total, 0);
    }
}
