//! Bounded job tracking cache.
//!
//! An observability-only structure: the engine never depends on it for
//! correctness. Uses the lazy-deletion LRU trick — a monotonic sequence
//! number per entry plus an append-only recency queue — so `put`/`get`/
//! `remove` stay O(1) amortized without an intrusive doubly-linked list.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use uuid::Uuid;

use crate::job::{JobPriority, JobState};

/// A compact, immutable projection of a job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub fingerprint: String,
    pub destination_name: String,
    pub priority: JobPriority,
    pub state: JobState,
    pub error_kind: Option<crate::classify::ErrorKind>,
    pub retry_count: u32,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Optional predicates for [`JobTrackingCache::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub destination: Option<String>,
    pub priority: Option<JobPriority>,
}

impl JobFilter {
    fn matches(&self, snap: &JobSnapshot) -> bool {
        self.state.is_none_or(|s| s == snap.state)
            && self
                .destination
                .as_deref()
                .is_none_or(|d| d == snap.destination_name)
            && self.priority.is_none_or(|p| p == snap.priority)
    }
}

struct Entry {
    snapshot: JobSnapshot,
    seq: u64,
}

/// Bounded LRU map from job id to [`JobSnapshot`].
pub struct JobTrackingCache {
    capacity: usize,
    seq: AtomicU64,
    entries: RwLock<HashMap<Uuid, Entry>>,
    order: RwLock<VecDeque<(u64, Uuid)>>,
}

impl JobTrackingCache {
    /// Construct a cache bounded to `capacity` entries (default ~10,000).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
        }
    }

    /// Insert or refresh a snapshot, moving it to the most-recent position.
    pub fn put(&self, snapshot: JobSnapshot) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = snapshot.id;
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(id, Entry { snapshot, seq });
        }
        self.order.write().unwrap_or_else(|e| e.into_inner()).push_back((seq, id));
        self.evict_if_needed();
    }

    /// Look up a snapshot without affecting recency (observability reads do
    /// not need to pay for LRU bookkeeping).
    pub fn get(&self, id: Uuid) -> Option<JobSnapshot> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|e| e.snapshot.clone())
    }

    /// Remove a snapshot outright.
    pub fn remove(&self, id: Uuid) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        let Some(removed) = removed else {
            return;
        };
        let mut order = self.order.write().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = order.iter().position(|&(seq, i)| seq == removed.seq && i == id) {
            order.remove(pos);
        }
    }

    /// Drop every snapshot.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.order.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Current number of live entries.
    pub fn size(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Filtered enumeration, capped at `limit`.
    pub fn list(&self, filter: &JobFilter, limit: usize) -> Vec<JobSnapshot> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|e| &e.snapshot)
            .filter(|s| filter.matches(s))
            .take(limit)
            .cloned()
            .collect()
    }

    fn evict_if_needed(&self) {
        let over = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.len().saturating_sub(self.capacity)
        };
        if over == 0 {
            return;
        }
        let mut order = self.order.write().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        while entries.len() > self.capacity {
            let Some((seq, id)) = order.pop_front() else {
                break;
            };
            // Only evict if this is still the entry's current (most recent)
            // sequence number; a stale order entry means the job was
            // refreshed since and a newer order entry exists further back.
            if entries.get(&id).is_some_and(|e| e.seq == seq) {
                entries.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: Uuid) -> JobSnapshot {
        JobSnapshot {
            id,
            fingerprint: "fp".into(),
            destination_name: "dest".into(),
            priority: JobPriority::Medium,
            state: JobState::Queued,
            error_kind: None,
            retry_count: 0,
            submitted_at: 0,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn put_and_get_round_trips() {
        let cache = JobTrackingCache::new(10);
        let id = Uuid::new_v4();
        cache.put(snap(id));
        assert_eq!(cache.get(id).unwrap().id, id);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = JobTrackingCache::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        cache.put(snap(a));
        cache.put(snap(b));
        cache.put(snap(c));
        assert_eq!(cache.size(), 2);
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_some());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn refreshing_moves_to_most_recent() {
        let cache = JobTrackingCache::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.put(snap(a));
        cache.put(snap(b));
        cache.put(snap(a)); // refresh a; b is now the oldest
        let c = Uuid::new_v4();
        cache.put(snap(c));
        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let cache = JobTrackingCache::new(10);
        let id = Uuid::new_v4();
        cache.put(snap(id));
        cache.remove(id);
        assert!(cache.get(id).is_none());
        cache.put(snap(id));
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn list_filters_by_destination() {
        let cache = JobTrackingCache::new(10);
        let mut a = snap(Uuid::new_v4());
        a.destination_name = "prod-x".into();
        let mut b = snap(Uuid::new_v4());
        b.destination_name = "prod-y".into();
        cache.put(a);
        cache.put(b);

        let filter = JobFilter {
            destination: Some("prod-x".into()),
            ..Default::default()
        };
        let results = cache.list(&filter, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].destination_name, "prod-x");
    }

    #[test]
    fn list_respects_limit() {
        let cache = JobTrackingCache::new(10);
        for _ in 0..5 {
            cache.put(snap(Uuid::new_v4()));
        }
        assert_eq!(cache.list(&JobFilter::default(), 3).len(), 3);
    }
}
