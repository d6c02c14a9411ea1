//! Bounded strict-priority queue.
//!
//! Three independent bounded `mpsc` channels, one per [`JobPriority`], with
//! dequeue always attempting High, then Medium, then Low before blocking —
//! never randomized, never weighted.

use tokio::sync::mpsc;

use crate::error::SubmitError;
use crate::job::{JobPriority, PublishingJob};

/// Per-tier bounded capacities.
#[derive(Debug, Clone, Copy)]
pub struct QueueCapacities {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            high: 1_000,
            medium: 5_000,
            low: 10_000,
        }
    }
}

/// The submit-side handle: bounded, non-blocking, fails fast with
/// [`SubmitError::QueueFull`] rather than applying back-pressure by blocking
/// the caller.
pub struct PriorityQueue {
    high_tx: mpsc::Sender<PublishingJob>,
    medium_tx: mpsc::Sender<PublishingJob>,
    low_tx: mpsc::Sender<PublishingJob>,
}

/// The worker-side handle: strict-priority dequeue across the three tiers.
pub struct PriorityReceiver {
    high_rx: mpsc::Receiver<PublishingJob>,
    medium_rx: mpsc::Receiver<PublishingJob>,
    low_rx: mpsc::Receiver<PublishingJob>,
}

/// Construct the paired submit/dequeue handles.
pub fn channel(capacities: QueueCapacities) -> (PriorityQueue, PriorityReceiver) {
    let (high_tx, high_rx) = mpsc::channel(capacities.high.max(1));
    let (medium_tx, medium_rx) = mpsc::channel(capacities.medium.max(1));
    let (low_tx, low_rx) = mpsc::channel(capacities.low.max(1));
    (
        PriorityQueue {
            high_tx,
            medium_tx,
            low_tx,
        },
        PriorityReceiver {
            high_rx,
            medium_rx,
            low_rx,
        },
    )
}

impl PriorityQueue {
    /// Non-blocking submit into the tier matching `job.priority`.
    pub fn submit(&self, job: PublishingJob) -> Result<(), SubmitError> {
        let priority = job.priority;
        let tx = match priority {
            JobPriority::High => &self.high_tx,
            JobPriority::Medium => &self.medium_tx,
            JobPriority::Low => &self.low_tx,
        };
        tx.try_send(job).map_err(|_| SubmitError::QueueFull(priority))
    }

    /// Instantaneous depth for one tier.
    ///
    /// Tokio's bounded `mpsc` does not expose occupancy directly; depth is
    /// derived from configured capacity minus remaining permits, which is
    /// exact for a single-producer-style reading (a momentary race with
    /// concurrent submits is expected and acceptable for an inspection-only
    /// operation).
    pub fn queue_size(&self, priority: JobPriority) -> usize {
        let tx = match priority {
            JobPriority::High => &self.high_tx,
            JobPriority::Medium => &self.medium_tx,
            JobPriority::Low => &self.low_tx,
        };
        tx.max_capacity() - tx.capacity()
    }
}

impl PriorityReceiver {
    /// Dequeue the next job, trying High, then Medium, then Low before
    /// suspending on whichever tier produces first.
    /// Returns `None` once every sender has been dropped (shutdown).
    pub async fn recv(&mut self) -> Option<PublishingJob> {
        if let Ok(job) = self.high_rx.try_recv() {
            return Some(job);
        }
        if let Ok(job) = self.medium_rx.try_recv() {
            return Some(job);
        }
        if let Ok(job) = self.low_rx.try_recv() {
            return Some(job);
        }

        tokio::select! {
            biased;
            job = self.high_rx.recv() => job,
            job = self.medium_rx.recv() => job,
            job = self.low_rx.recv() => job,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AlertStatus, DestinationDescriptor, EnrichedAlert};

    fn job(priority_hint: AlertStatus) -> PublishingJob {
        PublishingJob::new(
            EnrichedAlert {
                fingerprint: "fp".into(),
                labels: Default::default(),
                annotations: Default::default(),
                status: priority_hint,
                classification: None,
            },
            DestinationDescriptor {
                name: "dest".into(),
                kind: "webhook".into(),
                config: serde_json::json!({}),
            },
        )
    }

    #[tokio::test]
    async fn strict_priority_order_across_tiers() {
        let (queue, mut rx) = channel(QueueCapacities {
            high: 1,
            medium: 1,
            low: 1,
        });
        // Medium-priority job (status=Firing, no classification).
        queue.submit(job(AlertStatus::Firing)).unwrap();
        // Low-priority job (status=Resolved).
        queue.submit(job(AlertStatus::Resolved)).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.priority, JobPriority::Medium);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.priority, JobPriority::Low);
    }

    #[tokio::test]
    async fn submit_fails_fast_when_tier_full() {
        let (queue, _rx) = channel(QueueCapacities {
            high: 1,
            medium: 1,
            low: 1,
        });
        queue.submit(job(AlertStatus::Resolved)).unwrap();
        let err = queue.submit(job(AlertStatus::Resolved)).unwrap_err();
        assert!(matches!(err, SubmitError::QueueFull(JobPriority::Low)));
    }

    #[tokio::test]
    async fn queue_size_reflects_pending_depth() {
        let (queue, _rx) = channel(QueueCapacities {
            high: 5,
            medium: 5,
            low: 5,
        });
        assert_eq!(queue.queue_size(JobPriority::Low), 0);
        queue.submit(job(AlertStatus::Resolved)).unwrap();
        assert_eq!(queue.queue_size(JobPriority::Low), 1);
    }

    #[tokio::test]
    async fn recv_returns_none_after_senders_dropped() {
        let (queue, mut rx) = channel(QueueCapacities {
            high: 1,
            medium: 1,
            low: 1,
        });
        drop(queue);
        assert!(rx.recv().await.is_none());
    }
}
