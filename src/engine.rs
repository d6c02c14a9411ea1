//! The publishing engine — orchestrates the queue, breaker, classifier,
//! retry policy, tracking cache, and dead-letter store into a single
//! per-job processing routine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::breaker::BreakerRegistry;
use crate::classify::{self, ErrorKind};
use crate::config::EngineConfig;
use crate::dlq::DeadLetterStore;
use crate::error::{ShutdownError, SubmitError};
use crate::job::{DestinationDescriptor, EnrichedAlert, JobPriority, JobState, PublishingJob};
use crate::publisher::{PublishError, Publisher};
use crate::queue::{self, PriorityQueue, QueueCapacities};
use crate::retry;
use crate::stats::{EngineCounters, EngineStats};
use crate::tracking::JobTrackingCache;
use crate::worker::{JobProcessor, WorkerPool};

struct EngineInner {
    config: EngineConfig,
    breakers: BreakerRegistry,
    tracking: JobTrackingCache,
    dlq: Arc<dyn DeadLetterStore>,
    publishers: HashMap<String, Arc<dyn Publisher>>,
    counters: EngineCounters,
    accepting: AtomicBool,
    queue: PriorityQueue,
    shutdown: CancellationToken,
}

/// The publishing engine: library-level API the (out-of-scope) admin facade
/// is built on top of.
pub struct PublishingEngine {
    inner: Arc<EngineInner>,
    workers: tokio::sync::Mutex<Option<WorkerPool>>,
    receiver: tokio::sync::Mutex<Option<queue::PriorityReceiver>>,
}

impl PublishingEngine {
    /// Construct an engine with the given destination publishers, keyed by
    /// `DestinationDescriptor::kind`. Starts in the `Queued`-accepting state
    /// but with no workers running until [`Self::start`] is called.
    pub fn new(
        config: EngineConfig,
        dlq: Arc<dyn DeadLetterStore>,
        publishers: HashMap<String, Arc<dyn Publisher>>,
    ) -> Self {
        let capacities = QueueCapacities {
            high: config.high_capacity,
            medium: config.medium_capacity,
            low: config.low_capacity,
        };
        let tracking = JobTrackingCache::new(config.tracking_capacity);
        let breakers = BreakerRegistry::new(config.breaker);
        let (queue, receiver) = queue::channel(capacities);

        let inner = Arc::new(EngineInner {
            config,
            breakers,
            tracking,
            dlq,
            publishers,
            counters: EngineCounters::default(),
            accepting: AtomicBool::new(true),
            queue,
            shutdown: CancellationToken::new(),
        });

        Self {
            inner,
            workers: tokio::sync::Mutex::new(None),
            receiver: tokio::sync::Mutex::new(Some(receiver)),
        }
    }

    /// Launch `worker_count` workers. Idempotent: a second call while workers
    /// are already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }
        let Some(receiver) = self.receiver.lock().await.take() else {
            return;
        };
        let processor: Arc<dyn JobProcessor> = self.clone();
        *workers = Some(WorkerPool::start(
            self.inner.config.worker_count,
            receiver,
            processor,
            self.inner.shutdown.clone(),
        ));
        info!(workers = self.inner.config.worker_count, "publishing engine started");
    }

    /// Stop accepting submits and wait up to `grace` for in-flight jobs to
    /// drain.
    pub async fn stop(&self, grace: Duration) -> Result<(), ShutdownError> {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        let Some(pool) = self.workers.lock().await.take() else {
            return Ok(());
        };
        pool.shutdown(grace).await
    }

    /// Enqueue a job for delivery.
    pub fn submit(
        &self,
        alert: EnrichedAlert,
        destination: DestinationDescriptor,
    ) -> Result<(), SubmitError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::NotAccepting("engine is shutting down"));
        }
        let job = PublishingJob::new(alert, destination);
        self.inner.tracking.put(job.snapshot());
        self.inner
            .counters
            .submitted
            .fetch_add(1, Ordering::Relaxed);
        self.inner.queue.submit(job)
    }

    /// Instantaneous depth of one priority tier.
    pub fn queue_size(&self, priority: JobPriority) -> usize {
        self.inner.queue.queue_size(priority)
    }

    /// Snapshot of queue depths, breaker states, and lifetime counters.
    pub fn stats(&self) -> EngineStats {
        let mut queue_depth = HashMap::new();
        for p in [JobPriority::High, JobPriority::Medium, JobPriority::Low] {
            queue_depth.insert(p, self.inner.queue.queue_size(p));
        }
        EngineStats {
            queue_depth,
            breaker_states: self.inner.breakers.snapshot_all(),
            counters: self.inner.counters.snapshot(),
        }
    }

    /// Lookup by id from the tracking cache.
    pub fn get_job(&self, id: uuid::Uuid) -> Option<crate::tracking::JobSnapshot> {
        self.inner.tracking.get(id)
    }

    /// Filtered enumeration from the tracking cache.
    pub fn list_jobs(
        &self,
        filter: &crate::tracking::JobFilter,
        limit: usize,
    ) -> Vec<crate::tracking::JobSnapshot> {
        self.inner.tracking.list(filter, limit)
    }

    /// Replay a dead-lettered entry: reconstructs the job from the entry's
    /// alert/destination/priority and resubmits it onto the queue at its
    /// original priority. Idempotent — replaying the same entry twice
    /// resubmits exactly once and returns the same job id both times.
    pub async fn replay(&self, entry_id: uuid::Uuid) -> Result<uuid::Uuid, crate::error::DlqError> {
        let entry = self
            .inner
            .dlq
            .get(entry_id)
            .await?
            .ok_or(crate::error::DlqError::NotFound(entry_id))?;
        let outcome = self.inner.dlq.replay(entry_id).await?;

        if outcome.first_replay {
            let mut job = PublishingJob::new(entry.alert, entry.destination);
            job.id = outcome.job_id;
            job.priority = entry.priority;
            self.inner.tracking.put(job.snapshot());
            self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.inner.queue.submit(job) {
                warn!(
                    entry_id = %entry_id,
                    job_id = %outcome.job_id,
                    error = %err,
                    "replay resubmission failed"
                );
            }
        }

        Ok(outcome.job_id)
    }
}

#[async_trait]
impl JobProcessor for PublishingEngine {
    async fn process(&self, job: PublishingJob) {
        self.inner.run_job(job).await;
    }
}

impl EngineInner {
    /// The per-job processing routine.
    async fn run_job(&self, mut job: PublishingJob) {
        loop {
            // Step 1: Queued -> Processing.
            job.state = JobState::Processing;
            job.started_at.get_or_insert_with(chrono::Utc::now);
            self.tracking.put(job.snapshot());

            let outcome = self.attempt_delivery(&job).await;

            match outcome {
                Ok(()) => {
                    job.state = JobState::Succeeded;
                    job.completed_at = Some(chrono::Utc::now());
                    self.tracking.put(job.snapshot());
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err((kind, message, retry_after)) => {
                    job.error_kind = Some(kind);
                    job.last_error = Some(message);

                    if retry::should_retry(kind, job.retry_count, &self.config) {
                        // Backoff uses the attempt number before incrementing
                        // `retry_count`, so the first retry sees attempt 0.
                        let delay = retry::backoff_with_retry_after(
                            &self.config,
                            job.retry_count,
                            retry_after,
                        );
                        job.retry_count += 1;
                        job.state = JobState::Retrying;
                        self.tracking.put(job.snapshot());
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);

                        tokio::select! {
                            biased;
                            () = self.shutdown.cancelled() => {
                                // Cancellation during sleep ends the retry loop
                                // immediately.
                                job.error_kind = Some(ErrorKind::Transient);
                                job.last_error = Some("shutdown during backoff".into());
                                self.escalate_to_dlq(job).await;
                                return;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }

                    job.state = JobState::Failed;
                    self.escalate_to_dlq(job).await;
                    return;
                }
            }
        }
    }

    /// Steps 2–5: breaker check, publisher call, classify.
    async fn attempt_delivery(
        &self,
        job: &PublishingJob,
    ) -> Result<(), (ErrorKind, String, Option<Duration>)> {
        let breaker = self.breakers.get_or_create(&job.destination.name);

        if !breaker.can_attempt() {
            self.counters.breaker_rejected.fetch_add(1, Ordering::Relaxed);
            return Err((ErrorKind::Transient, "circuit breaker open".into(), None));
        }

        let Some(publisher) = self.publishers.get(&job.destination.kind) else {
            // Unrecognized destination kind: permanent, no publisher was
            // invoked so the breaker is untouched.
            return Err((
                ErrorKind::Permanent,
                format!("no publisher registered for kind {}", job.destination.kind),
                None,
            ));
        };

        let deadline = self.config.publisher_timeout;
        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                return Err((
                    ErrorKind::Transient,
                    "shutdown during publisher call".into(),
                    None,
                ));
            }
            r = tokio::time::timeout(deadline, publisher.deliver(&job.alert, &job.destination, deadline)) => {
                match r {
                    Ok(result) => result,
                    Err(_) => {
                        breaker.record_failure();
                        return Err((
                            ErrorKind::Transient,
                            format!("publisher call exceeded deadline of {deadline:?}"),
                            None,
                        ));
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                breaker.record_success();
                Ok(())
            }
            Err(err) => {
                breaker.record_failure();
                let kind = classify::classify(Some(&err as &dyn classify::StatusCarrier), &err.message);
                Err((kind, err.message.clone(), retry_after_of(&err)))
            }
        }
    }

    async fn escalate_to_dlq(&self, job: PublishingJob) {
        let mut attempt = 0u32;
        loop {
            match self.dlq.write(&job).await {
                Ok(_) => {
                    let mut job = job;
                    job.state = JobState::DeadLettered;
                    job.completed_at = Some(chrono::Utc::now());
                    self.tracking.put(job.snapshot());
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(err) => {
                    self.counters
                        .dlq_write_failures
                        .fetch_add(1, Ordering::Relaxed);
                    error!(job_id = %job.id, attempt, error = %err, "dead-letter write failed");
                    attempt += 1;
                    if attempt >= self.config.dlq_write_retry_attempts {
                        warn!(
                            job_id = %job.id,
                            "giving up on dead-letter write after {attempt} attempts; job remains Failed"
                        );
                        self.tracking.put(job.snapshot());
                        return;
                    }
                    tokio::time::sleep(self.config.dlq_write_retry_interval).await;
                }
            }
        }
    }
}

fn retry_after_of(err: &PublishError) -> Option<Duration> {
    err.retry_after
}
