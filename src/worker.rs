//! Worker pool dequeuing from the [`crate::queue::PriorityReceiver`].
//!
//! N tasks fan in off one shared three-tier in-process queue, each racing
//! a `CancellationToken` against the receive for graceful-drain shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ShutdownError;
use crate::job::PublishingJob;
use crate::queue::PriorityReceiver;

/// The per-job routine a worker hands dequeued jobs to. Implemented by
/// [`crate::engine::PublishingEngine`]; kept as a trait so the pool doesn't
/// need to know the engine's internals.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: PublishingJob);
}

/// N long-lived worker tasks sharing one [`PriorityReceiver`] behind a lock —
/// the only mechanism for handing work between submitters and workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `worker_count` tasks pulling from `receiver` and handing each
    /// job to `processor`. `shutdown` is shared with the engine so an
    /// in-flight backoff sleep and the dequeue loop cancel together.
    pub fn start(
        worker_count: usize,
        receiver: PriorityReceiver,
        processor: Arc<dyn JobProcessor>,
        shutdown: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let receiver = receiver.clone();
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_worker(id, receiver, processor, shutdown).await;
            }));
        }

        Self { handles, shutdown }
    }

    /// Stop accepting new dequeues and wait up to `grace` for in-flight jobs
    /// to finish.
    pub async fn shutdown(self, grace: Duration) -> Result<(), ShutdownError> {
        self.shutdown.cancel();
        let drain = futures::future::join_all(self.handles);
        match tokio::time::timeout(grace, drain).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ShutdownError::Cancelled(grace)),
        }
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<PriorityReceiver>>,
    processor: Arc<dyn JobProcessor>,
    shutdown: CancellationToken,
) {
    debug!(worker = id, "worker started");
    loop {
        let maybe_job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(worker = id, "worker stopping, no job in flight");
                break;
            }
            job = async {
                let mut guard = receiver.lock().await;
                guard.recv().await
            } => job,
        };

        match maybe_job {
            Some(job) => processor.process(job).await,
            None => {
                warn!(worker = id, "priority queue closed, worker exiting");
                break;
            }
        }
    }
    info!(worker = id, "worker stopped");
}
