//! Shared snapshot types for the `Stats()` surfaces exposed by the engine,
//! the DLQ, and the timer manager.

use std::collections::HashMap;

use crate::breaker::BreakerSnapshot;
use crate::job::JobPriority;

/// Monotonic counters the engine accumulates across its lifetime.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub submitted: std::sync::atomic::AtomicU64,
    pub succeeded: std::sync::atomic::AtomicU64,
    pub retried: std::sync::atomic::AtomicU64,
    pub dead_lettered: std::sync::atomic::AtomicU64,
    pub breaker_rejected: std::sync::atomic::AtomicU64,
    pub dlq_write_failures: std::sync::atomic::AtomicU64,
}

/// A read-only copy of [`EngineCounters`], safe to hand out.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineCounterSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub breaker_rejected: u64,
    pub dlq_write_failures: u64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> EngineCounterSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        EngineCounterSnapshot {
            submitted: self.submitted.load(Relaxed),
            succeeded: self.succeeded.load(Relaxed),
            retried: self.retried.load(Relaxed),
            dead_lettered: self.dead_lettered.load(Relaxed),
            breaker_rejected: self.breaker_rejected.load(Relaxed),
            dlq_write_failures: self.dlq_write_failures.load(Relaxed),
        }
    }
}

/// `Stats()` response.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub queue_depth: HashMap<JobPriority, usize>,
    pub breaker_states: HashMap<String, BreakerSnapshot>,
    pub counters: EngineCounterSnapshot,
}
