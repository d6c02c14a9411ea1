//! Distributed alert-grouping timers.

pub mod manager;
pub mod model;
pub mod storage;

pub use manager::GroupTimerManager;
pub use model::{GroupSnapshot, GroupTimer, TimerKind, TimerState};
pub use storage::{InMemoryTimerStorage, RedisTimerStorage, TimerStorage};
