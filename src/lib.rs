//! Asynchronous publishing pipeline for alert delivery, plus a distributed
//! alert-grouping timer manager.
//!
//! The crate is organized around the data flow: an enriched alert and a
//! destination descriptor enter the [`engine`], which assigns a priority
//! ([`queue`]/[`worker`]), consults a per-destination [`breaker`], delegates
//! delivery to an external [`publisher::Publisher`], [`classify`]es
//! failures, sleeps per [`retry`] policy, and either retries or escalates to
//! the [`dlq`]. Throughout, it updates the [`tracking`] cache. Independently,
//! [`timers::GroupTimerManager`] fires callbacks over [`timers::storage`]
//! that enqueue publishing work.

pub mod breaker;
pub mod classify;
pub mod config;
pub mod dlq;
pub mod engine;
pub mod error;
pub mod job;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod telemetry;
pub mod timers;
pub mod tracking;
pub mod worker;

pub use engine::PublishingEngine;
pub use job::{DestinationDescriptor, EnrichedAlert, PublishingJob};
