//! # leaseq
//!
//! Storage-backed, lease-based message queue with at-least-once delivery.
//!
//! Producers enqueue into named queues; workers lease messages with an atomic
//! skip-locked claim, then record exactly one outcome (complete, retry, or
//! dead-letter). A reaper reclaims abandoned leases and a sweeper deletes old
//! completed messages. Postgres (via sqlx) is the production store; an
//! in-memory store with the same semantics backs tests and embedding.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod retry;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{DeadLetterEntry, MessageId, NewMessage, QueueMessage, QueueStats, Status};
pub use queue::MessageQueue;
pub use store::{MemoryStore, QueueStore};
