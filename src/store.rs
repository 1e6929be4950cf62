//! Storage seam for the queue.
//!
//! [`QueueStore`] is the only interface the rest of the crate uses to touch
//! queue rows. Its centerpiece is [`QueueStore::try_claim`]: an atomic
//! compare-and-claim that moves eligible `Pending` rows to `Processing` so that
//! no two concurrent callers ever receive the same row. Implementations pick
//! whatever primitive their engine offers (`FOR UPDATE SKIP LOCKED` on
//! Postgres, a single critical section in memory).
//!
//! Stores enforce the transition table in [`Status::can_transition_to`]
//! against the row as currently stored, never against a caller's copy.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{DeadLetterEntry, MessageId, QueueMessage, QueueStats, Status};

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new `Pending` message. Assigns `enqueue_seq`.
    async fn insert(&self, message: QueueMessage) -> Result<QueueMessage>;

    /// Atomically claim up to `limit` eligible messages from `queue_name`.
    ///
    /// Eligible means `Pending`, `scheduled_for` null or `<= now`, and
    /// `expires_at` null or `> now`. Claimed rows come back ordered by
    /// priority descending, then `created_at`, then `enqueue_seq`, already
    /// in `Processing` with `processed_at = now`. Either the whole set is
    /// claimed or nothing is.
    async fn try_claim(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueMessage>>;

    async fn get(&self, id: MessageId) -> Result<QueueMessage>;

    /// Write a new status. `Completed` stamps `processed_at = now`.
    /// A `None` error message leaves the stored one untouched.
    async fn update_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueMessage>;

    /// Release the lease and return the message to `Pending`, bumping
    /// `retry_count`. Does not look at `max_retries`.
    async fn schedule_retry(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> Result<QueueMessage>;

    /// Snapshot the message into the dead-letter table and mark it
    /// `DeadLetter`. A message already dead-lettered returns its existing
    /// entry and writes nothing.
    async fn dead_letter(
        &self,
        id: MessageId,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterEntry>;

    /// Revert every `Processing` row whose lease started before `cutoff`
    /// back to `Pending`. `retry_count` is left unchanged.
    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<MessageId>>;

    /// Delete `Completed` rows completed before `cutoff`. Nothing else.
    async fn cleanup_completed(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn pending_count(&self, queue_name: &str) -> Result<u64>;

    async fn stats(&self, queue_name: &str) -> Result<QueueStats>;

    /// Most recent dead-letter entries first.
    async fn list_dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>>;
}

/// Validate a status transition, returning an error if disallowed.
pub(crate) fn validate_transition(id: MessageId, from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        })
    }
}
