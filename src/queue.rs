//! The queue API: enqueue, lease, record outcomes, maintain.
//!
//! [`MessageQueue`] wraps a [`QueueStore`] and is what producers, workers and
//! maintenance jobs call. It stamps time from its [`Clock`], fills defaults,
//! truncates error text and emits traces and metrics. Transition rules and
//! atomicity live in the store.
//!
//! Delivery is at-least-once. A lease is only `Status::Processing` plus a
//! `processed_at` stamp; there is no heartbeat. A handler that runs longer
//! than the reaper timeout has its message handed to another worker, so
//! consumers must tolerate duplicates (dedupe on `correlation_id` if needed).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::model::{
    DEFAULT_MAX_RETRIES, DeadLetterEntry, MAX_ERROR_LENGTH, MessageId, NewMessage, QueueMessage,
    QueueStats, Status, truncate_error,
};
use crate::store::QueueStore;
use crate::telemetry::metrics;

pub struct MessageQueue<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    max_error_length: usize,
    default_max_retries: u32,
}

impl<S> Clone for MessageQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            max_error_length: self.max_error_length,
            default_max_retries: self.default_max_retries,
        }
    }
}

impl<S> std::fmt::Debug for MessageQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("clock", &self.clock)
            .field("max_error_length", &self.max_error_length)
            .field("default_max_retries", &self.default_max_retries)
            .finish_non_exhaustive()
    }
}

impl<S: QueueStore> MessageQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            max_error_length: MAX_ERROR_LENGTH,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_settings(mut self, settings: &QueueSettings) -> Self {
        self.max_error_length = settings.max_error_length;
        self.default_max_retries = settings.default_max_retries;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Producer
    // -----------------------------------------------------------------------

    /// Enqueue a new message. Duplicate payloads are allowed.
    pub async fn enqueue(&self, message: NewMessage) -> Result<QueueMessage> {
        if message.queue_name.trim().is_empty() {
            return Err(Error::InvalidArgument("queue_name must not be empty".into()));
        }
        if message.message_type.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "message_type must not be empty".into(),
            ));
        }

        let started = Instant::now();
        let message = message.into_message(self.default_max_retries, self.now());
        let message = self.store.insert(message).await?;
        record_duration("enqueue", started);

        metrics::messages_enqueued().add(
            1,
            &[
                KeyValue::new("queue", message.queue_name.clone()),
                KeyValue::new("message_type", message.message_type.clone()),
            ],
        );
        info!(
            id = %message.id,
            queue = %message.queue_name,
            message_type = %message.message_type,
            priority = message.priority,
            correlation_id = %message.correlation_id,
            "message enqueued"
        );
        Ok(message)
    }

    // -----------------------------------------------------------------------
    // Lease manager
    // -----------------------------------------------------------------------

    /// Lease the highest-priority, oldest eligible message, if any.
    pub async fn dequeue(&self, queue_name: &str) -> Result<Option<QueueMessage>> {
        Ok(self.dequeue_batch(queue_name, 1).await?.into_iter().next())
    }

    /// Lease up to `batch_size` eligible messages in one atomic claim.
    pub async fn dequeue_batch(
        &self,
        queue_name: &str,
        batch_size: u32,
    ) -> Result<Vec<QueueMessage>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let claimed = self
            .store
            .try_claim(queue_name, batch_size, self.now())
            .await?;
        record_duration("dequeue", started);

        let queue_label = [KeyValue::new("queue", queue_name.to_string())];
        if claimed.is_empty() {
            metrics::claims_empty().add(1, &queue_label);
        } else {
            metrics::messages_claimed().add(claimed.len() as u64, &queue_label);
            debug!(queue = queue_name, count = claimed.len(), "messages leased");
        }
        Ok(claimed)
    }

    // -----------------------------------------------------------------------
    // Outcome recorder
    // -----------------------------------------------------------------------

    /// Record a plain status change, usually `Completed` or `Failed`.
    ///
    /// `Processing` is only reachable through [`dequeue`](Self::dequeue) and
    /// `DeadLetter` only through [`move_to_dead_letter`](Self::move_to_dead_letter).
    pub async fn update_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<&str>,
    ) -> Result<QueueMessage> {
        if matches!(status, Status::Processing | Status::DeadLetter) {
            return Err(Error::InvalidArgument(format!(
                "status {status} cannot be set through update_status"
            )));
        }

        let error_message = error_message.map(|e| truncate_error(e, self.max_error_length));
        let message = self
            .store
            .update_status(id, status, error_message, self.now())
            .await?;

        metrics::status_transitions().add(1, &[KeyValue::new("to", status.as_str())]);
        info!(id = %id, queue = %message.queue_name, status = %status, "status updated");
        Ok(message)
    }

    /// Release the lease and put the message back for another attempt.
    ///
    /// Bumps `retry_count` unconditionally. Whether another attempt is
    /// warranted is the caller's call; see [`crate::retry::RetryPolicy`].
    pub async fn schedule_retry(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: &str,
    ) -> Result<QueueMessage> {
        let error_message = truncate_error(error_message, self.max_error_length);
        let message = self
            .store
            .schedule_retry(id, scheduled_for, error_message)
            .await?;

        metrics::messages_retried().add(1, &[KeyValue::new("queue", message.queue_name.clone())]);
        info!(
            id = %id,
            queue = %message.queue_name,
            retry_count = message.retry_count,
            max_retries = message.max_retries,
            %scheduled_for,
            "retry scheduled"
        );
        Ok(message)
    }

    /// Snapshot `message` into the dead-letter table and mark it terminal.
    ///
    /// Calling this again for a message already dead-lettered returns the
    /// existing entry.
    pub async fn move_to_dead_letter(&self, message: &QueueMessage) -> Result<DeadLetterEntry> {
        let error_message = message
            .error_message
            .as_deref()
            .map(|e| truncate_error(e, self.max_error_length));
        let entry = self
            .store
            .dead_letter(message.id, error_message, self.now())
            .await?;

        metrics::messages_dead_lettered()
            .add(1, &[KeyValue::new("queue", entry.queue_name.clone())]);
        warn!(
            id = %message.id,
            dead_letter_id = %entry.id,
            queue = %entry.queue_name,
            retry_count = entry.retry_count,
            "message dead-lettered"
        );
        Ok(entry)
    }

    /// Withdraw a message that has not been claimed yet.
    pub async fn cancel(&self, id: MessageId) -> Result<QueueMessage> {
        let message = self
            .store
            .update_status(id, Status::Cancelled, None, self.now())
            .await?;

        metrics::status_transitions().add(1, &[KeyValue::new("to", Status::Cancelled.as_str())]);
        info!(id = %id, queue = %message.queue_name, "message cancelled");
        Ok(message)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Return leases older than `timeout` to `Pending`. `retry_count` is kept.
    pub async fn reset_stuck_messages(&self, timeout: Duration) -> Result<Vec<MessageId>> {
        let cutoff = cutoff(self.now(), timeout)?;
        let started = Instant::now();
        let reclaimed = self.store.reset_stuck(cutoff).await?;
        record_duration("reset_stuck", started);

        if !reclaimed.is_empty() {
            metrics::leases_reclaimed().add(reclaimed.len() as u64, &[]);
            warn!(count = reclaimed.len(), %cutoff, "stuck leases reclaimed");
        }
        Ok(reclaimed)
    }

    /// Delete `Completed` messages completed more than `retention` ago.
    pub async fn cleanup_old_messages(&self, retention: Duration) -> Result<u64> {
        let cutoff = cutoff(self.now(), retention)?;
        let started = Instant::now();
        let deleted = self.store.cleanup_completed(cutoff).await?;
        record_duration("cleanup", started);

        if deleted > 0 {
            metrics::messages_swept().add(deleted, &[]);
            info!(deleted, %cutoff, "completed messages cleaned up");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Number of `Pending` messages in a queue, including future-scheduled ones.
    pub async fn get_pending_count(&self, queue_name: &str) -> Result<u64> {
        self.store.pending_count(queue_name).await
    }

    pub async fn get(&self, id: MessageId) -> Result<QueueMessage> {
        self.store.get(id).await
    }

    pub async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        self.store.stats(queue_name).await
    }

    pub async fn list_dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>> {
        self.store.list_dead_letters(queue_name, limit).await
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Result<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age)
        .map_err(|e| Error::InvalidArgument(format!("duration out of range: {e}")))?;
    Ok(now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

fn record_duration(operation: &'static str, started: Instant) {
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}
