//! In-process queue store for tests and single-process embedding.
//!
//! Every operation runs inside one critical section, which is this store's
//! claim primitive. It gives the same guarantees as the Postgres store but
//! only among callers sharing the same `MemoryStore` instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{QueueStore, validate_transition};
use crate::error::{Error, Result};
use crate::model::{DeadLetterEntry, MessageId, QueueMessage, QueueStats, Status};

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<MessageId, QueueMessage>,
    dead_letters: Vec<DeadLetterEntry>,
    next_seq: i64,
}

impl Inner {
    fn get_mut(&mut self, id: MessageId) -> Result<&mut QueueMessage> {
        self.messages
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("message {id}")))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of rows currently held, in any status.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert(&self, mut message: QueueMessage) -> Result<QueueMessage> {
        let mut inner = self.inner.lock().await;
        if inner.messages.contains_key(&message.id) {
            return Err(Error::InvalidArgument(format!(
                "message {} already exists",
                message.id
            )));
        }
        inner.next_seq += 1;
        message.enqueue_seq = inner.next_seq;
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn try_claim(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueMessage>> {
        let mut inner = self.inner.lock().await;

        let mut candidates: Vec<&QueueMessage> = inner
            .messages
            .values()
            .filter(|m| m.queue_name == queue_name && m.is_eligible(now))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.enqueue_seq.cmp(&b.enqueue_seq))
        });
        let ids: Vec<MessageId> = candidates
            .into_iter()
            .take(limit as usize)
            .map(|m| m.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let message = inner.get_mut(id)?;
            message.status = Status::Processing;
            message.processed_at = Some(now);
            claimed.push(message.clone());
        }
        Ok(claimed)
    }

    async fn get(&self, id: MessageId) -> Result<QueueMessage> {
        let mut inner = self.inner.lock().await;
        inner.get_mut(id).map(|m| m.clone())
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueMessage> {
        let mut inner = self.inner.lock().await;
        let message = inner.get_mut(id)?;
        validate_transition(id, message.status, status)?;

        message.status = status;
        if error_message.is_some() {
            message.error_message = error_message;
        }
        if status == Status::Completed {
            message.processed_at = Some(now);
        }
        Ok(message.clone())
    }

    async fn schedule_retry(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> Result<QueueMessage> {
        let mut inner = self.inner.lock().await;
        let message = inner.get_mut(id)?;
        validate_transition(id, message.status, Status::Pending)?;

        message.status = Status::Pending;
        message.retry_count += 1;
        message.scheduled_for = Some(scheduled_for);
        message.error_message = Some(error_message);
        message.processed_at = None;
        Ok(message.clone())
    }

    async fn dead_letter(
        &self,
        id: MessageId,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterEntry> {
        let mut inner = self.inner.lock().await;
        let message = inner.get_mut(id)?;

        if message.status == Status::DeadLetter {
            return inner
                .dead_letters
                .iter()
                .find(|e| e.original_message_id == id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("dead-letter entry for message {id}")));
        }
        validate_transition(id, message.status, Status::DeadLetter)?;

        message.status = Status::DeadLetter;
        if error_message.is_some() {
            message.error_message = error_message;
        }
        let entry = DeadLetterEntry::snapshot(message, now);
        inner.dead_letters.push(entry.clone());
        Ok(entry)
    }

    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<MessageId>> {
        let mut inner = self.inner.lock().await;
        let mut reclaimed = Vec::new();
        for message in inner.messages.values_mut() {
            if message.status == Status::Processing
                && message.processed_at.is_some_and(|at| at < cutoff)
            {
                message.status = Status::Pending;
                message.processed_at = None;
                reclaimed.push(message.id);
            }
        }
        Ok(reclaimed)
    }

    async fn cleanup_completed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.messages.len();
        inner.messages.retain(|_, m| {
            !(m.status == Status::Completed && m.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.messages.len()) as u64)
    }

    async fn pending_count(&self, queue_name: &str) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| m.queue_name == queue_name && m.status == Status::Pending)
            .count() as u64)
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for message in inner.messages.values().filter(|m| m.queue_name == queue_name) {
            stats.add(message.status, 1);
        }
        Ok(stats)
    }

    async fn list_dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<DeadLetterEntry> = inner
            .dead_letters
            .iter()
            .filter(|e| queue_name.is_none_or(|q| e.queue_name == q))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewMessage;

    fn pending(queue: &str, priority: i32, now: DateTime<Utc>) -> QueueMessage {
        NewMessage::new(queue, "test", "{}")
            .priority(priority)
            .into_message(3, now)
    }

    #[tokio::test]
    async fn insert_assigns_increasing_sequence() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let a = store.insert(pending("q", 0, now)).await.unwrap();
        let b = store.insert(pending("q", 0, now)).await.unwrap();
        assert!(b.enqueue_seq > a.enqueue_seq);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        let msg = pending("q", 0, Utc::now());

        store.insert(msg.clone()).await.unwrap();
        assert!(matches!(
            store.insert(msg).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn same_timestamp_claims_in_insertion_order() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = store.insert(pending("q", 1, now)).await.unwrap();
        let second = store.insert(pending("q", 1, now)).await.unwrap();

        let claimed = store.try_claim("q", 2, now).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn claim_is_scoped_to_queue_name() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(pending("other", 9, now)).await.unwrap();

        assert!(store.try_claim("q", 5, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_letter_missing_message_is_not_found() {
        let store = MemoryStore::new();
        let result = store.dead_letter(MessageId::new(), None, Utc::now()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
