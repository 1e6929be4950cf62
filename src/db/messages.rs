//! Enqueue, skip-locked claim, and read-side queries.

use chrono::{DateTime, Utc};

use super::{MESSAGE_COLUMNS, QueueMessageRow};
use crate::error::{Error, Result};
use crate::model::{MessageId, QueueMessage, QueueStats, Status};

impl super::Db {
    /// Insert a new pending message. The database assigns `enqueue_seq`.
    pub async fn insert_message(&self, message: &QueueMessage) -> Result<QueueMessage> {
        let row: QueueMessageRow = sqlx::query_as(&format!(
            "INSERT INTO queue_messages (id, queue_name, message_type, payload, status, retry_count, max_retries, scheduled_for, expires_at, priority, correlation_id, organization_code, error_message, created_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.id.0)
        .bind(&message.queue_name)
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(message.retry_count as i32)
        .bind(message.max_retries as i32)
        .bind(message.scheduled_for)
        .bind(message.expires_at)
        .bind(message.priority)
        .bind(&message.correlation_id)
        .bind(&message.organization_code)
        .bind(&message.error_message)
        .bind(&message.created_by)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into_message()
    }

    /// Claim up to `limit` eligible messages in one statement.
    ///
    /// The inner SELECT locks candidate rows with `SKIP LOCKED`, so rows
    /// another transaction is claiming are passed over instead of waited on.
    /// The outer UPDATE flips them to `processing` before the locks drop.
    pub async fn claim_messages(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let rows: Vec<QueueMessageRow> = sqlx::query_as(
            "WITH claimable AS (
                 SELECT id FROM queue_messages
                 WHERE queue_name = $1
                   AND status = 'pending'
                   AND (scheduled_for IS NULL OR scheduled_for <= $2)
                   AND (expires_at IS NULL OR expires_at > $2)
                 ORDER BY priority DESC, created_at ASC, enqueue_seq ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE queue_messages m
             SET status = 'processing', processed_at = $2
             FROM claimable
             WHERE m.id = claimable.id
             RETURNING m.*",
        )
        .bind(queue_name)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // UPDATE ... RETURNING does not preserve the CTE's order.
        let mut claimed = rows
            .into_iter()
            .map(QueueMessageRow::try_into_message)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.enqueue_seq.cmp(&b.enqueue_seq))
        });
        Ok(claimed)
    }

    /// Get a message by ID.
    pub async fn get_message(&self, id: MessageId) -> Result<QueueMessage> {
        let row: Option<QueueMessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queue_messages WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("message {id}")))?
            .try_into_message()
    }

    /// Count `pending` rows in a queue, scheduled or not.
    pub async fn count_pending(&self, queue_name: &str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1 AND status = 'pending'",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Row counts per status for one queue.
    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM queue_messages WHERE queue_name = $1 GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.add(status.parse::<Status>()?, count.max(0) as u64);
        }
        Ok(stats)
    }
}
