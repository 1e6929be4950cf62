//! Outcome writes: status updates, retry scheduling, dead-lettering.
//!
//! Each write locks the target row with `FOR UPDATE`, validates the
//! transition against the stored status, then updates, all in one
//! transaction. A stale caller holding an outdated copy can never push a
//! terminal message back into circulation.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::{DEAD_LETTER_COLUMNS, DeadLetterRow, MESSAGE_COLUMNS, QueueMessageRow};
use crate::error::{Error, Result};
use crate::model::{DeadLetterEntry, MessageId, QueueMessage, Status};
use crate::store::validate_transition;

/// Lock a message row and return its current status.
async fn lock_status(conn: &mut PgConnection, id: MessageId) -> Result<Status> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status FROM queue_messages WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;

    row.ok_or_else(|| Error::NotFound(format!("message {id}")))?
        .0
        .parse()
}

impl super::Db {
    /// Write a new status after validating the transition.
    pub async fn write_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<QueueMessage> {
        let mut tx = self.pool.begin().await?;

        let current = lock_status(&mut tx, id).await?;
        validate_transition(id, current, status)?;

        let completed_at = (status == Status::Completed).then_some(now);
        let row: QueueMessageRow = sqlx::query_as(&format!(
            "UPDATE queue_messages
             SET status = $2,
                 error_message = COALESCE($3, error_message),
                 processed_at = COALESCE($4, processed_at)
             WHERE id = $1
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id.0)
        .bind(status.as_str())
        .bind(error_message)
        .bind(completed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into_message()
    }

    /// Return a message to `pending` with `retry_count + 1`, clearing the lease.
    pub async fn reschedule(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: &str,
    ) -> Result<QueueMessage> {
        let mut tx = self.pool.begin().await?;

        let current = lock_status(&mut tx, id).await?;
        validate_transition(id, current, Status::Pending)?;

        let row: QueueMessageRow = sqlx::query_as(&format!(
            "UPDATE queue_messages
             SET status = 'pending',
                 retry_count = retry_count + 1,
                 scheduled_for = $2,
                 error_message = $3,
                 processed_at = NULL
             WHERE id = $1
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id.0)
        .bind(scheduled_for)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into_message()
    }

    /// Snapshot a message into `dead_letter_messages` and mark it `dead_letter`.
    ///
    /// Idempotent: a message already dead-lettered returns its existing entry.
    pub async fn dead_letter_message(
        &self,
        id: MessageId,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterEntry> {
        let mut tx = self.pool.begin().await?;

        let current = lock_status(&mut tx, id).await?;
        if current == Status::DeadLetter {
            let existing: Option<DeadLetterRow> = sqlx::query_as(&format!(
                "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_messages WHERE original_message_id = $1"
            ))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;
            return existing
                .map(DeadLetterEntry::from)
                .ok_or_else(|| Error::NotFound(format!("dead-letter entry for message {id}")));
        }
        validate_transition(id, current, Status::DeadLetter)?;

        let row: QueueMessageRow = sqlx::query_as(&format!(
            "UPDATE queue_messages
             SET status = 'dead_letter',
                 error_message = COALESCE($2, error_message)
             WHERE id = $1
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id.0)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;
        let message = row.try_into_message()?;

        let entry = DeadLetterEntry::snapshot(&message, now);
        sqlx::query(
            "INSERT INTO dead_letter_messages (id, original_message_id, queue_name, message_type, payload, retry_count, error_message, organization_code, failed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id.0)
        .bind(entry.original_message_id.0)
        .bind(&entry.queue_name)
        .bind(&entry.message_type)
        .bind(&entry.payload)
        .bind(entry.retry_count as i32)
        .bind(&entry.error_message)
        .bind(&entry.organization_code)
        .bind(entry.failed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    /// Dead-letter entries, newest first, optionally filtered by queue.
    pub async fn dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_messages
             WHERE ($1::text IS NULL OR queue_name = $1)
             ORDER BY failed_at DESC
             LIMIT $2"
        ))
        .bind(queue_name)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }
}
