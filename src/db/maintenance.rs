//! Stuck-lease reaper and retention sweeper queries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::MessageId;

impl super::Db {
    /// Revert `processing` rows whose lease started before `cutoff`.
    ///
    /// Rows locked by an in-flight outcome write are skipped; the next sweep
    /// sees them again if they are still stuck.
    pub async fn reclaim_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<MessageId>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE queue_messages
             SET status = 'pending', processed_at = NULL
             WHERE id IN (
                 SELECT id FROM queue_messages
                 WHERE status = 'processing' AND processed_at < $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids.into_iter().map(|(id,)| MessageId(id)).collect())
    }

    /// Permanently delete `completed` rows completed before `cutoff`.
    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query(
            "DELETE FROM queue_messages WHERE status = 'completed' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }
}
