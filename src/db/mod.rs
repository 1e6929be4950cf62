//! Postgres queue store: connection pool, migrations, health check.
//!
//! Every mutating operation runs in its own transaction scoped to exactly
//! the rows it touches. Claims use `FOR UPDATE SKIP LOCKED`, so concurrent
//! workers on different machines never block on, or double-claim, a row.

pub mod maintenance;
pub mod messages;
pub mod outcome;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{DeadLetterEntry, MessageId, QueueMessage, QueueStats, Status};
use crate::store::QueueStore;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database handle. Owns the connection pool.
#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for Db {
    async fn insert(&self, message: QueueMessage) -> Result<QueueMessage> {
        self.insert_message(&message).await
    }

    async fn try_claim(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueMessage>> {
        self.claim_messages(queue_name, limit, now).await
    }

    async fn get(&self, id: MessageId) -> Result<QueueMessage> {
        self.get_message(id).await
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueMessage> {
        self.write_status(id, status, error_message.as_deref(), now)
            .await
    }

    async fn schedule_retry(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> Result<QueueMessage> {
        self.reschedule(id, scheduled_for, &error_message).await
    }

    async fn dead_letter(
        &self,
        id: MessageId,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterEntry> {
        self.dead_letter_message(id, error_message.as_deref(), now)
            .await
    }

    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<MessageId>> {
        self.reclaim_stuck(cutoff).await
    }

    async fn cleanup_completed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.delete_completed_before(cutoff).await
    }

    async fn pending_count(&self, queue_name: &str) -> Result<u64> {
        self.count_pending(queue_name).await
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        self.queue_stats(queue_name).await
    }

    async fn list_dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>> {
        self.dead_letters(queue_name, limit).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct QueueMessageRow {
    id: Uuid,
    queue_name: String,
    message_type: String,
    payload: String,
    status: String,
    retry_count: i32,
    max_retries: i32,
    scheduled_for: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    priority: i32,
    correlation_id: String,
    organization_code: String,
    error_message: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    enqueue_seq: i64,
}

impl QueueMessageRow {
    pub(crate) fn try_into_message(self) -> Result<QueueMessage> {
        Ok(QueueMessage {
            id: MessageId(self.id),
            queue_name: self.queue_name,
            message_type: self.message_type,
            payload: self.payload,
            status: self.status.parse()?,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            scheduled_for: self.scheduled_for,
            expires_at: self.expires_at,
            priority: self.priority,
            correlation_id: self.correlation_id,
            organization_code: self.organization_code,
            error_message: self.error_message,
            created_by: self.created_by,
            created_at: self.created_at,
            processed_at: self.processed_at,
            enqueue_seq: self.enqueue_seq,
        })
    }
}

/// Internal row type for dead-letter entries.
#[derive(sqlx::FromRow)]
pub(crate) struct DeadLetterRow {
    id: Uuid,
    original_message_id: Uuid,
    queue_name: String,
    message_type: String,
    payload: String,
    retry_count: i32,
    error_message: Option<String>,
    organization_code: String,
    failed_at: DateTime<Utc>,
}

impl From<DeadLetterRow> for DeadLetterEntry {
    fn from(row: DeadLetterRow) -> Self {
        Self {
            id: crate::model::DeadLetterId(row.id),
            original_message_id: MessageId(row.original_message_id),
            queue_name: row.queue_name,
            message_type: row.message_type,
            payload: row.payload,
            retry_count: row.retry_count.max(0) as u32,
            error_message: row.error_message,
            organization_code: row.organization_code,
            failed_at: row.failed_at,
        }
    }
}

/// Column list shared by every query returning a full message row.
pub(crate) const MESSAGE_COLUMNS: &str = "id, queue_name, message_type, payload, status, \
    retry_count, max_retries, scheduled_for, expires_at, priority, correlation_id, \
    organization_code, error_message, created_by, created_at, processed_at, enqueue_seq";

pub(crate) const DEAD_LETTER_COLUMNS: &str = "id, original_message_id, queue_name, \
    message_type, payload, retry_count, error_message, organization_code, failed_at";
