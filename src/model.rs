//! Core data model.
//!
//! A queue message is a unit of work addressed to a named queue. It has
//! identity, an opaque payload, scheduling hints, and a lifecycle status.
//! The store owns the row; workers only ever hold a transient lease on it.

pub mod dead_letter;

pub use dead_letter::{DeadLetterEntry, DeadLetterId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default number of retries a message is allowed before a supervisor
/// should dead-letter it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default tenant scope.
pub const DEFAULT_ORGANIZATION: &str = "default";

/// Longest error message stored on a row, in characters.
pub const MAX_ERROR_LENGTH: usize = 4000;

// ---------------------------------------------------------------------------
// Queue Message
// ---------------------------------------------------------------------------

/// A message as stored in the queue table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique identifier, assigned on enqueue and never reused.
    pub id: MessageId,

    /// Logical partition. All ordering and claiming is scoped per queue name.
    pub queue_name: String,

    /// Tag identifying the payload shape. Not interpreted by the queue.
    pub message_type: String,

    /// Opaque payload. Never parsed or validated by the queue.
    pub payload: String,

    pub status: Status,

    /// Number of times the message has been rescheduled after a failure.
    pub retry_count: u32,

    /// Retry budget. Enforced by the supervisor, not by the queue.
    pub max_retries: u32,

    /// Not claimable before this instant. None means immediately.
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Never claimable at or after this instant. None means no expiry.
    pub expires_at: Option<DateTime<Utc>>,

    /// Higher is served first.
    pub priority: i32,

    /// Cross-system tracing key. Not used for locking or ordering.
    pub correlation_id: String,

    /// Tenant scope. Not part of the claim key.
    pub organization_code: String,

    /// Last recorded failure, truncated to [`MAX_ERROR_LENGTH`].
    pub error_message: Option<String>,

    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Lease start while `Processing`, completion time once `Completed`.
    pub processed_at: Option<DateTime<Utc>>,

    /// Store-assigned insertion order, breaks `created_at` ties.
    pub enqueue_seq: i64,
}

impl QueueMessage {
    /// Is the message claimable at `now`?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Pending
            && self.scheduled_for.is_none_or(|at| at <= now)
            && self.expires_at.is_none_or(|at| at > now)
    }

    /// Has the retry budget been used up?
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Newtype for message IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Other(format!("invalid message id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting to be claimed.
    Pending,
    /// Leased by exactly one worker.
    Processing,
    /// Done successfully. Terminal.
    Completed,
    /// Processing failed. Kept for inspection, may still be retried.
    Failed,
    /// Retry budget exhausted and snapshotted to the dead-letter table. Terminal.
    DeadLetter,
    /// Withdrawn before it was claimed. Terminal.
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Processing,
        Status::Completed,
        Status::Failed,
        Status::DeadLetter,
        Status::Cancelled,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Processing)         // claim
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)   // retry or reaper
                | (Processing, DeadLetter)
                | (Failed, Pending)       // retry
                | (Failed, DeadLetter)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::DeadLetter | Status::Cancelled)
    }

    /// Statuses from which `to` may be reached.
    pub fn sources_of(to: Status) -> Vec<Status> {
        Status::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(to))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::DeadLetter => "dead_letter",
            Status::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            "dead_letter" => Ok(Status::DeadLetter),
            "cancelled" => Ok(Status::Cancelled),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

/// Truncate an error message to at most `max_chars` characters.
///
/// Cuts on a char boundary. Oversized messages are shortened, never rejected.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Queue statistics
// ---------------------------------------------------------------------------

/// Row counts per status for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead_letter: u64,
    pub cancelled: u64,
}

impl QueueStats {
    pub(crate) fn add(&mut self, status: Status, count: u64) {
        match status {
            Status::Pending => self.pending += count,
            Status::Processing => self.processing += count,
            Status::Completed => self.completed += count,
            Status::Failed => self.failed += count,
            Status::DeadLetter => self.dead_letter += count,
            Status::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending
            + self.processing
            + self.completed
            + self.failed
            + self.dead_letter
            + self.cancelled
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new messages. The producer-facing way to enqueue work.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub(crate) queue_name: String,
    pub(crate) message_type: String,
    pub(crate) payload: String,
    pub(crate) priority: i32,
    pub(crate) max_retries: Option<u32>,
    pub(crate) scheduled_for: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) organization_code: Option<String>,
    pub(crate) created_by: Option<String>,
}

impl NewMessage {
    pub fn new(
        queue_name: impl Into<String>,
        message_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_type: message_type.into(),
            payload: payload.into(),
            priority: 0,
            max_retries: None,
            scheduled_for: None,
            expires_at: None,
            correlation_id: None,
            organization_code: None,
            created_by: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn organization(mut self, code: impl Into<String>) -> Self {
        self.organization_code = Some(code.into());
        self
    }

    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = Some(who.into());
        self
    }

    /// Materialize a pending message. `enqueue_seq` is left at zero for the
    /// store to assign.
    pub(crate) fn into_message(self, default_max_retries: u32, now: DateTime<Utc>) -> QueueMessage {
        QueueMessage {
            id: MessageId::new(),
            queue_name: self.queue_name,
            message_type: self.message_type,
            payload: self.payload,
            status: Status::Pending,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            scheduled_for: self.scheduled_for,
            expires_at: self.expires_at,
            priority: self.priority,
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            organization_code: self
                .organization_code
                .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string()),
            error_message: None,
            created_by: self.created_by,
            created_at: now,
            processed_at: None,
            enqueue_seq: 0,
        }
    }
}
