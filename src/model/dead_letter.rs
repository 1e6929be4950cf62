//! Dead-letter entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MessageId, QueueMessage};

/// Immutable snapshot of a message taken when it was dead-lettered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub original_message_id: MessageId,
    pub queue_name: String,
    pub message_type: String,
    pub payload: String,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub organization_code: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub(crate) fn snapshot(message: &QueueMessage, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: DeadLetterId::new(),
            original_message_id: message.id,
            queue_name: message.queue_name.clone(),
            message_type: message.message_type.clone(),
            payload: message.payload.clone(),
            retry_count: message.retry_count,
            error_message: message.error_message.clone(),
            organization_code: message.organization_code.clone(),
            failed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeadLetterId(pub Uuid);

impl DeadLetterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
