//! Message processing span helpers.
//!
//! Span and field names follow the OTel messaging conventions
//! (`messaging.*`) so traces line up with other brokers in a backend.

use tracing::Span;

use crate::model::QueueMessage;

/// Start a span for processing one leased message.
///
/// The `messaging.leaseq.status` field is declared empty and can be updated
/// via [`record_status_transition`].
pub fn start_process_span(message: &QueueMessage) -> Span {
    tracing::info_span!(
        "leaseq.process",
        "messaging.system" = "leaseq",
        "messaging.operation.type" = "process",
        "messaging.destination.name" = %message.queue_name,
        "messaging.message.id" = %message.id,
        "messaging.message.conversation_id" = %message.correlation_id,
        "messaging.leaseq.message_type" = %message.message_type,
        "messaging.leaseq.retry_count" = message.retry_count,
        "messaging.leaseq.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("messaging.leaseq.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
