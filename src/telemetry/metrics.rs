//! Metric instrument factories for leaseq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"leaseq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for leaseq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("leaseq")
}

/// Counter: messages enqueued.
/// Labels: `queue`, `message_type`.
pub fn messages_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.enqueued")
        .with_description("Number of messages enqueued")
        .build()
}

/// Counter: messages leased by a dequeue call.
/// Labels: `queue`.
pub fn messages_claimed() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.claimed")
        .with_description("Number of messages claimed by workers")
        .build()
}

/// Counter: dequeue calls that found nothing eligible.
/// Labels: `queue`.
pub fn claims_empty() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.claims.empty")
        .with_description("Dequeue calls that returned no message")
        .build()
}

/// Counter: outcome status transitions.
/// Labels: `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.status_transitions")
        .with_description("Number of message status transitions")
        .build()
}

/// Counter: messages rescheduled for retry.
/// Labels: `queue`.
pub fn messages_retried() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.retried")
        .with_description("Number of messages rescheduled for retry")
        .build()
}

/// Counter: messages moved to the dead-letter table.
/// Labels: `queue`.
pub fn messages_dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.dead_lettered")
        .with_description("Number of messages dead-lettered")
        .build()
}

/// Counter: stuck leases reclaimed by the reaper.
pub fn leases_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.leases.reclaimed")
        .with_description("Processing leases reverted to pending by the reaper")
        .build()
}

/// Counter: completed messages deleted by the retention sweeper.
pub fn messages_swept() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.messages.swept")
        .with_description("Completed messages deleted by retention cleanup")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("leaseq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
