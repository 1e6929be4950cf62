//! Integration tests for telemetry initialization and span helpers.

use chrono::Utc;
use leaseq::model::NewMessage;
use leaseq::telemetry::queue::{record_status_transition, start_process_span};
use leaseq::telemetry::{TelemetryConfig, init_telemetry, metrics};
use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process; a second
    // init returns Err instead of panicking.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "leaseq-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

#[tokio::test]
async fn process_span_records_transition_for_claimed_message() {
    let queue = leaseq::MessageQueue::new(leaseq::MemoryStore::arc());
    queue
        .enqueue(NewMessage::new("emails", "welcome", "{}").correlation_id("corr-1"))
        .await
        .unwrap();
    let message = queue.dequeue("emails").await.unwrap().unwrap();

    let span = start_process_span(&message);
    record_status_transition(&span, "processing", "completed");
    assert!(message.processed_at.is_some_and(|at| at <= Utc::now()));
}

#[test]
fn metric_instruments_accept_recordings_without_a_provider() {
    metrics::messages_enqueued().add(
        1,
        &[
            KeyValue::new("queue", "emails"),
            KeyValue::new("message_type", "welcome"),
        ],
    );
    metrics::leases_reclaimed().add(2, &[]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "enqueue")]);
}

#[test]
fn console_only_guard_flushes_and_drops_cleanly() {
    let guard = leaseq::telemetry::TelemetryGuard::default();
    guard.force_flush();
    drop(guard);
}
