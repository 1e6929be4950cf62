//! Worker and maintenance loops against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use leaseq::clock::{Clock, ManualClock};
use leaseq::engine::{
    BatchReport, Handler, HandlerError, Maintenance, MaintenanceConfig, MaintenanceReport, Worker,
    WorkerConfig,
};
use leaseq::model::{DeadLetterEntry, MessageId, NewMessage, QueueMessage, QueueStats, Status};
use leaseq::retry::RetryPolicy;
use leaseq::{Error, MemoryStore, MessageQueue, QueueStore};

fn setup() -> (MessageQueue<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let queue = MessageQueue::new(MemoryStore::arc()).with_clock(clock.clone());
    (queue, clock)
}

fn config(queue_name: &str) -> WorkerConfig {
    WorkerConfig {
        queue_name: queue_name.to_string(),
        batch_size: 10,
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy::fixed(Duration::from_secs(10)),
    }
}

#[derive(Default)]
struct Succeed {
    calls: AtomicUsize,
}

#[async_trait]
impl Handler for Succeed {
    async fn handle(&self, _message: &QueueMessage) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fail {
    retryable: bool,
}

#[async_trait]
impl Handler for Fail {
    async fn handle(&self, _message: &QueueMessage) -> Result<(), HandlerError> {
        if self.retryable {
            Err(HandlerError::retryable("upstream unavailable"))
        } else {
            Err(HandlerError::fatal("malformed payload"))
        }
    }
}

/// Takes so long that the reaper reclaims the lease mid-flight.
struct Slow {
    queue: MessageQueue<MemoryStore>,
    clock: Arc<ManualClock>,
}

#[async_trait]
impl Handler for Slow {
    async fn handle(&self, _message: &QueueMessage) -> Result<(), HandlerError> {
        self.clock.advance(chrono::Duration::minutes(10));
        self.queue
            .reset_stuck_messages(Duration::from_secs(60))
            .await
            .map_err(|e| HandlerError::fatal(e.to_string()))?;
        Ok(())
    }
}

#[tokio::test]
async fn run_once_completes_successful_messages() {
    let (queue, _clock) = setup();
    let mut ids = Vec::new();
    for i in 0..3 {
        let message = queue
            .enqueue(NewMessage::new("emails", "welcome", format!("{i}")))
            .await
            .unwrap();
        ids.push(message.id);
    }
    queue
        .enqueue(NewMessage::new("other", "welcome", "{}"))
        .await
        .unwrap();

    let handler = Arc::new(Succeed::default());
    let worker = Worker::new(queue.clone(), handler.clone(), config("emails"));

    let report = worker.run_once().await.unwrap();
    assert_eq!(
        report,
        BatchReport {
            completed: 3,
            ..BatchReport::default()
        }
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    for id in ids {
        assert_eq!(queue.get(id).await.unwrap().status, Status::Completed);
    }
    assert_eq!(queue.get_pending_count("other").await.unwrap(), 1);

    assert!(worker.run_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn failures_retry_with_backoff_then_dead_letter() {
    let (queue, clock) = setup();
    let id = queue
        .enqueue(NewMessage::new("jobs", "sync", "{}").max_retries(1))
        .await
        .unwrap()
        .id;
    let worker = Worker::new(
        queue.clone(),
        Arc::new(Fail { retryable: true }),
        config("jobs"),
    );

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.retried, 1);
    let message = queue.get(id).await.unwrap();
    assert_eq!(message.status, Status::Pending);
    assert_eq!(message.retry_count, 1);
    assert_eq!(
        message.scheduled_for,
        Some(clock.now() + chrono::Duration::seconds(10))
    );

    // Backoff has not elapsed yet.
    assert!(worker.run_once().await.unwrap().is_empty());

    clock.advance(chrono::Duration::seconds(10));
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let message = queue.get(id).await.unwrap();
    assert_eq!(message.status, Status::DeadLetter);
    assert_eq!(message.retry_count, 1);

    let entries = queue.list_dead_letters(Some("jobs"), 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_message_id, id);
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("upstream unavailable")
    );
}

#[tokio::test]
async fn fatal_errors_skip_remaining_retries() {
    let (queue, _clock) = setup();
    let id = queue
        .enqueue(NewMessage::new("jobs", "sync", "not json").max_retries(5))
        .await
        .unwrap()
        .id;
    let worker = Worker::new(
        queue.clone(),
        Arc::new(Fail { retryable: false }),
        config("jobs"),
    );

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let message = queue.get(id).await.unwrap();
    assert_eq!(message.status, Status::DeadLetter);
    assert_eq!(message.retry_count, 0);
    assert_eq!(message.error_message.as_deref(), Some("malformed payload"));
}

/// Delegates to a `MemoryStore` but every dead-letter write fails.
#[derive(Default)]
struct DeadLetterFault {
    inner: MemoryStore,
}

#[async_trait]
impl QueueStore for DeadLetterFault {
    async fn insert(&self, message: QueueMessage) -> leaseq::Result<QueueMessage> {
        self.inner.insert(message).await
    }

    async fn try_claim(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> leaseq::Result<Vec<QueueMessage>> {
        self.inner.try_claim(queue_name, limit, now).await
    }

    async fn get(&self, id: MessageId) -> leaseq::Result<QueueMessage> {
        self.inner.get(id).await
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: Status,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> leaseq::Result<QueueMessage> {
        self.inner.update_status(id, status, error_message, now).await
    }

    async fn schedule_retry(
        &self,
        id: MessageId,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> leaseq::Result<QueueMessage> {
        self.inner
            .schedule_retry(id, scheduled_for, error_message)
            .await
    }

    async fn dead_letter(
        &self,
        _id: MessageId,
        _error_message: Option<String>,
        _now: DateTime<Utc>,
    ) -> leaseq::Result<DeadLetterEntry> {
        Err(Error::Other("connection reset".into()))
    }

    async fn reset_stuck(&self, cutoff: DateTime<Utc>) -> leaseq::Result<Vec<MessageId>> {
        self.inner.reset_stuck(cutoff).await
    }

    async fn cleanup_completed(&self, cutoff: DateTime<Utc>) -> leaseq::Result<u64> {
        self.inner.cleanup_completed(cutoff).await
    }

    async fn pending_count(&self, queue_name: &str) -> leaseq::Result<u64> {
        self.inner.pending_count(queue_name).await
    }

    async fn stats(&self, queue_name: &str) -> leaseq::Result<QueueStats> {
        self.inner.stats(queue_name).await
    }

    async fn list_dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: u32,
    ) -> leaseq::Result<Vec<DeadLetterEntry>> {
        self.inner.list_dead_letters(queue_name, limit).await
    }
}

#[tokio::test]
async fn failed_dead_letter_write_leaves_message_reclaimable() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let queue =
        MessageQueue::new(Arc::new(DeadLetterFault::default())).with_clock(clock.clone());
    let id = queue
        .enqueue(NewMessage::new("jobs", "sync", "not json"))
        .await
        .unwrap()
        .id;
    let worker = Worker::new(
        queue.clone(),
        Arc::new(Fail { retryable: false }),
        config("jobs"),
    );

    assert!(matches!(worker.run_once().await, Err(Error::Other(_))));

    // Still leased, so the reaper can hand it out again.
    let message = queue.get(id).await.unwrap();
    assert_eq!(message.status, Status::Processing);
    assert_eq!(message.error_message, None);

    clock.advance(chrono::Duration::minutes(10));
    let reclaimed = queue
        .reset_stuck_messages(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(reclaimed, vec![id]);
    assert_eq!(queue.dequeue("jobs").await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn lost_lease_is_reported_not_fatal() {
    let (queue, clock) = setup();
    let id = queue
        .enqueue(NewMessage::new("jobs", "sync", "{}"))
        .await
        .unwrap()
        .id;
    let handler = Arc::new(Slow {
        queue: queue.clone(),
        clock: clock.clone(),
    });
    let worker = Worker::new(queue.clone(), handler, config("jobs"));

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.lost, 1);
    assert_eq!(report.completed, 0);

    // Back in the queue for another worker, retry budget untouched.
    let message = queue.get(id).await.unwrap();
    assert_eq!(message.status, Status::Pending);
    assert_eq!(message.retry_count, 0);
}

#[tokio::test]
async fn run_loop_drains_queue_and_stops_on_shutdown() {
    let (queue, _clock) = setup();
    for i in 0..5 {
        queue
            .enqueue(NewMessage::new("emails", "welcome", format!("{i}")))
            .await
            .unwrap();
    }

    let handler = Arc::new(Succeed::default());
    let worker = Worker::new(
        queue.clone(),
        handler.clone(),
        WorkerConfig {
            batch_size: 2,
            ..config("emails")
        },
    );
    let running = worker.clone();
    let task = tokio::spawn(async move { running.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.stats("emails").await.unwrap().completed < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker should drain the queue");

    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("worker should stop")
        .unwrap()
        .unwrap();
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn maintenance_pass_reaps_and_sweeps() {
    let (queue, clock) = setup();
    let stuck = queue
        .enqueue(NewMessage::new("jobs", "sync", "stuck"))
        .await
        .unwrap()
        .id;
    let done = queue
        .enqueue(NewMessage::new("jobs", "sync", "done"))
        .await
        .unwrap()
        .id;
    queue.dequeue_batch("jobs", 2).await.unwrap();
    queue
        .update_status(done, Status::Completed, None)
        .await
        .unwrap();

    let maintenance = Maintenance::new(
        queue.clone(),
        MaintenanceConfig {
            stuck_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_millis(10),
        },
    );

    assert_eq!(
        maintenance.run_once().await.unwrap(),
        MaintenanceReport::default()
    );

    clock.advance(chrono::Duration::days(2));
    assert_eq!(
        maintenance.run_once().await.unwrap(),
        MaintenanceReport {
            reclaimed: 1,
            deleted: 1,
        }
    );
    assert_eq!(queue.get(stuck).await.unwrap().status, Status::Pending);
    assert!(queue.get(done).await.is_err());
}

#[tokio::test]
async fn maintenance_loop_stops_on_shutdown() {
    let (queue, _clock) = setup();
    let maintenance = Maintenance::new(
        queue,
        MaintenanceConfig {
            interval: Duration::from_millis(10),
            ..MaintenanceConfig::default()
        },
    );

    let running = maintenance.clone();
    let task = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    maintenance.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("maintenance should stop")
        .unwrap()
        .unwrap();
}

#[test]
fn anyhow_errors_are_retryable() {
    let err: HandlerError = anyhow::anyhow!("socket closed").into();
    assert!(err.retryable);
    assert_eq!(err.to_string(), "socket closed");
}
