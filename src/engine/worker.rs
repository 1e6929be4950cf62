//! Worker loop: lease, handle, record the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{QueueMessage, Status};
use crate::queue::MessageQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::QueueStore;
use crate::telemetry::queue::{record_status_transition, start_process_span};

/// Application code that processes one message.
///
/// May run more than once for the same message; implementations must be
/// idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> std::result::Result<(), HandlerError>;
}

/// A failed handler run.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// `false` skips the remaining retry budget and dead-letters at once.
    pub retryable: bool,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub batch_size: u32,
    /// Sleep between polls when the queue has nothing eligible.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// What one [`Worker::run_once`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Outcome writes rejected because the lease had already been reclaimed.
    pub lost: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed + self.retried + self.dead_lettered + self.lost
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

enum Outcome {
    Completed,
    Retried,
    DeadLettered,
}

pub struct Worker<S, H> {
    queue: MessageQueue<S>,
    handler: Arc<H>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl<S, H> Clone for Worker<S, H> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S: QueueStore, H: Handler> Worker<S, H> {
    pub fn new(queue: MessageQueue<S>, handler: Arc<H>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker loop to stop after the current batch.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Poll and process until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        info!(queue = %self.config.queue_name, "worker started");

        loop {
            let idle = match self.run_once().await {
                Ok(report) => report.is_empty(),
                Err(e) => {
                    error!(queue = %self.config.queue_name, "worker batch error: {e}");
                    true
                }
            };
            let pause = if idle {
                self.config.poll_interval
            } else {
                Duration::ZERO
            };

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!(queue = %self.config.queue_name, "worker shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Lease one batch and record an outcome for every message in it.
    pub async fn run_once(&self) -> Result<BatchReport> {
        let batch = self
            .queue
            .dequeue_batch(&self.config.queue_name, self.config.batch_size)
            .await?;

        let mut report = BatchReport::default();
        for message in batch {
            match self.process(message).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::DeadLettered) => report.dead_lettered += 1,
                Err(Error::InvalidTransition { id, from, .. }) => {
                    warn!(id = %id, current = %from, "lease lost before outcome was recorded");
                    report.lost += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    async fn process(&self, message: QueueMessage) -> Result<Outcome> {
        let span = start_process_span(&message);

        async {
            match self.handler.handle(&message).await {
                Ok(()) => {
                    self.queue
                        .update_status(message.id, Status::Completed, None)
                        .await?;
                    record_status_transition(&span, "processing", "completed");
                    Ok(Outcome::Completed)
                }
                Err(err) => self.fail(&span, message, err).await,
            }
        }
        .instrument(span.clone())
        .await
    }

    async fn fail(
        &self,
        span: &tracing::Span,
        mut message: QueueMessage,
        err: HandlerError,
    ) -> Result<Outcome> {
        let decision = if err.retryable {
            self.config.retry.decide(&message, self.queue.now())
        } else {
            RetryDecision::DeadLetter
        };

        match decision {
            RetryDecision::Retry { at } => {
                self.queue
                    .schedule_retry(message.id, at, &err.message)
                    .await?;
                record_status_transition(span, "processing", "pending");
                Ok(Outcome::Retried)
            }
            RetryDecision::DeadLetter => {
                // Single write straight from Processing. If it fails the lease
                // stays in place and the reaper returns the message.
                message.error_message = Some(err.message);
                self.queue.move_to_dead_letter(&message).await?;
                record_status_transition(span, "processing", "dead_letter");
                Ok(Outcome::DeadLettered)
            }
        }
    }
}
