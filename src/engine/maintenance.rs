//! Periodic stuck-lease reaper and retention sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use crate::error::Result;
use crate::queue::MessageQueue;
use crate::store::QueueStore;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Leases older than this are presumed dead.
    pub stuck_timeout: Duration,
    /// Completed messages older than this are deleted.
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            stuck_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reclaimed: usize,
    pub deleted: u64,
}

pub struct Maintenance<S> {
    queue: MessageQueue<S>,
    config: MaintenanceConfig,
    shutdown: Arc<Notify>,
}

impl<S> Clone for Maintenance<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S: QueueStore> Maintenance<S> {
    pub fn new(queue: MessageQueue<S>, config: MaintenanceConfig) -> Self {
        Self {
            queue,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One reaper pass followed by one sweeper pass.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let reclaimed = self
            .queue
            .reset_stuck_messages(self.config.stuck_timeout)
            .await?
            .len();
        let deleted = self
            .queue
            .cleanup_old_messages(self.config.retention)
            .await?;
        Ok(MaintenanceReport { reclaimed, deleted })
    }

    /// Run a pass every `interval` until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        info!(interval_secs = self.config.interval.as_secs(), "maintenance started");

        loop {
            if let Err(e) = self.run_once().await {
                error!("maintenance pass error: {e}");
            }

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("maintenance shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}
