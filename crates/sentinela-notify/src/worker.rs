// Generic reliable-queue worker
//
// One worker per channel (email, SMS). Each cycle pulls up to a batch of
// items through the queue's atomic pending-to-in-flight move and attempts
// delivery. Outcome handling:
//
// - success: enviado record, item destroyed
// - permanent failure: immediate dead-letter (terminal falha record)
// - transient failure: retry with exponential backoff until max_retries,
//   then dead-letter
// - undeserializable item: destroyed and counted (poison)
//
// Items stranded in-flight by a crash are recovered once at start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sentinela_core::config::WorkerConfig;
use sentinela_core::queue::backoff_delay;
use sentinela_core::{
    DeliveryError, DeliveryQueue, NewNotificationRecord, NotificationChannel, NotificationLog,
    QueueItem,
};

/// Channel-specific delivery attempt
///
/// Returns metadata to persist with the `enviado` record on success.
#[async_trait]
pub trait QueueDelivery: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    async fn deliver(&self, item: &QueueItem) -> Result<serde_json::Value, DeliveryError>;
}

/// Per-worker delivery counters
#[derive(Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub sent: u64,
    pub failed: u64,
    pub errors: u64,
    pub pending: usize,
    pub inflight: usize,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Poll-driven worker over one DeliveryQueue
pub struct QueueWorker<D: QueueDelivery> {
    queue: Arc<dyn DeliveryQueue>,
    delivery: Arc<D>,
    log: Arc<dyn NotificationLog>,
    stats: Arc<WorkerStats>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D: QueueDelivery + 'static> QueueWorker<D> {
    pub fn new(
        queue: Arc<dyn DeliveryQueue>,
        delivery: Arc<D>,
        log: Arc<dyn NotificationLog>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            delivery,
            log,
            stats: Arc::new(WorkerStats::new()),
            config,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub async fn stats_snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.stats.processed.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            pending: self.queue.pending_len().await.unwrap_or(0),
            inflight: self.queue.inflight_len().await.unwrap_or(0),
        }
    }

    /// Recover stranded items, then poll until shutdown
    pub async fn start(self: &Arc<Self>) {
        let channel = self.delivery.channel();
        match self.queue.recover_inflight().await {
            Ok(0) => {}
            Ok(recovered) => {
                info!(%channel, recovered, "recovered stranded in-flight items")
            }
            Err(err) => warn!(%channel, %err, "could not recover in-flight items"),
        }

        info!(%channel, "starting queue worker");
        let worker = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let worked = worker.run_cycle().await;
                if worked == 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(worker.config.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
            info!(channel = %worker.delivery.channel(), "queue worker stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Pull and handle up to one batch; returns how many items were worked
    ///
    /// Deferred items cycled back to pending do not count as work, so a
    /// queue holding only parked retries still lets the poll loop sleep.
    async fn run_cycle(&self) -> usize {
        let mut worked = 0;
        for _ in 0..self.config.batch_size {
            let raw = match self.queue.pull_to_inflight().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(err) => {
                    error!(channel = %self.delivery.channel(), %err, "queue pull failed");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            };
            if self.handle_raw(raw, Utc::now()).await {
                worked += 1;
            }
        }
        worked
    }

    /// Handle one raw in-flight item; returns false when it was only a
    /// deferred item cycled back to pending
    async fn handle_raw(&self, raw: String, now: DateTime<Utc>) -> bool {
        let channel = self.delivery.channel();
        let mut item: QueueItem = match serde_json::from_str(&raw) {
            Ok(item) => item,
            Err(err) => {
                warn!(%channel, %err, "dropping undeserializable queue item");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.remove(&raw).await;
                return true;
            }
        };

        // Parked until its retry time; send it to the back of the line
        if item.is_deferred(now) {
            self.requeue(&raw, &item).await;
            return false;
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        match self.delivery.deliver(&item).await {
            Ok(metadata) => {
                debug!(%channel, item_id = %item.id, "delivered");
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                self.record(NewNotificationRecord::sent(
                    item.occurrence_id,
                    channel,
                    metadata,
                ))
                .await;
                self.remove(&raw).await;
            }
            Err(DeliveryError::Permanent(reason)) => {
                warn!(%channel, item_id = %item.id, %reason, "permanent failure, dead-lettering");
                self.dead_letter(&raw, &item, &reason).await;
            }
            Err(DeliveryError::Transient(reason)) => {
                item.retries += 1;
                item.last_attempt_at = Some(now);
                item.last_error = Some(reason.clone());

                if item.retries_exhausted() {
                    warn!(
                        %channel,
                        item_id = %item.id,
                        retries = item.retries,
                        %reason,
                        "retries exhausted, dead-lettering"
                    );
                    self.dead_letter(&raw, &item, &reason).await;
                    return true;
                }

                let delay = backoff_delay(item.retries);
                item.next_retry_at = Some(now + delay);
                debug!(
                    %channel,
                    item_id = %item.id,
                    retries = item.retries,
                    delay_secs = delay.num_seconds(),
                    "transient failure, scheduling retry"
                );
                self.requeue(&raw, &item).await;
            }
        }
        true
    }

    /// Terminal failure: remove the item and persist its sole durable trace
    async fn dead_letter(&self, raw: &str, item: &QueueItem, reason: &str) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        self.record(NewNotificationRecord::failed(
            item.occurrence_id,
            self.delivery.channel(),
            reason,
            serde_json::json!({ "retries": item.retries, "recipient_item": item.id }),
        ))
        .await;
        self.remove(raw).await;
    }

    async fn record(&self, record: NewNotificationRecord) {
        if let Err(err) = self.log.record(record).await {
            warn!(channel = %self.delivery.channel(), %err, "failed to record delivery outcome");
        }
    }

    async fn requeue(&self, raw: &str, item: &QueueItem) {
        if let Err(err) = self.queue.requeue(raw, item).await {
            error!(channel = %self.delivery.channel(), %err, "requeue failed");
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn remove(&self, raw: &str) {
        if let Err(err) = self.queue.remove_inflight(raw).await {
            error!(channel = %self.delivery.channel(), %err, "in-flight removal failed");
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
