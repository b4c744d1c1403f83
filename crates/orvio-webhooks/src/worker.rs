//! Delivery Worker
//!
//! Background worker that claims due deliveries from the database and
//! executes the HTTP attempts. Handles retry scheduling, terminal
//! failures, and graceful shutdown.
//!
//! The database is the source of truth: a delivery row with
//! `next_retry_at <= NOW()` is due, and claiming it pushes the lease
//! forward so concurrent workers skip it. The in-process queue only
//! nudges the worker so fresh events are attempted without waiting for
//! the next poll tick; a lost nudge costs latency, never a delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use orvio_db::models::{WebhookDelivery, WebhookDestination};

use crate::queue::{DeliveryJob, DeliveryQueue};
use crate::services::delivery_service::{
    calculate_next_retry_at, AttemptOutcome, DeliveryService,
};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery attempts.
    pub concurrency: usize,

    /// How often to poll for due deliveries (in milliseconds).
    pub poll_interval_ms: u64,

    /// Maximum deliveries claimed per poll.
    pub batch_size: i64,

    /// How long a claim parks a delivery before it becomes due again
    /// (in seconds). Must comfortably exceed the request timeout.
    pub lease_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 1000,
            batch_size: 20,
            lease_secs: 120.0,
        }
    }
}

/// Delivery worker that drains due webhook deliveries.
pub struct DeliveryWorker {
    pool: PgPool,
    delivery_service: DeliveryService,
    queue: DeliveryQueue,
    rx: mpsc::Receiver<DeliveryJob>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    /// Create a new worker.
    pub fn new(
        pool: PgPool,
        delivery_service: DeliveryService,
        queue: DeliveryQueue,
        rx: mpsc::Receiver<DeliveryJob>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            delivery_service,
            queue,
            rx,
            config,
            shutdown,
        }
    }

    /// Start the worker. Runs until the shutdown token is cancelled, then
    /// waits for in-flight attempts to finish.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Starting webhook delivery worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Worker shutdown requested, stopping poll loop");
                    break;
                }
                _ = poll_interval.tick() => {
                    self.poll_and_process(&semaphore).await;
                }
                Some(job) = self.rx.recv() => {
                    self.process_nudge(&semaphore, job).await;
                }
            }
        }

        // Wait for in-flight attempts to complete
        info!("Waiting for in-flight deliveries to complete...");
        let _ = semaphore.acquire_many(self.config.concurrency as u32).await;
        info!("Worker stopped");
    }

    /// Claim a batch of due deliveries and execute them.
    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        // Only claim what there are free slots for; anything left stays
        // due in the table and the next tick picks it up.
        let slots = semaphore.available_permits();
        if slots == 0 {
            return;
        }
        let batch_size = self.config.batch_size.min(slots as i64);

        let deliveries =
            match WebhookDelivery::claim_due(&self.pool, batch_size, self.config.lease_secs).await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!(error = %e, "Failed to claim due deliveries");
                    return;
                }
            };

        if deliveries.is_empty() {
            return;
        }

        debug!(count = deliveries.len(), "Claimed deliveries for processing");

        for delivery in deliveries {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                // Claimed rows we cannot seat stay leased; they become due
                // again once the lease lapses.
                warn!("All worker slots busy, leaving remaining claims to lease expiry");
                return;
            };
            self.spawn_attempt(permit, delivery);
        }
    }

    /// Handle a queue nudge for a specific delivery.
    async fn process_nudge(&self, semaphore: &Arc<Semaphore>, job: DeliveryJob) {
        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            // Busy; the delivery stays due and the poll loop will claim it.
            debug!(delivery_id = %job.delivery_id, "All worker slots busy, leaving nudge to the poller");
            return;
        };

        let delivery = match WebhookDelivery::claim_one(
            &self.pool,
            job.delivery_id,
            self.config.lease_secs,
        )
        .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                // Not due yet, already claimed elsewhere, or finished.
                debug!(delivery_id = %job.delivery_id, "Nudged delivery not claimable");
                return;
            }
            Err(e) => {
                error!(error = %e, delivery_id = %job.delivery_id, "Failed to claim nudged delivery");
                return;
            }
        };

        self.spawn_attempt(permit, delivery);
    }

    /// Execute one claimed delivery on a background task, holding a
    /// concurrency permit for its duration.
    fn spawn_attempt(&self, permit: OwnedSemaphorePermit, delivery: WebhookDelivery) {
        let pool = self.pool.clone();
        let delivery_service = self.delivery_service.clone();
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let _permit = permit; // Hold permit until the attempt completes
            process_delivery(pool, delivery_service, queue, delivery).await;
        });
    }
}

/// Process a single claimed delivery.
#[instrument(
    skip(pool, delivery_service, queue, delivery),
    fields(delivery_id = %delivery.id, attempt_number = delivery.attempt_number)
)]
async fn process_delivery(
    pool: PgPool,
    delivery_service: DeliveryService,
    queue: DeliveryQueue,
    delivery: WebhookDelivery,
) {
    let destination = match WebhookDestination::find_by_id(
        &pool,
        delivery.tenant_id,
        delivery.destination_id,
    )
    .await
    {
        Ok(Some(dest)) if dest.is_active => dest,
        Ok(_) => {
            // Destination removed or disabled since enqueue: finalize
            // instead of burning attempts against a dead endpoint.
            finalize_orphaned(&pool, &delivery).await;
            return;
        }
        Err(e) => {
            // Leave the row leased; it becomes due again when the lease
            // lapses and a later claim retries the lookup.
            error!(error = %e, delivery_id = %delivery.id, "Failed to load destination for delivery");
            return;
        }
    };

    match delivery_service.execute(&delivery, &destination).await {
        Ok(AttemptOutcome::Succeeded) => {}
        Ok(AttemptOutcome::Failed { terminal: true }) => {}
        Ok(AttemptOutcome::Failed { terminal: false }) => {
            schedule_next_attempt(&pool, &queue, &delivery).await;
        }
        Err(e) => {
            // Attempt aborted mid-flight (store failure). The lease lapses
            // and the poller re-claims the row, so the attempt is repeated
            // rather than lost.
            error!(error = %e, delivery_id = %delivery.id, "Delivery attempt aborted");
        }
    }
}

/// Finalize a delivery whose destination no longer accepts traffic.
async fn finalize_orphaned(pool: &PgPool, delivery: &WebhookDelivery) {
    match WebhookDelivery::finalize_destination_gone(pool, delivery.tenant_id, delivery.id).await {
        Ok(true) => {
            info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                destination_id = %delivery.destination_id,
                tenant_id = %delivery.tenant_id,
                "Delivery finalized, destination disabled or deleted"
            );
        }
        Ok(false) => {
            // Row already completed or picked up by another path.
            debug!(delivery_id = %delivery.id, "Delivery already finalized");
        }
        Err(e) => {
            error!(error = %e, delivery_id = %delivery.id, "Failed to finalize orphaned delivery");
        }
    }
}

/// Schedule the next attempt for a non-terminally failed delivery and
/// nudge the queue so it executes close to its due time.
async fn schedule_next_attempt(pool: &PgPool, queue: &DeliveryQueue, delivery: &WebhookDelivery) {
    let Some(next_retry_at) =
        calculate_next_retry_at(delivery.attempt_number, delivery.max_attempts)
    else {
        return;
    };

    match WebhookDelivery::schedule_retry(pool, delivery.tenant_id, delivery.id, next_retry_at)
        .await
    {
        Ok(Some(updated)) => {
            info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                destination_id = %delivery.destination_id,
                attempt_number = updated.attempt_number,
                next_retry_at = %next_retry_at,
                "Webhook delivery retry scheduled"
            );
            let delay = (next_retry_at - Utc::now()).to_std().unwrap_or_default();
            queue.notify_after(DeliveryJob::for_delivery(&updated), delay);
        }
        Ok(None) => {
            // Row changed state under us (manual retry raced the worker).
            debug!(delivery_id = %delivery.id, "Delivery no longer schedulable for retry");
        }
        Err(e) => {
            error!(error = %e, delivery_id = %delivery.id, "Failed to schedule delivery retry");
        }
    }
}
