//! Delivery nudge queue.
//!
//! The delivery row in the store is the durable job; this channel only tells
//! the worker "a row is due now" so freshly dispatched events and scheduled
//! retries are picked up without waiting for the next poll. Nudges are hints:
//! if one is dropped the polling loop still finds the row once it is due.

use std::time::Duration;

use orvio_db::models::WebhookDelivery;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Channel capacity for delivery nudges.
const CHANNEL_CAPACITY: usize = 1024;

/// Slack added to delayed nudges so they land after the row's due time.
const NUDGE_SLACK: Duration = Duration::from_millis(100);

/// A hint that one delivery row is due for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryJob {
    pub delivery_id: Uuid,
    pub tenant_id: Uuid,
    pub destination_id: Uuid,
}

impl DeliveryJob {
    /// Build a job hint from a delivery row.
    pub fn for_delivery(delivery: &WebhookDelivery) -> Self {
        Self {
            delivery_id: delivery.id,
            tenant_id: delivery.tenant_id,
            destination_id: delivery.destination_id,
        }
    }
}

/// Sender half of the nudge channel, shared by the dispatch path and the
/// retry scheduler. Cloneable; the worker owns the single receiver.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryJob>,
}

impl DeliveryQueue {
    /// Create the queue and the receiver the worker will drain.
    pub fn new() -> (Self, mpsc::Receiver<DeliveryJob>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Nudge the worker that a delivery is due now (non-blocking; drops the
    /// nudge if the channel is full).
    pub fn notify(&self, job: DeliveryJob) {
        let _ = self.tx.try_send(job);
    }

    /// Nudge the worker after `delay`, for retries scheduled at a known
    /// future due time. The slack keeps the nudge from arriving before the
    /// row itself is due.
    pub fn notify_after(&self, job: DeliveryJob, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay + NUDGE_SLACK).await;
            let _ = tx.try_send(job);
        });
    }
}
