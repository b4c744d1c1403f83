//! Event dispatch service.
//!
//! Fan-out entry point for platform events: looks up the tenant's active
//! destinations (cache-first), filters by subscription, creates one delivery
//! record per match, and nudges the worker. Dispatch never propagates an
//! error to the event producer; anything that goes wrong is logged and the
//! remaining destinations still get their records.
//!
//! Also provides the synchronous on-demand test send, which bypasses the
//! queue and runs a single attempt inline.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use orvio_db::models::{CreateWebhookDelivery, WebhookDelivery, WebhookDestination};

use crate::cache::DestinationCache;
use crate::error::WebhookError;
use crate::events::EventType;
use crate::queue::{DeliveryJob, DeliveryQueue};
use crate::services::delivery_service::DeliveryService;

/// Serialized payloads above this many bytes are replaced with a summary.
pub const MAX_PAYLOAD_BYTES: usize = 262_144;

/// Attempt budget for dispatched events.
pub const DISPATCH_MAX_ATTEMPTS: i32 = 4;

/// Attempt budget for on-demand test sends.
pub const TEST_MAX_ATTEMPTS: i32 = 1;

/// Service that turns platform events into delivery records.
#[derive(Clone)]
pub struct DispatchService {
    pool: PgPool,
    cache: DestinationCache,
    queue: DeliveryQueue,
    delivery_service: DeliveryService,
}

impl DispatchService {
    /// Create a new dispatch service.
    #[must_use]
    pub fn new(
        pool: PgPool,
        cache: DestinationCache,
        queue: DeliveryQueue,
        delivery_service: DeliveryService,
    ) -> Self {
        Self {
            pool,
            cache,
            queue,
            delivery_service,
        }
    }

    /// Fan an event out to every active destination subscribed to its type.
    ///
    /// Infallible by contract: event producers must never be failed by the
    /// webhook path.
    pub async fn dispatch_event(
        &self,
        tenant_id: Uuid,
        event_type: EventType,
        payload: serde_json::Value,
    ) {
        let destinations = self.active_destinations(tenant_id).await;

        let matching: Vec<&WebhookDestination> = destinations
            .iter()
            .filter(|d| d.event_types.iter().any(|e| e == event_type.as_str()))
            .collect();

        if matching.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                tenant_id = %tenant_id,
                event_type = %event_type,
                "No active destinations subscribe to event type"
            );
            return;
        }

        let payload = bounded_payload(event_type, payload);

        tracing::info!(
            target: "webhook_delivery",
            tenant_id = %tenant_id,
            event_type = %event_type,
            destination_count = matching.len(),
            "Dispatching event to subscribed destinations"
        );

        for destination in matching {
            let input = CreateWebhookDelivery {
                tenant_id,
                destination_id: destination.id,
                event_type: event_type.as_str().to_string(),
                payload: payload.clone(),
                max_attempts: DISPATCH_MAX_ATTEMPTS,
            };

            match WebhookDelivery::create(&self.pool, input).await {
                Ok(delivery) => {
                    // The row is already due; the nudge only saves a poll.
                    self.queue.notify(DeliveryJob::for_delivery(&delivery));
                }
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        tenant_id = %tenant_id,
                        destination_id = %destination.id,
                        event_type = %event_type,
                        error = %e,
                        "Failed to create delivery record"
                    );
                }
            }
        }
    }

    /// Synchronous connectivity check: one attempt, no retries, queue
    /// bypassed. Works on inactive destinations so an operator can verify an
    /// endpoint before re-enabling it.
    pub async fn test_delivery(
        &self,
        tenant_id: Uuid,
        destination_id: Uuid,
        event_type: Option<EventType>,
    ) -> Result<WebhookDelivery, WebhookError> {
        let destination = WebhookDestination::find_by_id(&self.pool, tenant_id, destination_id)
            .await?
            .ok_or(WebhookError::DestinationNotFound)?;

        let event_type = event_type.unwrap_or(EventType::DeploymentStarted);
        let payload = serde_json::json!({
            "event_type": event_type.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "test": true,
            "message": "Test delivery from orvio",
        });

        let delivery = WebhookDelivery::create_unqueued(
            &self.pool,
            CreateWebhookDelivery {
                tenant_id,
                destination_id,
                event_type: event_type.as_str().to_string(),
                payload,
                max_attempts: TEST_MAX_ATTEMPTS,
            },
        )
        .await?;

        self.delivery_service.execute(&delivery, &destination).await?;

        WebhookDelivery::find_by_id(&self.pool, tenant_id, delivery.id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)
    }

    /// Re-queue a failed delivery for one more attempt, on top of whatever
    /// budget it already spent. The state change is a single guarded update
    /// so two concurrent retries of the same record cannot double-queue it.
    pub async fn retry_delivery(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<WebhookDelivery, WebhookError> {
        match WebhookDelivery::reset_for_manual_retry(&self.pool, tenant_id, delivery_id).await? {
            Some(updated) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %updated.id,
                    destination_id = %updated.destination_id,
                    tenant_id = %tenant_id,
                    attempt_number = updated.attempt_number,
                    "Manual delivery retry queued"
                );
                self.queue.notify(DeliveryJob::for_delivery(&updated));
                Ok(updated)
            }
            None => {
                // The guard rejected the update: either the record does not
                // exist for this tenant or it is not in a failed state.
                let existing =
                    WebhookDelivery::find_by_id(&self.pool, tenant_id, delivery_id).await?;
                match existing {
                    Some(delivery) => Err(WebhookError::DeliveryNotRetryable(format!(
                        "delivery is {}, only failed deliveries can be retried",
                        delivery.status
                    ))),
                    None => Err(WebhookError::DeliveryNotFound),
                }
            }
        }
    }

    /// The tenant's active destinations, cache-first. A store error here is
    /// logged and treated as "no destinations" so dispatch stays infallible.
    async fn active_destinations(&self, tenant_id: Uuid) -> Vec<WebhookDestination> {
        if let Some(destinations) = self.cache.get(tenant_id).await {
            return destinations;
        }

        match WebhookDestination::find_active_by_tenant(&self.pool, tenant_id).await {
            Ok(destinations) => {
                self.cache.set(tenant_id, destinations.clone()).await;
                destinations
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    tenant_id = %tenant_id,
                    error = %e,
                    "Failed to load active destinations, skipping dispatch"
                );
                Vec::new()
            }
        }
    }
}

/// Replace a payload whose serialized form exceeds the cap with a summary
/// that still tells the subscriber what happened. Deliveries are never
/// dropped for size.
fn bounded_payload(event_type: EventType, payload: serde_json::Value) -> serde_json::Value {
    let size = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(0);
    if size <= MAX_PAYLOAD_BYTES {
        return payload;
    }

    tracing::warn!(
        target: "webhook_delivery",
        event_type = %event_type,
        original_size_bytes = size,
        "Payload exceeds delivery cap, sending truncated summary"
    );

    serde_json::json!({
        "event_type": event_type.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
        "truncated": true,
        "original_size_bytes": size,
    })
}
