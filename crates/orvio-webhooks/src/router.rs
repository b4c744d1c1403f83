//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;

use crate::handlers::{deliveries, destinations};
use crate::services::destination_service::DestinationService;
use crate::services::dispatch_service::DispatchService;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub destination_service: Arc<DestinationService>,
    pub dispatch_service: Arc<DispatchService>,
    pool: PgPool,
}

impl WebhooksState {
    /// Create a new webhooks state. The services are built by the caller so
    /// the dispatch queue can be shared with the delivery worker.
    pub fn new(
        pool: PgPool,
        destination_service: DestinationService,
        dispatch_service: DispatchService,
    ) -> Self {
        Self {
            destination_service: Arc::new(destination_service),
            dispatch_service: Arc::new(dispatch_service),
            pool,
        }
    }

    /// Get a reference to the database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Creates the webhook router with all routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Destination CRUD
        .route(
            "/webhooks/destinations",
            post(destinations::create_destination_handler)
                .get(destinations::list_destinations_handler),
        )
        .route(
            "/webhooks/destinations/:id",
            get(destinations::get_destination_handler)
                .patch(destinations::update_destination_handler)
                .delete(destinations::delete_destination_handler),
        )
        .route(
            "/webhooks/destinations/:id/rotate-secret",
            post(destinations::rotate_secret_handler),
        )
        .route(
            "/webhooks/destinations/:id/test",
            post(destinations::test_destination_handler),
        )
        // Event types
        .route(
            "/webhooks/event-types",
            get(destinations::list_event_types_handler),
        )
        // Delivery history
        .route(
            "/webhooks/destinations/:id/deliveries",
            get(deliveries::list_deliveries_handler),
        )
        .route(
            "/webhooks/destinations/:id/deliveries/:delivery_id",
            get(deliveries::get_delivery_handler),
        )
        // Manual retry
        .route(
            "/webhooks/deliveries/:id/retry",
            post(deliveries::retry_delivery_handler),
        )
        .with_state(state)
}
