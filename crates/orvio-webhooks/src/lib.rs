//! Outgoing webhook delivery for platform lifecycle events.
//!
//! Provides tenant-scoped destination management, async delivery with
//! HMAC-SHA256 signing, fixed-schedule retries, and delivery tracking.

pub mod cache;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod router;
pub mod services;
pub mod validation;
pub mod worker;

pub use cache::DestinationCache;
pub use error::WebhookError;
pub use events::EventType;
pub use queue::{DeliveryJob, DeliveryQueue};
pub use router::{webhooks_router, WebhooksState};
pub use services::delivery_service::DeliveryService;
pub use services::destination_service::DestinationService;
pub use services::dispatch_service::DispatchService;
pub use worker::{DeliveryWorker, WorkerConfig};
