//! Row models for the webhook delivery service.

pub mod webhook_delivery;
pub mod webhook_destination;

pub use webhook_delivery::{CreateWebhookDelivery, WebhookDelivery};
pub use webhook_destination::{
    CreateWebhookDestination, FailureAccounting, UpdateWebhookDestination, WebhookDestination,
};
