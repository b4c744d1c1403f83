//! Business logic services for the webhook delivery engine.

pub mod delivery_service;
pub mod destination_service;
pub mod dispatch_service;
