//! Request and response DTOs for the webhook destination API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orvio_db::models::{WebhookDelivery, WebhookDestination};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Destination Requests
// ============================================================================

/// Request for POST /webhooks/destinations.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateWebhookDestinationRequest {
    /// Human-readable destination name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    /// Optional description.
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// HTTPS endpoint that receives the signed deliveries.
    #[validate(length(min = 1, max = 2048, message = "URL must be 1-2048 characters"))]
    pub url: String,

    /// Event types to subscribe to (wire names from the catalog).
    #[validate(length(min = 1, max = 20, message = "Subscribe to 1-20 event types"))]
    pub event_types: Vec<String>,

    /// Extra headers sent with every delivery (stored encrypted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_headers: Option<HashMap<String, String>>,

    /// Consecutive-failure threshold before auto-disable. Default: 3.
    #[serde(default = "default_max_consecutive_failures")]
    #[validate(range(min = 1, max = 10, message = "Threshold must be 1-10"))]
    pub max_consecutive_failures: i32,
}

fn default_max_consecutive_failures() -> i32 {
    3
}

/// Request for PATCH /webhooks/destinations/:id. Absent fields are left
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateWebhookDestinationRequest {
    /// New name (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// New description (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// New endpoint URL (optional). Changing it resets the consecutive
    /// failure counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Replacement subscription list (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<String>>,

    /// Replacement custom headers (optional). Send an empty object to clear
    /// them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_headers: Option<HashMap<String, String>>,

    /// Enable or disable the destination (optional). Re-enabling resets the
    /// consecutive failure counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    /// New auto-disable threshold (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<i32>,
}

impl Validate for UpdateWebhookDestinationRequest {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if let Some(ref name) = self.name {
            if name.is_empty() || name.len() > 100 {
                let mut err = validator::ValidationError::new("length");
                err.message = Some("Name must be 1-100 characters".into());
                errors.add("name", err);
            }
        }

        if let Some(ref desc) = self.description {
            if desc.len() > 500 {
                let mut err = validator::ValidationError::new("length");
                err.message = Some("Description must be at most 500 characters".into());
                errors.add("description", err);
            }
        }

        if let Some(ref url) = self.url {
            if url.is_empty() || url.len() > 2048 {
                let mut err = validator::ValidationError::new("length");
                err.message = Some("URL must be 1-2048 characters".into());
                errors.add("url", err);
            }
        }

        if let Some(ref event_types) = self.event_types {
            if event_types.is_empty() || event_types.len() > 20 {
                let mut err = validator::ValidationError::new("length");
                err.message = Some("Subscribe to 1-20 event types".into());
                errors.add("event_types", err);
            }
        }

        if let Some(threshold) = self.max_consecutive_failures {
            if !(1..=10).contains(&threshold) {
                let mut err = validator::ValidationError::new("range");
                err.message = Some("Threshold must be 1-10".into());
                errors.add("max_consecutive_failures", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Request for POST /webhooks/destinations/:id/test.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TestDeliveryRequest {
    /// Event type for the sample payload. Default: `deployment.started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

// ============================================================================
// Destination Responses
// ============================================================================

/// Destination details returned by the API. Secret material never appears;
/// `has_custom_headers` only signals presence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookDestinationResponse {
    /// Destination ID.
    pub id: Uuid,

    /// Owning tenant.
    pub tenant_id: Uuid,

    /// Destination name.
    pub name: String,

    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Endpoint URL.
    pub url: String,

    /// Subscribed event types (wire names).
    pub event_types: Vec<String>,

    /// Whether custom headers are configured.
    pub has_custom_headers: bool,

    /// Whether the destination receives dispatches.
    pub is_active: bool,

    /// Lifetime count of failed delivery attempts.
    pub failure_count: i64,

    /// Current consecutive-failure streak.
    pub consecutive_failures: i32,

    /// Streak length that triggers auto-disable.
    pub max_consecutive_failures: i32,

    /// When a delivery last targeted this destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// Outcome of the most recent delivery attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_status: Option<String>,

    /// User who registered the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,

    /// When the destination was created.
    pub created_at: DateTime<Utc>,

    /// When the destination was last updated.
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookDestination> for WebhookDestinationResponse {
    fn from(destination: WebhookDestination) -> Self {
        Self {
            id: destination.id,
            tenant_id: destination.tenant_id,
            name: destination.name,
            description: destination.description,
            url: destination.url,
            event_types: destination.event_types,
            has_custom_headers: destination.custom_headers_encrypted.is_some(),
            is_active: destination.is_active,
            failure_count: destination.failure_count,
            consecutive_failures: destination.consecutive_failures,
            max_consecutive_failures: destination.max_consecutive_failures,
            last_triggered_at: destination.last_triggered_at,
            last_delivery_status: destination.last_delivery_status,
            created_by: destination.created_by,
            created_at: destination.created_at,
            updated_at: destination.updated_at,
        }
    }
}

/// Response for POST /webhooks/destinations. The signing secret appears here
/// and nowhere else; it cannot be retrieved again.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWebhookDestinationResponse {
    /// The created destination.
    pub destination: WebhookDestinationResponse,

    /// One-time signing secret.
    pub secret: String,
}

/// Response for POST /webhooks/destinations/:id/rotate-secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RotateSecretResponse {
    /// Destination ID.
    pub id: Uuid,

    /// New one-time signing secret; previous secret is invalid immediately.
    pub secret: String,
}

/// Response for GET /webhooks/destinations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookDestinationListResponse {
    /// One page of destinations, newest first.
    pub destinations: Vec<WebhookDestinationResponse>,

    /// Total destinations matching the filter.
    pub total: i64,

    /// Page size used.
    pub limit: i64,

    /// Offset used.
    pub offset: i64,
}

// ============================================================================
// Delivery Responses
// ============================================================================

/// Delivery record details returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookDeliveryResponse {
    /// Delivery ID.
    pub id: Uuid,

    /// Owning tenant.
    pub tenant_id: Uuid,

    /// Target destination.
    pub destination_id: Uuid,

    /// Event type delivered.
    pub event_type: String,

    /// Payload as transmitted (possibly a truncated summary).
    pub payload: serde_json::Value,

    /// Delivery status: pending, success, failed, or retrying.
    pub status: String,

    /// Attempt counter, starting at 1.
    pub attempt_number: i32,

    /// Attempt budget for this record.
    pub max_attempts: i32,

    /// When the next attempt is due, while retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// HTTP status returned by the endpoint, when one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i16>,

    /// Response body, capped at 1024 bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,

    /// Error message for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Duration of the most recent attempt in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for WebhookDeliveryResponse {
    fn from(delivery: WebhookDelivery) -> Self {
        Self {
            id: delivery.id,
            tenant_id: delivery.tenant_id,
            destination_id: delivery.destination_id,
            event_type: delivery.event_type,
            payload: delivery.payload,
            status: delivery.status,
            attempt_number: delivery.attempt_number,
            max_attempts: delivery.max_attempts,
            next_retry_at: delivery.next_retry_at,
            response_code: delivery.response_code,
            response_body: delivery.response_body,
            error_message: delivery.error_message,
            duration_ms: delivery.duration_ms,
            created_at: delivery.created_at,
            completed_at: delivery.completed_at,
        }
    }
}

/// Response for GET /webhooks/destinations/:id/deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookDeliveryListResponse {
    /// One page of delivery records, newest first.
    pub deliveries: Vec<WebhookDeliveryResponse>,

    /// Total records matching the filter.
    pub total: i64,

    /// Page size used.
    pub limit: i64,

    /// Offset used.
    pub offset: i64,
}

// ============================================================================
// Event Types
// ============================================================================

/// One catalog entry for GET /webhooks/event-types.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeInfo {
    /// Wire name, e.g. `deployment.succeeded`.
    pub event_type: String,

    /// Coarse grouping, e.g. `deployment`.
    pub category: String,

    /// Human-readable description.
    pub description: String,
}

/// Response for GET /webhooks/event-types.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    /// The full fixed catalog.
    pub event_types: Vec<EventTypeInfo>,
}

// ============================================================================
// Query Parameters
// ============================================================================

/// Delivery status filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    /// Stored status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }
}

/// Query parameters for GET /webhooks/destinations.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListDestinationsQuery {
    /// Filter by active flag.
    pub is_active: Option<bool>,

    /// Maximum results per page (clamped to 1-100). Default: 50.
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Pagination offset. Default: 0.
    #[serde(default)]
    pub offset: i64,
}

/// Query parameters for GET /webhooks/destinations/:id/deliveries.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    /// Filter by delivery status.
    pub status: Option<DeliveryStatus>,

    /// Maximum results per page (clamped to 1-100). Default: 50.
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Pagination offset. Default: 0.
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}
