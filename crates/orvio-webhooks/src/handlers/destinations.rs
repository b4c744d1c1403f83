//! Destination registry handlers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, WebhookError};
use crate::events::EventType;
use crate::models::{
    CreateWebhookDestinationRequest, CreateWebhookDestinationResponse, EventTypeInfo,
    EventTypeListResponse, ListDestinationsQuery, RotateSecretResponse, TestDeliveryRequest,
    UpdateWebhookDestinationRequest, WebhookDeliveryResponse, WebhookDestinationListResponse,
    WebhookDestinationResponse,
};
use crate::router::WebhooksState;

/// Extract the tenant id from the `x-tenant-id` request header.
fn extract_tenant_id(headers: &HeaderMap) -> Result<Uuid, WebhookError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(WebhookError::Unauthorized)
}

/// Extract the optional actor id from the `x-actor-id` request header.
fn extract_actor_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

// ---------------------------------------------------------------------------
// Destination CRUD handlers
// ---------------------------------------------------------------------------

/// Register a new webhook destination.
#[utoipa::path(
    post,
    path = "/webhooks/destinations",
    tag = "Webhooks",
    request_body = CreateWebhookDestinationRequest,
    responses(
        (status = 201, description = "Destination created; signing secret returned this once", body = CreateWebhookDestinationResponse),
        (status = 400, description = "Invalid URL, event types, or custom headers"),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 409, description = "Destination quota reached"),
    )
)]
pub async fn create_destination_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Json(request): Json<CreateWebhookDestinationRequest>,
) -> ApiResult<(StatusCode, Json<CreateWebhookDestinationResponse>)> {
    let tenant_id = extract_tenant_id(&headers)?;
    let actor_id = extract_actor_id(&headers);

    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let response = state
        .destination_service
        .create_destination(tenant_id, actor_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// List the tenant's destinations.
#[utoipa::path(
    get,
    path = "/webhooks/destinations",
    tag = "Webhooks",
    params(ListDestinationsQuery),
    responses(
        (status = 200, description = "Paginated destination list", body = WebhookDestinationListResponse),
        (status = 401, description = "Missing or invalid tenant header"),
    )
)]
pub async fn list_destinations_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Query(query): Query<ListDestinationsQuery>,
) -> ApiResult<Json<WebhookDestinationListResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    let response = state
        .destination_service
        .list_destinations(tenant_id, query)
        .await?;

    Ok(Json(response))
}

/// Get a single destination.
#[utoipa::path(
    get,
    path = "/webhooks/destinations/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Destination ID")),
    responses(
        (status = 200, description = "Destination details", body = WebhookDestinationResponse),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn get_destination_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookDestinationResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    let response = state
        .destination_service
        .get_destination(tenant_id, id)
        .await?;

    Ok(Json(response))
}

/// Partially update a destination.
#[utoipa::path(
    patch,
    path = "/webhooks/destinations/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Destination ID")),
    request_body = UpdateWebhookDestinationRequest,
    responses(
        (status = 200, description = "Updated destination", body = WebhookDestinationResponse),
        (status = 400, description = "Invalid URL, event types, or custom headers"),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn update_destination_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookDestinationRequest>,
) -> ApiResult<Json<WebhookDestinationResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let response = state
        .destination_service
        .update_destination(tenant_id, id, request)
        .await?;

    Ok(Json(response))
}

/// Delete a destination and its delivery history.
#[utoipa::path(
    delete,
    path = "/webhooks/destinations/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Destination ID")),
    responses(
        (status = 204, description = "Destination deleted"),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn delete_destination_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let tenant_id = extract_tenant_id(&headers)?;

    state
        .destination_service
        .delete_destination(tenant_id, id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Secret rotation and test sends
// ---------------------------------------------------------------------------

/// Rotate the destination's signing secret.
#[utoipa::path(
    post,
    path = "/webhooks/destinations/{id}/rotate-secret",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Destination ID")),
    responses(
        (status = 200, description = "New signing secret, returned this once", body = RotateSecretResponse),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn rotate_secret_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RotateSecretResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    let response = state.destination_service.rotate_secret(tenant_id, id).await?;

    Ok(Json(response))
}

/// Send a sample event to the destination and wait for the result.
#[utoipa::path(
    post,
    path = "/webhooks/destinations/{id}/test",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Destination ID")),
    request_body = TestDeliveryRequest,
    responses(
        (status = 200, description = "Completed test delivery record", body = WebhookDeliveryResponse),
        (status = 400, description = "Unknown event type"),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn test_destination_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    request: Option<Json<TestDeliveryRequest>>,
) -> ApiResult<Json<WebhookDeliveryResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let event_type = match request.event_type {
        Some(ref name) => Some(
            EventType::parse(name).ok_or_else(|| WebhookError::InvalidEventType(name.clone()))?,
        ),
        None => None,
    };

    let delivery = state
        .dispatch_service
        .test_delivery(tenant_id, id, event_type)
        .await?;

    Ok(Json(WebhookDeliveryResponse::from(delivery)))
}

// ---------------------------------------------------------------------------
// Event type catalog
// ---------------------------------------------------------------------------

/// List all event types destinations can subscribe to.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Fixed event type catalog", body = EventTypeListResponse),
    )
)]
pub async fn list_event_types_handler() -> Json<EventTypeListResponse> {
    let event_types = EventType::all()
        .iter()
        .map(|t| EventTypeInfo {
            event_type: t.as_str().to_string(),
            category: t.category().to_string(),
            description: t.description().to_string(),
        })
        .collect();

    Json(EventTypeListResponse { event_types })
}
