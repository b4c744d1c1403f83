//! Delivery history and manual retry handlers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiResult, WebhookError};
use crate::models::{
    ListDeliveriesQuery, WebhookDeliveryListResponse, WebhookDeliveryResponse,
};
use crate::router::WebhooksState;
use orvio_db::models::{WebhookDelivery, WebhookDestination};

/// Extract the tenant id from the `x-tenant-id` request header.
fn extract_tenant_id(headers: &HeaderMap) -> Result<Uuid, WebhookError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(WebhookError::Unauthorized)
}

// ---------------------------------------------------------------------------
// Delivery history handlers
// ---------------------------------------------------------------------------

/// List delivery records for a destination.
#[utoipa::path(
    get,
    path = "/webhooks/destinations/{id}/deliveries",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Destination ID"),
        ListDeliveriesQuery,
    ),
    responses(
        (status = 200, description = "Paginated delivery list", body = WebhookDeliveryListResponse),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination not found"),
    )
)]
pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(destination_id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<WebhookDeliveryListResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    // Verify the destination exists and belongs to the tenant
    WebhookDestination::find_by_id(state.pool(), tenant_id, destination_id)
        .await
        .map_err(WebhookError::Database)?
        .ok_or(WebhookError::DestinationNotFound)?;

    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);
    let status = query.status.map(|s| s.as_str());

    let deliveries = WebhookDelivery::list_by_destination(
        state.pool(),
        tenant_id,
        destination_id,
        status,
        limit,
        offset,
    )
    .await
    .map_err(WebhookError::Database)?;

    let total =
        WebhookDelivery::count_by_destination(state.pool(), tenant_id, destination_id, status)
            .await
            .map_err(WebhookError::Database)?;

    Ok(Json(WebhookDeliveryListResponse {
        deliveries: deliveries.into_iter().map(WebhookDeliveryResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a single delivery record.
#[utoipa::path(
    get,
    path = "/webhooks/destinations/{id}/deliveries/{delivery_id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Destination ID"),
        ("delivery_id" = Uuid, Path, description = "Delivery ID"),
    ),
    responses(
        (status = 200, description = "Delivery details", body = WebhookDeliveryResponse),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Destination or delivery not found"),
    )
)]
pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path((destination_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<WebhookDeliveryResponse>> {
    let tenant_id = extract_tenant_id(&headers)?;

    // Verify the destination exists and belongs to the tenant
    WebhookDestination::find_by_id(state.pool(), tenant_id, destination_id)
        .await
        .map_err(WebhookError::Database)?
        .ok_or(WebhookError::DestinationNotFound)?;

    let delivery =
        WebhookDelivery::find_for_destination(state.pool(), tenant_id, destination_id, delivery_id)
            .await
            .map_err(WebhookError::Database)?
            .ok_or(WebhookError::DeliveryNotFound)?;

    Ok(Json(WebhookDeliveryResponse::from(delivery)))
}

// ---------------------------------------------------------------------------
// Manual retry
// ---------------------------------------------------------------------------

/// Queue one more attempt for a failed delivery.
#[utoipa::path(
    post,
    path = "/webhooks/deliveries/{id}/retry",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    responses(
        (status = 202, description = "Retry queued", body = WebhookDeliveryResponse),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Delivery not found"),
        (status = 409, description = "Delivery is not in a failed state"),
    )
)]
pub async fn retry_delivery_handler(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<WebhookDeliveryResponse>)> {
    let tenant_id = extract_tenant_id(&headers)?;

    let delivery = state
        .dispatch_service
        .retry_delivery(tenant_id, delivery_id)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(WebhookDeliveryResponse::from(delivery))))
}
