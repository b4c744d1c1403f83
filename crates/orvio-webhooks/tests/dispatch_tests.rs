#![cfg(feature = "integration")]

//! Dispatch fan-out integration tests against a live Postgres.
//!
//! Requires `DATABASE_URL` pointing at a scratch database. Run with:
//! `cargo test --features integration`.

mod common;

use uuid::Uuid;

use common::db::TestContext;
use common::oversized_payload;
use orvio_db::models::{WebhookDelivery, WebhookDestination};
use orvio_webhooks::services::dispatch_service::MAX_PAYLOAD_BYTES;
use orvio_webhooks::{DeliveryQueue, DeliveryService, DispatchService, EventType};

fn dispatch_service(ctx: &TestContext) -> (DispatchService, tokio::sync::mpsc::Receiver<orvio_webhooks::DeliveryJob>) {
    let (queue, rx) = DeliveryQueue::new();
    let delivery_service = DeliveryService::new(ctx.pool.clone(), ctx.cache.clone(), ctx.key())
        .expect("build delivery service");
    let service = DispatchService::new(
        ctx.pool.clone(),
        ctx.cache.clone(),
        queue,
        delivery_service,
    );
    (service, rx)
}

async fn deliveries_for(
    ctx: &TestContext,
    destination_id: Uuid,
) -> Vec<WebhookDelivery> {
    WebhookDelivery::list_by_destination(&ctx.pool, ctx.tenant_id, destination_id, None, 50, 0)
        .await
        .expect("list deliveries")
}

/// Test: Dispatch creates one pending record per subscribed destination.
#[tokio::test]
async fn test_dispatch_fans_out_to_subscribers() {
    let ctx = TestContext::new().await;
    let (service, mut rx) = dispatch_service(&ctx);

    let (first, _) = ctx
        .insert_destination("https://hooks.example.com/a", &["deployment.started"])
        .await;
    let (second, _) = ctx
        .insert_destination(
            "https://hooks.example.com/b",
            &["deployment.started", "sprint.closed"],
        )
        .await;
    let (unrelated, _) = ctx
        .insert_destination("https://hooks.example.com/c", &["sprint.closed"])
        .await;

    let payload = serde_json::json!({"deployment_id": "d-7", "service": "checkout"});
    service
        .dispatch_event(ctx.tenant_id, EventType::DeploymentStarted, payload.clone())
        .await;

    for destination in [&first, &second] {
        let rows = deliveries_for(&ctx, destination.id).await;
        assert_eq!(rows.len(), 1, "Subscriber should get exactly one record");

        let row = &rows[0];
        assert_eq!(row.status, "pending");
        assert_eq!(row.attempt_number, 1);
        assert_eq!(row.max_attempts, 4);
        assert_eq!(row.event_type, "deployment.started");
        assert_eq!(row.payload, payload);
        assert!(
            row.next_retry_at.is_some(),
            "Dispatched record must be immediately claimable"
        );
        assert!(row.completed_at.is_none());
    }

    let unrelated_rows = deliveries_for(&ctx, unrelated.id).await;
    assert!(
        unrelated_rows.is_empty(),
        "Non-subscribers must not receive records"
    );

    // One nudge per created record.
    let mut nudged = Vec::new();
    while let Ok(job) = rx.try_recv() {
        nudged.push(job.destination_id);
    }
    assert_eq!(nudged.len(), 2);
    assert!(nudged.contains(&first.id));
    assert!(nudged.contains(&second.id));
}

/// Test: Inactive destinations are skipped even when subscribed.
#[tokio::test]
async fn test_dispatch_skips_inactive_destinations() {
    let ctx = TestContext::new().await;
    let (service, _rx) = dispatch_service(&ctx);

    let (disabled, _) = ctx
        .insert_destination("https://hooks.example.com/off", &["deployment.started"])
        .await;
    WebhookDestination::disable(&ctx.pool, ctx.tenant_id, disabled.id)
        .await
        .expect("disable destination");

    service
        .dispatch_event(
            ctx.tenant_id,
            EventType::DeploymentStarted,
            serde_json::json!({"deployment_id": "d-8"}),
        )
        .await;

    let rows = deliveries_for(&ctx, disabled.id).await;
    assert!(rows.is_empty(), "Disabled destination must not receive records");
}

/// Test: Dispatch with no subscribers completes without error or side
/// effects.
#[tokio::test]
async fn test_dispatch_without_subscribers_is_noop() {
    let ctx = TestContext::new().await;
    let (service, mut rx) = dispatch_service(&ctx);

    service
        .dispatch_event(
            ctx.tenant_id,
            EventType::CostAlertTriggered,
            serde_json::json!({"budget": "monthly", "spend_usd": 1042.17}),
        )
        .await;

    assert!(rx.try_recv().is_err(), "No records means no nudges");
}

/// Test: A payload over the size cap is replaced by a summary document.
#[tokio::test]
async fn test_oversized_payload_stored_as_summary() {
    let ctx = TestContext::new().await;
    let (service, _rx) = dispatch_service(&ctx);

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/big", &["agent.task.completed"])
        .await;

    let payload = oversized_payload(MAX_PAYLOAD_BYTES + 4096);
    service
        .dispatch_event(ctx.tenant_id, EventType::AgentTaskCompleted, payload)
        .await;

    let rows = deliveries_for(&ctx, destination.id).await;
    assert_eq!(rows.len(), 1);

    let stored = &rows[0].payload;
    assert_eq!(stored["truncated"], serde_json::json!(true));
    assert_eq!(stored["event_type"], serde_json::json!("agent.task.completed"));
    assert!(
        stored["original_size_bytes"].as_u64().unwrap() as usize > MAX_PAYLOAD_BYTES,
        "Summary should report the original size"
    );
    assert!(
        stored.get("blob").is_none(),
        "Original payload content must not be stored"
    );
}

/// Test: A payload under the cap is stored unchanged.
#[tokio::test]
async fn test_payload_under_cap_stored_verbatim() {
    let ctx = TestContext::new().await;
    let (service, _rx) = dispatch_service(&ctx);

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/ok", &["agent.task.completed"])
        .await;

    // Just under the cap once serialized.
    let payload = oversized_payload(MAX_PAYLOAD_BYTES - 64);
    service
        .dispatch_event(ctx.tenant_id, EventType::AgentTaskCompleted, payload.clone())
        .await;

    let rows = deliveries_for(&ctx, destination.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, payload, "Payload under the cap must pass through");
}

/// Test: Dispatch populates the destination cache for subsequent events.
#[tokio::test]
async fn test_dispatch_populates_cache() {
    let ctx = TestContext::new().await;
    let (service, _rx) = dispatch_service(&ctx);

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/cached", &["story.created"])
        .await;

    assert!(
        ctx.cache.get(ctx.tenant_id).await.is_none(),
        "Cache starts cold"
    );

    service
        .dispatch_event(
            ctx.tenant_id,
            EventType::StoryCreated,
            serde_json::json!({"story_id": "s-1"}),
        )
        .await;

    let cached = ctx
        .cache
        .get(ctx.tenant_id)
        .await
        .expect("cache warmed by dispatch");
    assert!(cached.iter().any(|d| d.id == destination.id));
}

/// Test: Fan-out never crosses tenants.
#[tokio::test]
async fn test_dispatch_is_tenant_scoped() {
    let ctx = TestContext::new().await;
    let (service, _rx) = dispatch_service(&ctx);
    let other_tenant = Uuid::new_v4();

    let (other_destination, _) = ctx
        .insert_destination_for(
            other_tenant,
            "https://hooks.example.com/other",
            &["deployment.started"],
        )
        .await;

    service
        .dispatch_event(
            ctx.tenant_id,
            EventType::DeploymentStarted,
            serde_json::json!({"deployment_id": "d-9"}),
        )
        .await;

    let rows = WebhookDelivery::list_by_destination(
        &ctx.pool,
        other_tenant,
        other_destination.id,
        None,
        50,
        0,
    )
    .await
    .expect("list deliveries");
    assert!(
        rows.is_empty(),
        "Another tenant's destination must not receive this tenant's events"
    );
}
