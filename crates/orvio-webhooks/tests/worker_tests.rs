#![cfg(feature = "integration")]

//! Worker loop and scheduling integration tests: claim leasing, retry
//! scheduling, orphan finalization, and the full poll-execute-retry cycle.
//!
//! Requires `DATABASE_URL` pointing at a scratch database. Run with:
//! `cargo test --features integration`.

mod common;

use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use common::db::TestContext;
use common::{deployment_started_payload, CaptureResponder, FailingResponder};
use orvio_db::models::{CreateWebhookDelivery, WebhookDelivery, WebhookDestination};
use orvio_webhooks::{
    DeliveryQueue, DeliveryService, DeliveryWorker, DispatchService, WebhookError, WorkerConfig,
};

// Worker tests claim from the shared deliveries table, so they run one at a
// time.
static WORKER_LOCK: Mutex<()> = Mutex::const_new(());

async fn seed_due_delivery(
    ctx: &TestContext,
    destination_id: Uuid,
    max_attempts: i32,
) -> WebhookDelivery {
    WebhookDelivery::create(
        &ctx.pool,
        CreateWebhookDelivery {
            tenant_id: ctx.tenant_id,
            destination_id,
            event_type: "deployment.started".to_string(),
            payload: deployment_started_payload(ctx.tenant_id),
            max_attempts,
        },
    )
    .await
    .expect("create delivery")
}

/// Lease away anything already due so the test only works its own records.
async fn quiesce(ctx: &TestContext) {
    WebhookDelivery::claim_due(&ctx.pool, 10_000, 3600.0)
        .await
        .expect("quiesce stale records");
}

struct RunningWorker {
    dispatch_service: DispatchService,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningWorker {
    /// Build the full service stack around `ctx` and start a worker.
    async fn start(ctx: &TestContext, config: WorkerConfig) -> Self {
        let (queue, rx) = DeliveryQueue::new();
        let delivery_service =
            DeliveryService::new(ctx.pool.clone(), ctx.cache.clone(), ctx.key())
                .expect("build delivery service");
        let dispatch_service = DispatchService::new(
            ctx.pool.clone(),
            ctx.cache.clone(),
            queue.clone(),
            delivery_service.clone(),
        );

        let shutdown = CancellationToken::new();
        let worker = DeliveryWorker::new(
            ctx.pool.clone(),
            delivery_service,
            queue.clone(),
            rx,
            config,
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { worker.run().await });

        Self {
            dispatch_service,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.expect("worker task completes");
    }
}

/// Poll the delivery row until it satisfies `done`, or panic at the
/// deadline.
async fn wait_for_delivery<F>(ctx: &TestContext, id: Uuid, deadline: Duration, done: F) -> WebhookDelivery
where
    F: Fn(&WebhookDelivery) -> bool,
{
    let started = std::time::Instant::now();
    loop {
        let row = WebhookDelivery::find_by_id(&ctx.pool, ctx.tenant_id, id)
            .await
            .expect("query delivery")
            .expect("delivery row exists");
        if done(&row) {
            return row;
        }
        if started.elapsed() > deadline {
            panic!(
                "Delivery {} did not reach the expected state in {:?}; last seen status={} attempt={}",
                id, deadline, row.status, row.attempt_number
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn fast_poll_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        poll_interval_ms: 100,
        batch_size: 20,
        lease_secs: 5.0,
    }
}

/// Test: Claiming a record leases it; a second claim cannot take it until
/// the lease expires.
#[tokio::test]
async fn test_claim_leases_record() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;
    quiesce(&ctx).await;

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/lease", &["deployment.started"])
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;

    let claimed = WebhookDelivery::claim_one(&ctx.pool, delivery.id, 0.5)
        .await
        .expect("first claim");
    assert!(claimed.is_some(), "Due record should be claimable");

    let second = WebhookDelivery::claim_one(&ctx.pool, delivery.id, 0.5)
        .await
        .expect("second claim");
    assert!(second.is_none(), "Leased record must not be claimable");

    // After the lease runs out the record becomes due again, so a crashed
    // worker cannot strand it.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let reclaimed = WebhookDelivery::claim_one(&ctx.pool, delivery.id, 0.5)
        .await
        .expect("reclaim");
    assert!(
        reclaimed.is_some(),
        "Expired lease must make the record claimable again"
    );
}

/// Test: claim_one ignores records that are not due or not in flight.
#[tokio::test]
async fn test_claim_one_ignores_unclaimable_records() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/idle", &["deployment.started"])
        .await;

    // A synchronous test send is created without a due time.
    let unqueued = WebhookDelivery::create_unqueued(
        &ctx.pool,
        CreateWebhookDelivery {
            tenant_id: ctx.tenant_id,
            destination_id: destination.id,
            event_type: "deployment.started".to_string(),
            payload: deployment_started_payload(ctx.tenant_id),
            max_attempts: 1,
        },
    )
    .await
    .expect("create unqueued delivery");

    let claim = WebhookDelivery::claim_one(&ctx.pool, unqueued.id, 5.0)
        .await
        .expect("claim unqueued");
    assert!(claim.is_none(), "Unqueued record must never be claimed");

    // A completed record is not claimable either.
    let done = seed_due_delivery(&ctx, destination.id, 4).await;
    WebhookDelivery::mark_success(&ctx.pool, done.id, 200, None, 10)
        .await
        .expect("mark success");
    let claim = WebhookDelivery::claim_one(&ctx.pool, done.id, 5.0)
        .await
        .expect("claim completed");
    assert!(claim.is_none(), "Completed record must never be claimed");
}

/// Test: schedule_retry moves only failed records, bumping the attempt.
#[tokio::test]
async fn test_schedule_retry_guarded_on_failed() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/sched", &["deployment.started"])
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;
    let due = chrono::Utc::now() + chrono::Duration::seconds(10);

    // Still pending: the guard refuses.
    let scheduled = WebhookDelivery::schedule_retry(&ctx.pool, ctx.tenant_id, delivery.id, due)
        .await
        .expect("schedule attempt");
    assert!(scheduled.is_none(), "Only failed records can be scheduled");

    WebhookDelivery::mark_failed(&ctx.pool, delivery.id, Some(500), None, "HTTP 500", 12, false)
        .await
        .expect("mark failed");

    let scheduled = WebhookDelivery::schedule_retry(&ctx.pool, ctx.tenant_id, delivery.id, due)
        .await
        .expect("schedule retry")
        .expect("failed record is schedulable");
    assert_eq!(scheduled.status, "retrying");
    assert_eq!(scheduled.attempt_number, 2);
    assert_eq!(scheduled.next_retry_at.map(|t| t.timestamp()), Some(due.timestamp()));
}

/// Test: Finalizing an orphaned record stamps the standard message.
#[tokio::test]
async fn test_finalize_destination_gone() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/orphan", &["deployment.started"])
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;

    let finalized =
        WebhookDelivery::finalize_destination_gone(&ctx.pool, ctx.tenant_id, delivery.id)
            .await
            .expect("finalize");
    assert!(finalized);

    let row = WebhookDelivery::find_by_id(&ctx.pool, ctx.tenant_id, delivery.id)
        .await
        .expect("query delivery")
        .expect("delivery row exists");
    assert_eq!(row.status, "failed");
    assert_eq!(
        row.error_message.as_deref(),
        Some("destination disabled or deleted")
    );
    assert!(row.completed_at.is_some());
    assert!(row.next_retry_at.is_none());

    // Already terminal: a second finalize is a no-op.
    let again = WebhookDelivery::finalize_destination_gone(&ctx.pool, ctx.tenant_id, delivery.id)
        .await
        .expect("finalize again");
    assert!(!again);
}

/// Test: The worker picks up a due record and delivers it.
#[tokio::test]
async fn test_worker_delivers_pending_record() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;
    quiesce(&ctx).await;

    let mock_server = MockServer::start().await;
    let responder = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(responder.clone())
        .mount(&mock_server)
        .await;

    let (destination, _) = ctx
        .insert_destination(
            &format!("{}/webhook", mock_server.uri()),
            &["deployment.started"],
        )
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;

    let worker = RunningWorker::start(&ctx, fast_poll_config()).await;

    let row = wait_for_delivery(&ctx, delivery.id, Duration::from_secs(10), |row| {
        row.status == "success"
    })
    .await;

    worker.stop().await;

    assert_eq!(row.attempt_number, 1, "First attempt should succeed");
    assert_eq!(row.response_code, Some(200));
    assert!(row.completed_at.is_some());
    assert_eq!(responder.request_count(), 1);
}

/// Test: A failed attempt is retried on the backoff schedule until it
/// succeeds.
#[tokio::test]
async fn test_worker_retries_failed_record() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;
    quiesce(&ctx).await;

    let mock_server = MockServer::start().await;
    let responder = FailingResponder::fail_times(1);
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(responder.clone())
        .mount(&mock_server)
        .await;

    let (destination, _) = ctx
        .insert_destination(
            &format!("{}/webhook", mock_server.uri()),
            &["deployment.started"],
        )
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;

    let worker = RunningWorker::start(&ctx, fast_poll_config()).await;

    // First attempt fails, the retry lands one second later.
    let row = wait_for_delivery(&ctx, delivery.id, Duration::from_secs(15), |row| {
        row.status == "success"
    })
    .await;

    worker.stop().await;

    assert_eq!(row.attempt_number, 2, "Success should come on the retry");
    assert_eq!(responder.attempt_count(), 2, "Endpoint saw exactly two attempts");

    let destination_row =
        WebhookDestination::find_by_id(&ctx.pool, ctx.tenant_id, destination.id)
            .await
            .expect("query destination")
            .expect("destination row exists");
    assert_eq!(
        destination_row.consecutive_failures, 0,
        "The eventual success clears the streak"
    );
}

/// Test: The worker finalizes records whose destination was disabled
/// mid-flight, without calling the endpoint.
#[tokio::test]
async fn test_worker_finalizes_orphaned_record() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;
    quiesce(&ctx).await;

    let mock_server = MockServer::start().await;
    let responder = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(responder.clone())
        .mount(&mock_server)
        .await;

    let (destination, _) = ctx
        .insert_destination(
            &format!("{}/webhook", mock_server.uri()),
            &["deployment.started"],
        )
        .await;
    let delivery = seed_due_delivery(&ctx, destination.id, 4).await;
    WebhookDestination::disable(&ctx.pool, ctx.tenant_id, destination.id)
        .await
        .expect("disable destination");

    let worker = RunningWorker::start(&ctx, fast_poll_config()).await;

    let row = wait_for_delivery(&ctx, delivery.id, Duration::from_secs(10), |row| {
        row.status == "failed"
    })
    .await;

    worker.stop().await;

    assert_eq!(
        row.error_message.as_deref(),
        Some("destination disabled or deleted")
    );
    assert!(row.completed_at.is_some());
    assert_eq!(
        responder.request_count(),
        0,
        "A disabled destination must never be called"
    );
}

/// Test: An operator retry of a terminally failed delivery flows through
/// the worker to success.
#[tokio::test]
async fn test_manual_retry_roundtrip() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;
    quiesce(&ctx).await;

    let mock_server = MockServer::start().await;
    let responder = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(responder.clone())
        .mount(&mock_server)
        .await;

    let (destination, _) = ctx
        .insert_destination(
            &format!("{}/webhook", mock_server.uri()),
            &["deployment.started"],
        )
        .await;

    // A delivery that already spent its whole budget.
    let delivery = seed_due_delivery(&ctx, destination.id, 1).await;
    WebhookDelivery::mark_failed(&ctx.pool, delivery.id, Some(500), None, "HTTP 500", 12, true)
        .await
        .expect("mark failed");

    let worker = RunningWorker::start(&ctx, fast_poll_config()).await;

    let requeued = worker
        .dispatch_service
        .retry_delivery(ctx.tenant_id, delivery.id)
        .await
        .expect("manual retry accepted");
    assert_eq!(requeued.status, "retrying");
    assert_eq!(requeued.attempt_number, 2);

    let row = wait_for_delivery(&ctx, delivery.id, Duration::from_secs(10), |row| {
        row.status == "success"
    })
    .await;

    worker.stop().await;

    assert_eq!(row.attempt_number, 2);
    assert_eq!(responder.request_count(), 1, "One request for the manual retry");
}

/// Test: Manual retry refuses records that are not in a failed state and
/// reports missing ones distinctly.
#[tokio::test]
async fn test_manual_retry_guards() {
    let _guard = WORKER_LOCK.lock().await;
    let ctx = TestContext::new().await;

    let (queue, _rx) = DeliveryQueue::new();
    let delivery_service = DeliveryService::new(ctx.pool.clone(), ctx.cache.clone(), ctx.key())
        .expect("build delivery service");
    let dispatch_service = DispatchService::new(
        ctx.pool.clone(),
        ctx.cache.clone(),
        queue,
        delivery_service,
    );

    let (destination, _) = ctx
        .insert_destination("https://hooks.example.com/guard", &["deployment.started"])
        .await;
    let pending = seed_due_delivery(&ctx, destination.id, 4).await;

    let result = dispatch_service
        .retry_delivery(ctx.tenant_id, pending.id)
        .await;
    assert!(
        matches!(result, Err(WebhookError::DeliveryNotRetryable(_))),
        "Pending deliveries are not retryable"
    );

    let result = dispatch_service
        .retry_delivery(ctx.tenant_id, Uuid::new_v4())
        .await;
    assert!(
        matches!(result, Err(WebhookError::DeliveryNotFound)),
        "Unknown ids are reported as missing"
    );

    // Another tenant cannot retry this tenant's delivery.
    WebhookDelivery::mark_failed(&ctx.pool, pending.id, Some(500), None, "HTTP 500", 12, true)
        .await
        .expect("mark failed");
    let result = dispatch_service
        .retry_delivery(Uuid::new_v4(), pending.id)
        .await;
    assert!(
        matches!(result, Err(WebhookError::DeliveryNotFound)),
        "Other tenants must not see the delivery at all"
    );
}
