//! Orvio Webhooks API
//!
//! Outgoing webhook delivery service: destination registry, event dispatch,
//! signed delivery with retries, and delivery history endpoints.

mod config;
mod logging;

use std::net::SocketAddr;

use axum::{routing::get, Json, Router};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::Config;
use orvio_db::DbPool;
use orvio_webhooks::{
    webhooks_router, DeliveryQueue, DeliveryService, DeliveryWorker, DestinationCache,
    DestinationService, DispatchService, WebhooksState, WorkerConfig,
};

/// Upper bound on incoming request bodies. Keeps oversized event payloads
/// from tying up the API before JSON parsing even starts.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() {
    // Load configuration (fail-fast on missing required values)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    for warning in config.insecure_default_warnings() {
        warn!("{warning}");
    }

    // Database pool and migrations
    let db = match DbPool::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = orvio_db::run_migrations(&db).await {
        eprintln!("Failed to run migrations: {e}");
        std::process::exit(1);
    }

    let pool = db.inner().clone();

    // Shared delivery plumbing: the cache and queue are shared between the
    // HTTP handlers and the background worker.
    let cache = DestinationCache::new();
    let (queue, queue_rx) = DeliveryQueue::new();
    let encryption_key = config.webhook_encryption_key.to_vec();

    let delivery_service =
        match DeliveryService::new(pool.clone(), cache.clone(), encryption_key.clone()) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to build delivery HTTP client: {e}");
                std::process::exit(1);
            }
        };

    let destination_service = DestinationService::new(pool.clone(), cache.clone(), encryption_key)
        .with_max_destinations(config.max_destinations)
        .with_allow_insecure_urls(config.allow_insecure_urls);

    let dispatch_service = DispatchService::new(
        pool.clone(),
        cache,
        queue.clone(),
        delivery_service.clone(),
    );

    // Background delivery worker
    let worker_token = CancellationToken::new();
    let worker_config = WorkerConfig {
        concurrency: config.worker_concurrency,
        poll_interval_ms: config.worker_poll_ms,
        ..WorkerConfig::default()
    };
    let worker = DeliveryWorker::new(
        pool.clone(),
        delivery_service,
        queue,
        queue_rx,
        worker_config,
        worker_token.clone(),
    );
    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });
    info!("Webhook delivery worker started");

    // Router
    let state = WebhooksState::new(pool, destination_service, dispatch_service);
    let app = Router::new()
        .route("/health", get(health_handler))
        .merge(webhooks_router(state))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_REQUEST_BODY_BYTES,
        ));

    // Bind and serve
    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Invalid bind address {}: {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "Webhooks API listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }

    // Stop the worker and wait for in-flight deliveries to finish
    worker_token.cancel();
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Delivery worker did not shut down cleanly");
    }
    info!("Server shutdown complete");
}

/// Liveness endpoint.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                // Wait forever if we can't install the handler
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
