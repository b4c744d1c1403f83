//! Webhook delivery execution service.
//!
//! Executes a single delivery attempt: decrypts the destination's signing
//! secret, signs the exact payload bytes with HMAC-SHA256, POSTs with the
//! engine headers plus any decrypted custom headers, records the outcome on
//! the delivery record, and keeps the destination's failure accounting (with
//! auto-disable) current. An unreachable endpoint is data, not an error;
//! `execute` returns `Err` only when the store itself fails.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use sqlx::PgPool;

use orvio_db::models::{WebhookDelivery, WebhookDestination};

use crate::cache::DestinationCache;
use crate::crypto;
use crate::error::WebhookError;
use crate::validation;

/// Per-attempt HTTP timeout in seconds.
pub const DELIVERY_TIMEOUT_SECS: u64 = 10;

/// User agent presented to destination endpoints.
pub const USER_AGENT: &str = "orvio-webhooks/1.0";

/// Stored response bodies are capped to this many bytes.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1024;

/// Retry backoff in seconds, indexed by the just-failed attempt number
/// (attempt 1 -> 1s, 2 -> 10s, 3 -> 60s; later attempts stay at the cap).
const BACKOFF_SCHEDULE_SECS: [i64; 3] = [1, 10, 60];

/// Result of one delivery attempt, after the stores are updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The endpoint answered 2xx; the record is terminal success.
    Succeeded,
    /// The attempt failed. `terminal` means the attempt budget is spent and
    /// no retry will be scheduled.
    Failed { terminal: bool },
}

/// Service that performs delivery attempts.
#[derive(Clone)]
pub struct DeliveryService {
    pool: PgPool,
    cache: DestinationCache,
    http_client: Client,
    encryption_key: Vec<u8>,
}

impl DeliveryService {
    /// Create a new delivery service with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        pool: PgPool,
        cache: DestinationCache,
        encryption_key: Vec<u8>,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            pool,
            cache,
            http_client,
            encryption_key,
        })
    }

    /// Execute one delivery attempt and persist its outcome.
    pub async fn execute(
        &self,
        delivery: &WebhookDelivery,
        destination: &WebhookDestination,
    ) -> Result<AttemptOutcome, WebhookError> {
        let payload_bytes = match serde_json::to_vec(&delivery.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .complete_failure(
                        delivery,
                        destination,
                        format!("Failed to serialize payload: {e}"),
                        None,
                        None,
                        0,
                    )
                    .await;
            }
        };

        let secret = match crypto::decrypt(&destination.secret_encrypted, &self.encryption_key) {
            Ok(secret) => secret,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    destination_id = %destination.id,
                    error = %e,
                    "Failed to decrypt signing secret"
                );
                return self
                    .complete_failure(
                        delivery,
                        destination,
                        "Failed to decrypt signing secret".to_string(),
                        None,
                        None,
                        0,
                    )
                    .await;
            }
        };

        // The signature covers exactly the bytes placed on the wire.
        let signature = crypto::sign_payload(&secret, &payload_bytes);
        let timestamp = Utc::now().timestamp().to_string();

        let mut headers = reqwest::header::HeaderMap::new();
        self.apply_custom_headers(delivery, destination, &mut headers);

        // Engine headers land after the custom set so a stored header blob
        // can never shadow them.
        if let Ok(v) = "application/json".parse() {
            headers.insert("Content-Type", v);
        }
        if let Ok(v) = signature.parse() {
            headers.insert("X-Webhook-Signature", v);
        }
        if let Ok(v) = delivery.event_type.parse() {
            headers.insert("X-Webhook-Event", v);
        }
        if let Ok(v) = delivery.id.to_string().parse() {
            headers.insert("X-Webhook-Delivery", v);
        }
        if let Ok(v) = timestamp.parse() {
            headers.insert("X-Webhook-Timestamp", v);
        }

        let start = Instant::now();
        let result = self
            .http_client
            .post(&destination.url)
            .headers(headers)
            .body(payload_bytes)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(response) => {
                let status = response.status();
                let response_code = status.as_u16() as i16;
                let body = truncate_utf8(
                    response.text().await.unwrap_or_default(),
                    MAX_RESPONSE_BODY_BYTES,
                );

                if status.is_success() {
                    self.complete_success(delivery, destination, response_code, body, duration_ms)
                        .await
                } else {
                    self.complete_failure(
                        delivery,
                        destination,
                        format!("HTTP {response_code}"),
                        Some(response_code),
                        Some(body),
                        duration_ms,
                    )
                    .await
                }
            }
            Err(e) => {
                let error_message = if e.is_timeout() {
                    format!("Request timeout ({DELIVERY_TIMEOUT_SECS}s)")
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                self.complete_failure(delivery, destination, error_message, None, None, duration_ms)
                    .await
            }
        }
    }

    /// Merge decrypted custom headers into the outgoing set. Problems here
    /// degrade to a delivery without the affected header, never a failed
    /// attempt.
    fn apply_custom_headers(
        &self,
        delivery: &WebhookDelivery,
        destination: &WebhookDestination,
        headers: &mut reqwest::header::HeaderMap,
    ) {
        let Some(ref blob) = destination.custom_headers_encrypted else {
            return;
        };

        let json = match crypto::decrypt(blob, &self.encryption_key) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    destination_id = %destination.id,
                    error = %e,
                    "Failed to decrypt custom headers, delivering without them"
                );
                return;
            }
        };

        let map: HashMap<String, String> = match serde_json::from_str(&json) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    destination_id = %destination.id,
                    error = %e,
                    "Stored custom headers are not a string map, delivering without them"
                );
                return;
            }
        };

        for (name, value) in &map {
            if validation::is_reserved_header(name) {
                tracing::warn!(
                    target: "webhook_delivery",
                    destination_id = %destination.id,
                    header = %name,
                    "Skipping custom header that shadows a reserved name"
                );
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(header_name), Ok(header_value)) => {
                    headers.insert(header_name, header_value);
                }
                _ => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        destination_id = %destination.id,
                        header = %name,
                        "Skipping custom header with invalid name or value"
                    );
                }
            }
        }
    }

    /// Record a 2xx outcome and reset the destination's failure streak.
    async fn complete_success(
        &self,
        delivery: &WebhookDelivery,
        destination: &WebhookDestination,
        response_code: i16,
        response_body: String,
        duration_ms: i64,
    ) -> Result<AttemptOutcome, WebhookError> {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            destination_id = %destination.id,
            tenant_id = %delivery.tenant_id,
            event_type = %delivery.event_type,
            response_code,
            duration_ms,
            attempt_number = delivery.attempt_number,
            "Webhook delivery succeeded"
        );

        let body = if response_body.is_empty() {
            None
        } else {
            Some(response_body.as_str())
        };
        WebhookDelivery::mark_success(&self.pool, delivery.id, response_code, body, duration_ms)
            .await?;
        WebhookDestination::record_success(&self.pool, delivery.tenant_id, destination.id).await?;
        self.cache.invalidate(delivery.tenant_id).await;

        Ok(AttemptOutcome::Succeeded)
    }

    /// Record a failed attempt, advance the destination's failure accounting,
    /// and auto-disable once the streak reaches the threshold.
    async fn complete_failure(
        &self,
        delivery: &WebhookDelivery,
        destination: &WebhookDestination,
        error_message: String,
        response_code: Option<i16>,
        response_body: Option<String>,
        duration_ms: i64,
    ) -> Result<AttemptOutcome, WebhookError> {
        let terminal =
            calculate_next_retry_at(delivery.attempt_number, delivery.max_attempts).is_none();

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            destination_id = %destination.id,
            tenant_id = %delivery.tenant_id,
            event_type = %delivery.event_type,
            error = %error_message,
            attempt_number = delivery.attempt_number,
            max_attempts = delivery.max_attempts,
            terminal,
            "Webhook delivery failed"
        );

        WebhookDelivery::mark_failed(
            &self.pool,
            delivery.id,
            response_code,
            response_body.as_deref(),
            &error_message,
            duration_ms,
            terminal,
        )
        .await?;

        // One statement increments both counters and returns the snapshot,
        // so concurrent failures are never lost.
        let accounting =
            WebhookDestination::record_failure(&self.pool, delivery.tenant_id, destination.id)
                .await?;

        if let Some(accounting) = accounting {
            if accounting.is_active
                && accounting.consecutive_failures >= accounting.max_consecutive_failures
            {
                // Guarded update: exactly one racing worker observes the flip.
                let disabled =
                    WebhookDestination::disable(&self.pool, delivery.tenant_id, destination.id)
                        .await?;
                if disabled {
                    tracing::warn!(
                        target: "webhook_delivery",
                        destination_id = %destination.id,
                        tenant_id = %delivery.tenant_id,
                        consecutive_failures = accounting.consecutive_failures,
                        threshold = accounting.max_consecutive_failures,
                        "Auto-disabling destination after consecutive failures"
                    );
                }
            }
        }

        self.cache.invalidate(delivery.tenant_id).await;

        Ok(AttemptOutcome::Failed { terminal })
    }
}

/// Calculate the due time for the retry that follows a failed attempt.
///
/// Returns `None` when the attempt budget is spent.
pub fn calculate_next_retry_at(
    attempt_number: i32,
    max_attempts: i32,
) -> Option<DateTime<Utc>> {
    if attempt_number >= max_attempts {
        return None;
    }

    let idx = (attempt_number - 1).max(0) as usize;
    let delay_secs = BACKOFF_SCHEDULE_SECS
        .get(idx)
        .copied()
        .unwrap_or(BACKOFF_SCHEDULE_SECS[BACKOFF_SCHEDULE_SECS.len() - 1]);

    Some(Utc::now() + Duration::seconds(delay_secs))
}

/// Truncate to at most `max_bytes`, backing up to a UTF-8 boundary.
fn truncate_utf8(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
