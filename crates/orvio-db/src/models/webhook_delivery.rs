//! Delivery record model.
//!
//! One row per event per destination. The row doubles as the durable
//! delivery job: `next_retry_at` is both the due time and the claim lease.
//! Workers claim due rows with `FOR UPDATE SKIP LOCKED` and push the lease
//! forward, so a crashed worker's claims come due again on their own and
//! re-delivery of the same job stays safe (processing re-checks row state).
//!
//! Status values: `pending`, `success`, `failed`, `retrying`. `success` is
//! terminal; `failed` is terminal once `attempt_number >= max_attempts`
//! (stamped via `completed_at`), and otherwise transitions to `retrying`
//! through the guarded scheduling updates below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A single delivery of one event to one destination.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub destination_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_number: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_code: Option<i16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating a delivery record.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub tenant_id: Uuid,
    pub destination_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// 4 for dispatched events, 1 for on-demand test sends.
    pub max_attempts: i32,
}

impl WebhookDelivery {
    /// Insert a new record at attempt 1, due immediately.
    pub async fn create(pool: &PgPool, input: CreateWebhookDelivery) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO webhook_deliveries (
                tenant_id, destination_id, event_type, payload,
                status, attempt_number, max_attempts, next_retry_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 1, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.destination_id)
        .bind(input.event_type)
        .bind(input.payload)
        .bind(input.max_attempts)
        .fetch_one(pool)
        .await
    }

    /// Insert a record at attempt 1 that the claim loop will not pick up
    /// (`next_retry_at` NULL). Used for synchronous test sends, which are
    /// executed inline rather than through the queue.
    pub async fn create_unqueued(
        pool: &PgPool,
        input: CreateWebhookDelivery,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO webhook_deliveries (
                tenant_id, destination_id, event_type, payload,
                status, attempt_number, max_attempts, next_retry_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 1, $5, NULL)
            RETURNING *
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.destination_id)
        .bind(input.event_type)
        .bind(input.payload)
        .bind(input.max_attempts)
        .fetch_one(pool)
        .await
    }

    /// Find a delivery by id within a tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM webhook_deliveries WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Find a delivery scoped to a specific destination.
    pub async fn find_for_destination(
        pool: &PgPool,
        tenant_id: Uuid,
        destination_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE id = $1 AND tenant_id = $2 AND destination_id = $3
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(destination_id)
        .fetch_optional(pool)
        .await
    }

    /// Delivery history for a destination, newest first, optionally filtered
    /// by status.
    pub async fn list_by_destination(
        pool: &PgPool,
        tenant_id: Uuid,
        destination_id: Uuid,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut sql = String::from(
            "SELECT * FROM webhook_deliveries WHERE tenant_id = $1 AND destination_id = $2",
        );
        let mut param_idx = 3;

        if status.is_some() {
            sql.push_str(&format!(" AND status = ${param_idx}"));
            param_idx += 1;
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${param_idx} OFFSET ${}",
            param_idx + 1
        ));

        let mut query = sqlx::query_as::<_, Self>(&sql).bind(tenant_id).bind(destination_id);
        if let Some(status) = status {
            query = query.bind(status);
        }

        query.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Count deliveries for a destination, optionally filtered by status.
    pub async fn count_by_destination(
        pool: &PgPool,
        tenant_id: Uuid,
        destination_id: Uuid,
        status: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = match status {
            Some(status) => {
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*) FROM webhook_deliveries
                    WHERE tenant_id = $1 AND destination_id = $2 AND status = $3
                    "#,
                )
                .bind(tenant_id)
                .bind(destination_id)
                .bind(status)
                .fetch_one(pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*) FROM webhook_deliveries
                    WHERE tenant_id = $1 AND destination_id = $2
                    "#,
                )
                .bind(tenant_id)
                .bind(destination_id)
                .fetch_one(pool)
                .await?
            }
        };
        Ok(count.0)
    }

    /// Claim a batch of due deliveries, pushing each lease forward so other
    /// workers skip them. Rows claimed here are executed by exactly one
    /// worker; if that worker dies, the lease expiry makes the row due again.
    pub async fn claim_due(
        pool: &PgPool,
        batch_size: i64,
        lease_secs: f64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE webhook_deliveries
            SET next_retry_at = NOW() + make_interval(secs => $2), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status IN ('pending', 'retrying') AND next_retry_at <= NOW()
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(batch_size)
        .bind(lease_secs)
        .fetch_all(pool)
        .await
    }

    /// Claim a single delivery by id (queue nudge path). Returns `None` when
    /// the row is not due, already leased out, or no longer pending/retrying.
    pub async fn claim_one(
        pool: &PgPool,
        id: Uuid,
        lease_secs: f64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE webhook_deliveries
            SET next_retry_at = NOW() + make_interval(secs => $2), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE id = $1 AND status IN ('pending', 'retrying') AND next_retry_at <= NOW()
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(lease_secs)
        .fetch_optional(pool)
        .await
    }

    /// Record a successful attempt. Terminal.
    pub async fn mark_success(
        pool: &PgPool,
        id: Uuid,
        response_code: i16,
        response_body: Option<&str>,
        duration_ms: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'success',
                response_code = $2,
                response_body = $3,
                error_message = NULL,
                duration_ms = $4,
                next_retry_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_body)
        .bind(duration_ms)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt. `terminal` stamps `completed_at`; otherwise
    /// the retry scheduler decides what happens next.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        response_code: Option<i16>,
        response_body: Option<&str>,
        error_message: &str,
        duration_ms: i64,
        terminal: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed',
                response_code = $2,
                response_body = $3,
                error_message = $4,
                duration_ms = $5,
                next_retry_at = NULL,
                completed_at = CASE WHEN $6 THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_body)
        .bind(error_message)
        .bind(duration_ms)
        .bind(terminal)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a freshly failed record to `retrying` with a scheduled due time.
    /// Guarded on `status = 'failed'` so a concurrent manual retry and the
    /// scheduler cannot both win.
    pub async fn schedule_retry(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'retrying',
                attempt_number = attempt_number + 1,
                next_retry_at = $3,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(next_retry_at)
        .fetch_optional(pool)
        .await
    }

    /// Operator-triggered retry of a terminally failed record: back to
    /// `retrying`, attempt bumped, due immediately, terminal stamp cleared.
    pub async fn reset_for_manual_retry(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'retrying',
                attempt_number = attempt_number + 1,
                next_retry_at = NOW(),
                completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Terminal failure for jobs whose destination is gone or inactive.
    /// Only applies to rows still in flight.
    pub async fn finalize_destination_gone(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed',
                error_message = 'destination disabled or deleted',
                next_retry_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
