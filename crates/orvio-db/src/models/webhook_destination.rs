//! Webhook destination model.
//!
//! A destination is a tenant-registered HTTPS endpoint with an encrypted
//! signing secret, a set of subscribed event types, and delivery health
//! counters. Health counters are only ever mutated through the atomic
//! accounting functions below; concurrent deliveries to the same destination
//! must never lose increments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A tenant-registered webhook destination.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDestination {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    /// AES-256-GCM envelope, base64(nonce || ciphertext).
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
    /// Encrypted JSON object of extra request headers.
    pub custom_headers_encrypted: Option<String>,
    pub is_active: bool,
    pub failure_count: i64,
    pub consecutive_failures: i32,
    pub max_consecutive_failures: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_delivery_status: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a webhook destination.
#[derive(Debug, Clone)]
pub struct CreateWebhookDestination {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
    pub custom_headers_encrypted: Option<String>,
    pub max_consecutive_failures: i32,
    pub created_by: Option<Uuid>,
}

/// Input for a partial destination update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookDestination {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    /// `Some(None)` clears the stored header blob.
    pub custom_headers_encrypted: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub max_consecutive_failures: Option<i32>,
    /// Set by the service when the endpoint should be treated as fresh
    /// (URL changed, or the destination was explicitly re-enabled).
    pub reset_consecutive_failures: bool,
}

/// Post-increment counter snapshot returned by [`WebhookDestination::record_failure`].
#[derive(Debug, Clone, Copy, FromRow)]
pub struct FailureAccounting {
    pub consecutive_failures: i32,
    pub max_consecutive_failures: i32,
    pub is_active: bool,
}

impl WebhookDestination {
    /// Find a destination by id within a tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM webhook_destinations WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// All active destinations for a tenant, oldest first. Used to fill the
    /// active-destination cache.
    pub async fn find_active_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM webhook_destinations
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    /// List destinations for a tenant, newest first, optionally filtered by
    /// active state.
    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut sql = String::from("SELECT * FROM webhook_destinations WHERE tenant_id = $1");
        let mut param_idx = 2;

        if is_active.is_some() {
            sql.push_str(&format!(" AND is_active = ${param_idx}"));
            param_idx += 1;
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${param_idx} OFFSET ${}",
            param_idx + 1
        ));

        let mut query = sqlx::query_as::<_, Self>(&sql).bind(tenant_id);
        if let Some(active) = is_active {
            query = query.bind(active);
        }

        query.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Count a tenant's destinations, optionally filtered by active state.
    pub async fn count_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
        is_active: Option<bool>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = match is_active {
            Some(active) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM webhook_destinations WHERE tenant_id = $1 AND is_active = $2",
                )
                .bind(tenant_id)
                .bind(active)
                .fetch_one(pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM webhook_destinations WHERE tenant_id = $1")
                    .bind(tenant_id)
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count.0)
    }

    /// Create a new destination.
    pub async fn create(pool: &PgPool, input: CreateWebhookDestination) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO webhook_destinations (
                tenant_id, name, description, url, secret_encrypted,
                event_types, custom_headers_encrypted, max_consecutive_failures,
                created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.name)
        .bind(input.description)
        .bind(input.url)
        .bind(input.secret_encrypted)
        .bind(input.event_types)
        .bind(input.custom_headers_encrypted)
        .bind(input.max_consecutive_failures)
        .bind(input.created_by)
        .fetch_one(pool)
        .await
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// destination does not exist in this tenant.
    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookDestination,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut updates = Vec::new();
        let mut param_idx = 3; // $1 = id, $2 = tenant_id

        if input.name.is_some() {
            updates.push(format!("name = ${param_idx}"));
            param_idx += 1;
        }
        if input.description.is_some() {
            updates.push(format!("description = ${param_idx}"));
            param_idx += 1;
        }
        if input.url.is_some() {
            updates.push(format!("url = ${param_idx}"));
            param_idx += 1;
        }
        if input.event_types.is_some() {
            updates.push(format!("event_types = ${param_idx}"));
            param_idx += 1;
        }
        if input.custom_headers_encrypted.is_some() {
            updates.push(format!("custom_headers_encrypted = ${param_idx}"));
            param_idx += 1;
        }
        if input.is_active.is_some() {
            updates.push(format!("is_active = ${param_idx}"));
            param_idx += 1;
        }
        if input.max_consecutive_failures.is_some() {
            updates.push(format!("max_consecutive_failures = ${param_idx}"));
            let _ = param_idx;
        }
        if input.reset_consecutive_failures {
            updates.push("consecutive_failures = 0".to_string());
        }

        if updates.is_empty() {
            return Self::find_by_id(pool, tenant_id, id).await;
        }

        let sql = format!(
            "UPDATE webhook_destinations SET {}, updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 RETURNING *",
            updates.join(", ")
        );

        let mut query = sqlx::query_as::<_, Self>(&sql).bind(id).bind(tenant_id);

        if let Some(name) = input.name {
            query = query.bind(name);
        }
        if let Some(description) = input.description {
            query = query.bind(description);
        }
        if let Some(url) = input.url {
            query = query.bind(url);
        }
        if let Some(event_types) = input.event_types {
            query = query.bind(event_types);
        }
        if let Some(headers) = input.custom_headers_encrypted {
            query = query.bind(headers);
        }
        if let Some(is_active) = input.is_active {
            query = query.bind(is_active);
        }
        if let Some(max_failures) = input.max_consecutive_failures {
            query = query.bind(max_failures);
        }

        query.fetch_optional(pool).await
    }

    /// Replace the encrypted signing secret. Returns false if the destination
    /// does not exist in this tenant.
    pub async fn update_secret(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_destinations
            SET secret_encrypted = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(secret_encrypted)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a destination. Delivery records cascade at the schema level.
    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM webhook_destinations WHERE id = $1 AND tenant_id = $2")
                .bind(id)
                .bind(tenant_id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Success accounting: reset the consecutive-failure run and stamp the
    /// last delivery outcome.
    pub async fn record_success(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_destinations
            SET consecutive_failures = 0,
                last_triggered_at = NOW(),
                last_delivery_status = 'success',
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Failure accounting in a single atomic statement. Increments both
    /// counters at the store level so concurrent deliveries cannot lose
    /// updates, and returns the post-increment snapshot the caller uses for
    /// the auto-disable decision.
    pub async fn record_failure(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<FailureAccounting>, sqlx::Error> {
        sqlx::query_as::<_, FailureAccounting>(
            r#"
            UPDATE webhook_destinations
            SET failure_count = failure_count + 1,
                consecutive_failures = consecutive_failures + 1,
                last_triggered_at = NOW(),
                last_delivery_status = 'failed',
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING consecutive_failures, max_consecutive_failures, is_active
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Deactivate a destination if it is still active. Returns true only for
    /// the caller that actually performed the flip, so concurrent disables
    /// log once.
    pub async fn disable(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_destinations
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
