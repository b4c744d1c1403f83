//! Webhook destination registry service.
//!
//! Business logic for registering, listing, updating, and deleting webhook
//! destinations: URL validation with SSRF protection, event type validation
//! against the catalog, custom header validation, secret generation and
//! encryption, per-tenant limits, and cache invalidation on every write.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use orvio_db::models::{CreateWebhookDestination, UpdateWebhookDestination, WebhookDestination};

use crate::cache::DestinationCache;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookDestinationRequest, CreateWebhookDestinationResponse, ListDestinationsQuery,
    RotateSecretResponse, UpdateWebhookDestinationRequest, WebhookDestinationListResponse,
    WebhookDestinationResponse,
};
use crate::validation;

/// Default maximum destinations per tenant.
pub const DEFAULT_MAX_DESTINATIONS: i64 = 25;

/// Service for webhook destination registry operations.
#[derive(Clone)]
pub struct DestinationService {
    pool: PgPool,
    cache: DestinationCache,
    encryption_key: Vec<u8>,
    max_destinations: i64,
    allow_insecure_urls: bool,
}

impl DestinationService {
    /// Create a new destination service.
    #[must_use]
    pub fn new(pool: PgPool, cache: DestinationCache, encryption_key: Vec<u8>) -> Self {
        Self {
            pool,
            cache,
            encryption_key,
            max_destinations: DEFAULT_MAX_DESTINATIONS,
            allow_insecure_urls: false,
        }
    }

    /// Set the maximum destinations per tenant.
    #[must_use]
    pub fn with_max_destinations(mut self, max: i64) -> Self {
        self.max_destinations = max;
        self
    }

    /// Allow plain-HTTP and internal-host URLs (for development/testing).
    #[must_use]
    pub fn with_allow_insecure_urls(mut self, allow: bool) -> Self {
        self.allow_insecure_urls = allow;
        self
    }

    /// Register a new destination. The returned signing secret is shown to
    /// the caller exactly once; only its ciphertext is stored.
    pub async fn create_destination(
        &self,
        tenant_id: Uuid,
        created_by: Option<Uuid>,
        request: CreateWebhookDestinationRequest,
    ) -> Result<CreateWebhookDestinationResponse, WebhookError> {
        validation::validate_destination_url(&request.url, self.allow_insecure_urls)?;
        let event_types = validation::validate_event_types(&request.event_types)?;

        let custom_headers_encrypted = match request.custom_headers.as_ref() {
            Some(headers) if !headers.is_empty() => Some(self.encrypt_header_map(headers)?),
            _ => None,
        };

        let count = WebhookDestination::count_by_tenant(&self.pool, tenant_id, None).await?;
        if count >= self.max_destinations {
            return Err(WebhookError::DestinationLimitExceeded {
                limit: self.max_destinations,
            });
        }

        let secret = crypto::generate_signing_secret();
        let secret_encrypted = crypto::encrypt(&secret, &self.encryption_key)?;

        let input = CreateWebhookDestination {
            tenant_id,
            name: request.name,
            description: request.description,
            url: request.url,
            secret_encrypted,
            event_types,
            custom_headers_encrypted,
            max_consecutive_failures: request.max_consecutive_failures,
            created_by,
        };

        let destination = WebhookDestination::create(&self.pool, input).await?;
        self.cache.invalidate(tenant_id).await;

        Ok(CreateWebhookDestinationResponse {
            destination: destination.into(),
            secret,
        })
    }

    /// List destinations for a tenant with pagination.
    pub async fn list_destinations(
        &self,
        tenant_id: Uuid,
        query: ListDestinationsQuery,
    ) -> Result<WebhookDestinationListResponse, WebhookError> {
        let limit = query.limit.clamp(1, 100);
        let offset = query.offset.max(0);

        let destinations =
            WebhookDestination::list_by_tenant(&self.pool, tenant_id, query.is_active, limit, offset)
                .await?;
        let total =
            WebhookDestination::count_by_tenant(&self.pool, tenant_id, query.is_active).await?;

        Ok(WebhookDestinationListResponse {
            destinations: destinations.into_iter().map(Into::into).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Get a single destination.
    pub async fn get_destination(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<WebhookDestinationResponse, WebhookError> {
        let destination = WebhookDestination::find_by_id(&self.pool, tenant_id, id)
            .await?
            .ok_or(WebhookError::DestinationNotFound)?;

        Ok(destination.into())
    }

    /// Partially update a destination. A changed URL and an explicit
    /// re-enable both reset the consecutive failure counter.
    pub async fn update_destination(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        request: UpdateWebhookDestinationRequest,
    ) -> Result<WebhookDestinationResponse, WebhookError> {
        if let Some(ref url) = request.url {
            validation::validate_destination_url(url, self.allow_insecure_urls)?;
        }

        let event_types = match request.event_types {
            Some(ref event_types) => Some(validation::validate_event_types(event_types)?),
            None => None,
        };

        // An empty header object clears the stored headers.
        let custom_headers_encrypted = match request.custom_headers.as_ref() {
            None => None,
            Some(headers) if headers.is_empty() => Some(None),
            Some(headers) => Some(Some(self.encrypt_header_map(headers)?)),
        };

        let reset_consecutive_failures =
            request.url.is_some() || request.is_active == Some(true);

        let input = UpdateWebhookDestination {
            name: request.name,
            description: request.description,
            url: request.url,
            event_types,
            custom_headers_encrypted,
            is_active: request.is_active,
            max_consecutive_failures: request.max_consecutive_failures,
            reset_consecutive_failures,
        };

        let destination = WebhookDestination::update(&self.pool, tenant_id, id, input)
            .await?
            .ok_or(WebhookError::DestinationNotFound)?;

        self.cache.invalidate(tenant_id).await;
        Ok(destination.into())
    }

    /// Delete a destination. Its delivery history cascades away with it.
    pub async fn delete_destination(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        let deleted = WebhookDestination::delete(&self.pool, tenant_id, id).await?;
        if !deleted {
            return Err(WebhookError::DestinationNotFound);
        }

        self.cache.invalidate(tenant_id).await;
        Ok(())
    }

    /// Replace the signing secret. The previous secret stops working the
    /// moment this returns; the new one is shown exactly once.
    pub async fn rotate_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<RotateSecretResponse, WebhookError> {
        let secret = crypto::generate_signing_secret();
        let secret_encrypted = crypto::encrypt(&secret, &self.encryption_key)?;

        let updated =
            WebhookDestination::update_secret(&self.pool, tenant_id, id, &secret_encrypted).await?;
        if !updated {
            return Err(WebhookError::DestinationNotFound);
        }

        self.cache.invalidate(tenant_id).await;
        Ok(RotateSecretResponse { id, secret })
    }

    /// Validate and encrypt a custom header map for storage.
    fn encrypt_header_map(&self, headers: &HashMap<String, String>) -> Result<String, WebhookError> {
        validation::validate_custom_headers(headers)?;
        let json = serde_json::to_string(headers)
            .map_err(|e| WebhookError::Internal(format!("serialize custom headers: {e}")))?;
        crypto::encrypt(&json, &self.encryption_key)
    }
}
