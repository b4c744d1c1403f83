//! Application configuration loaded from environment variables.
//!
//! Fail-fast loading with validation: required variables must be present
//! and valid or the application exits with a clear error message.

use std::env;

use thiserror::Error;

/// Default WEBHOOK_ENCRYPTION_KEY: 64 hex '4' characters. Development only.
pub const INSECURE_WEBHOOK_KEY: &str =
    "4444444444444444444444444444444444444444444444444444444444444444";

/// Default per-tenant destination quota.
const DEFAULT_MAX_DESTINATIONS: i64 = 25;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,

    /// Bind address (default "0.0.0.0").
    pub host: String,

    /// Listen port (default 8080).
    pub port: u16,

    /// Log filter directive (default "info").
    pub rust_log: String,

    /// AES-256-GCM key for signing secrets and custom header blobs.
    pub webhook_encryption_key: [u8; 32],

    /// Per-tenant destination quota.
    pub max_destinations: i64,

    /// Concurrent delivery attempts in the worker.
    pub worker_concurrency: usize,

    /// Worker poll interval in milliseconds.
    pub worker_poll_ms: u64,

    /// Allow plain-http and private-network destination URLs. Local
    /// development only.
    pub allow_insecure_urls: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("rust_log", &self.rust_log)
            .field("webhook_encryption_key", &"<redacted>")
            .field("max_destinations", &self.max_destinations)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("worker_poll_ms", &self.worker_poll_ms)
            .field("allow_insecure_urls", &self.allow_insecure_urls)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Required Variables
    ///
    /// - `DATABASE_URL` - Postgres connection string
    ///
    /// # Optional Variables
    ///
    /// - `HOST` - Bind address (default: "0.0.0.0")
    /// - `PORT` - Listen port (default: 8080)
    /// - `RUST_LOG` - Log level filter (default: "info")
    /// - `WEBHOOK_ENCRYPTION_KEY` - Hex-encoded 32-byte key (development default)
    /// - `WEBHOOK_MAX_DESTINATIONS` - Per-tenant quota (default: 25)
    /// - `WEBHOOK_WORKER_CONCURRENCY` - Concurrent attempts (default: 8)
    /// - `WEBHOOK_WORKER_POLL_MS` - Poll interval (default: 1000)
    /// - `WEBHOOK_ALLOW_INSECURE_URLS` - Allow http/private URLs (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development only)
        let _ = dotenvy::dotenv();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let webhook_encryption_key = parse_hex_encryption_key(
            "WEBHOOK_ENCRYPTION_KEY",
            &env::var("WEBHOOK_ENCRYPTION_KEY")
                .unwrap_or_else(|_| INSECURE_WEBHOOK_KEY.to_string()),
        )?;

        let max_destinations = match env::var("WEBHOOK_MAX_DESTINATIONS") {
            Ok(s) => {
                let n: i64 = s.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "WEBHOOK_MAX_DESTINATIONS".to_string(),
                    message: "Must be a positive integer".to_string(),
                })?;
                if n < 1 {
                    return Err(ConfigError::InvalidValue {
                        var: "WEBHOOK_MAX_DESTINATIONS".to_string(),
                        message: "Must be at least 1".to_string(),
                    });
                }
                n
            }
            Err(_) => DEFAULT_MAX_DESTINATIONS,
        };

        let worker_concurrency = match env::var("WEBHOOK_WORKER_CONCURRENCY") {
            Ok(s) => {
                let n: usize = s.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "WEBHOOK_WORKER_CONCURRENCY".to_string(),
                    message: "Must be a positive integer".to_string(),
                })?;
                if n < 1 {
                    return Err(ConfigError::InvalidValue {
                        var: "WEBHOOK_WORKER_CONCURRENCY".to_string(),
                        message: "Must be at least 1".to_string(),
                    });
                }
                n
            }
            Err(_) => 8,
        };

        let worker_poll_ms = match env::var("WEBHOOK_WORKER_POLL_MS") {
            Ok(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                var: "WEBHOOK_WORKER_POLL_MS".to_string(),
                message: "Must be a positive integer".to_string(),
            })?,
            Err(_) => 1000,
        };

        let allow_insecure_urls = env::var("WEBHOOK_ALLOW_INSECURE_URLS")
            .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            host,
            port,
            rust_log,
            webhook_encryption_key,
            max_destinations,
            worker_concurrency,
            worker_poll_ms,
            allow_insecure_urls,
        })
    }

    /// Address string for the TCP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Warnings for insecure defaults still in effect. Logged at startup so
    /// a development key never reaches production silently.
    #[must_use]
    pub fn insecure_default_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.webhook_encryption_key == [0x44u8; 32] {
            warnings.push(
                "WEBHOOK_ENCRYPTION_KEY is using the default insecure value; set a real key before storing secrets"
                    .to_string(),
            );
        }

        if self.allow_insecure_urls {
            warnings.push(
                "WEBHOOK_ALLOW_INSECURE_URLS is enabled; http and private-network destinations will be accepted"
                    .to_string(),
            );
        }

        warnings
    }
}

/// Parse hex-encoded 32-byte encryption key
fn parse_hex_encryption_key(var_name: &str, hex_str: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_str).map_err(|_| ConfigError::InvalidValue {
        var: var_name.to_string(),
        message: "Must be 64 hex characters (32 bytes)".to_string(),
    })?;

    if bytes.len() != 32 {
        return Err(ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: format!("Expected 32 bytes, got {}", bytes.len()),
        });
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
