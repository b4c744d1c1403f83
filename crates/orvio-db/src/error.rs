//! Error types for database operations.

use thiserror::Error;

/// Errors that can occur in the database layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// Returns true if this error represents a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
            || matches!(self, DbError::QueryFailed(sqlx::Error::RowNotFound))
    }

    /// Returns true if this error came from establishing the connection.
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }
}
