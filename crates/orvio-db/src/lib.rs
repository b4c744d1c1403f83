//! Database layer for the Orvio webhook delivery service.
//!
//! Owns the connection pool, embedded migrations, and the row models for
//! webhook destinations and delivery records. All queries are tenant-scoped;
//! callers pass the tenant id explicitly.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
