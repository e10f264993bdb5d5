//! Database layer for data persistence and access.
//!
//! ```text
//! API handlers / services
//!        │
//!        ↓
//! db::handlers   (repositories: queries, parameter binding)
//!        │
//!        ↓
//! db::models     (request and row structs)
//!        │
//!        ↓
//! PostgreSQL     (schema owned by crate::migrations)
//! ```
//!
//! Queries are checked at runtime (`sqlx::query_as` with `FromRow`) so the crate builds without a
//! database. Errors are classified into [`errors::DbError`].

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::DatabaseConfig;

/// Open the connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// `SELECT 1` against the pool.
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await.is_ok()
}
