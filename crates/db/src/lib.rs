//! PostgreSQL persistence for the lab data catalog.

pub mod error;
pub mod models;
pub mod repositories;
pub mod sql;

use sqlx::postgres::PgPoolOptions;

pub use error::{StoreError, StoreResult};

pub type DbPool = sqlx::PgPool;

/// Default pool size when `DB_MAX_CONNECTIONS` is unset.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseConfigError {
    #[error("DATABASE_URL must be set")]
    MissingUrl,

    #[error("DB_MAX_CONNECTIONS must be a positive integer, got \"{0}\"")]
    InvalidMaxConnections(String),
}

impl DatabaseConfig {
    /// Load connection settings from environment variables.
    ///
    /// | Env Var              | Default  |
    /// |----------------------|----------|
    /// | `DATABASE_URL`       | required |
    /// | `DB_MAX_CONNECTIONS` | `20`     |
    pub fn from_env() -> Result<Self, DatabaseConfigError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| DatabaseConfigError::MissingUrl)?;
        let max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(DatabaseConfigError::InvalidMaxConnections(raw))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            url,
            max_connections,
        })
    }
}

/// Create a connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Round-trip a trivial query to verify the pool is usable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}

/// Apply every pending migration from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
