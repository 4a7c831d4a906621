//! Repository for the `users` table.

use lims_core::error::CoreError;
use lims_core::types::DbId;
use sqlx::PgPool;
use validator::Validate;

use crate::error::{self, StoreResult, UNIQUE_VIOLATION};
use crate::models::user::{CreateUser, User};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, username, is_staff, created_at, modified_at";

/// Provides CRUD operations for users.
pub struct UserRepo;

impl UserRepo {
    /// Insert a new user. A taken username is a [`CoreError::Conflict`].
    pub async fn create(pool: &PgPool, input: &CreateUser) -> StoreResult<User> {
        input
            .validate()
            .map_err(|e| CoreError::Validation(error::from_validator(&e)))?;
        let username = input.username.trim();
        if username.is_empty() {
            return Err(CoreError::field("username", "Username cannot be blank").into());
        }

        let query = format!(
            "INSERT INTO users (username, is_staff) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .bind(input.is_staff)
            .fetch_one(pool)
            .await
            .map_err(|err| match err.as_database_error().and_then(|e| e.code()) {
                Some(code) if code == UNIQUE_VIOLATION => {
                    CoreError::Conflict(format!("Username \"{username}\" is already taken")).into()
                }
                _ => crate::StoreError::from(err),
            })?;

        tracing::info!(user_id = user.id, username = %user.username, is_staff = user.is_staff, "Created user");
        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    /// List all users ordered by username.
    pub async fn list(pool: &PgPool) -> Result<Vec<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users ORDER BY username");
        sqlx::query_as::<_, User>(&query).fetch_all(pool).await
    }
}
