//! User entity model and DTOs.

use lims_core::permissions::Actor;
use lims_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub is_staff: bool,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl User {
    /// The actor on whose behalf this user's operations run.
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            username: self.username.clone(),
            is_staff: self.is_staff,
        }
    }
}

/// DTO for creating a new user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[serde(default)]
    pub is_staff: bool,
}
