//! Project permission grant rows.

use lims_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `project_permissions` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProjectPermission {
    pub id: DbId,
    pub user_id: DbId,
    pub project_id: DbId,
    /// Base entity kind name, e.g. `Sample`.
    pub model: String,
    pub action: String,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}
