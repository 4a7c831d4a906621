//! Tag row models. One table per tag kind, all with the same shape.

use lims_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Columns of [`Tag`], in struct order.
pub const TAG_COLUMNS: &str =
    "id, object_id, key_id, value, comment, numeric_value, user_id, created_at, modified_at";

/// A row from any tag table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Tag {
    pub id: DbId,
    pub object_id: DbId,
    pub key_id: DbId,
    pub value: String,
    pub comment: Option<String>,
    /// Cached numeric form of `value`; recomputed on every save.
    pub numeric_value: Option<f64>,
    pub user_id: Option<DbId>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

/// A tag joined with the identity of its key.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TagWithKey {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub tag: Tag,
    pub key_slug: String,
    pub key_name: String,
    pub key_taxonomy: String,
}
