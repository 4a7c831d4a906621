//! Rows returned by DataView queries.

use lims_core::types::DbId;
use serde::Serialize;
use sqlx::FromRow;

/// One listed record: the full row plus the view's field values by slug.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ViewRow {
    pub id: DbId,
    pub record: serde_json::Value,
    pub fields: serde_json::Value,
}

impl ViewRow {
    /// The value of field `slug` as text, if present and not null.
    pub fn field_text(&self, slug: &str) -> Option<String> {
        match self.fields.get(slug)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
