//! Sample entity model and DTOs.

use lims_core::kind::EntityKind;
use lims_core::status::ObjectStatus;
use lims_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::object::{BaseObject, ObjectHeader};

/// A row from the `samples` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sample {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub header: ObjectHeader,
    pub project_id: DbId,
    pub collected: Option<Timestamp>,
}

impl BaseObject for Sample {
    const KIND: EntityKind = EntityKind::Sample;

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn project_id(&self) -> Option<DbId> {
        Some(self.project_id)
    }
}

/// DTO for creating a new sample.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSample {
    pub project_id: DbId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Generated from owner, collection date and name when omitted.
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    pub geometry: Option<String>,
    pub collected: Option<Timestamp>,
    pub status: Option<ObjectStatus>,
}

impl CreateSample {
    pub fn new(project_id: DbId, name: &str) -> Self {
        Self {
            project_id,
            name: name.to_string(),
            slug: None,
            description: None,
            parent_id: None,
            geometry: None,
            collected: None,
            status: None,
        }
    }
}

/// DTO for updating an existing sample. The project cannot change.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSample {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    #[serde(default)]
    pub clear_parent: bool,
    pub geometry: Option<String>,
    pub collected: Option<Timestamp>,
    pub status: Option<ObjectStatus>,
}
