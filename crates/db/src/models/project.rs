//! Project entity model and DTOs.

use lims_core::kind::EntityKind;
use lims_core::status::ObjectStatus;
use lims_core::types::DbId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::object::{BaseObject, ObjectHeader};

/// A row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub header: ObjectHeader,
}

impl BaseObject for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn project_id(&self) -> Option<DbId> {
        Some(self.header.id)
    }
}

/// DTO for creating a new project.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateProject {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Generated from the name when omitted.
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    pub geometry: Option<String>,
    /// Defaults to draft.
    pub status: Option<ObjectStatus>,
}

/// DTO for updating an existing project. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProject {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    /// Detach from the current parent; wins over `parent_id`.
    #[serde(default)]
    pub clear_parent: bool,
    pub geometry: Option<String>,
    pub status: Option<ObjectStatus>,
}
