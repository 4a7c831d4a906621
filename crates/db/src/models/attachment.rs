//! Attachment entity model, link rows and DTOs.

use lims_core::kind::EntityKind;
use lims_core::status::ObjectStatus;
use lims_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::object::{BaseObject, ObjectHeader};

/// Kinds an attachment may be linked to.
pub const LINKABLE_KINDS: [EntityKind; 3] =
    [EntityKind::Sample, EntityKind::Term, EntityKind::SampleTag];

// ---------------------------------------------------------------------------
// Entity structs (database rows)
// ---------------------------------------------------------------------------

/// A row from the `attachments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attachment {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub header: ObjectHeader,
    pub project_id: DbId,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
}

impl BaseObject for Attachment {
    const KIND: EntityKind = EntityKind::Attachment;

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn project_id(&self) -> Option<DbId> {
        Some(self.project_id)
    }
}

/// A row from the `attachment_links` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttachmentLink {
    pub id: DbId,
    pub attachment_id: DbId,
    pub entity_kind: String,
    pub entity_id: DbId,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

// ---------------------------------------------------------------------------
// DTOs (request payloads)
// ---------------------------------------------------------------------------

/// DTO for creating a new attachment.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAttachment {
    pub project_id: DbId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    pub geometry: Option<String>,
    #[validate(length(max = 1024))]
    pub file_path: Option<String>,
    #[validate(length(max = 128))]
    pub file_hash: Option<String>,
    pub status: Option<ObjectStatus>,
}

impl CreateAttachment {
    pub fn new(project_id: DbId, name: &str) -> Self {
        Self {
            project_id,
            name: name.to_string(),
            slug: None,
            description: None,
            parent_id: None,
            geometry: None,
            file_path: None,
            file_hash: None,
            status: None,
        }
    }
}

/// DTO for updating an existing attachment. The project cannot change.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAttachment {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    #[serde(default)]
    pub clear_parent: bool,
    pub geometry: Option<String>,
    #[validate(length(max = 1024))]
    pub file_path: Option<String>,
    #[validate(length(max = 128))]
    pub file_hash: Option<String>,
    pub status: Option<ObjectStatus>,
}
