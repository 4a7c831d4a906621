//! Term entity model and DTOs.

use lims_core::kind::EntityKind;
use lims_core::plugins::PluginSpec;
use lims_core::status::ObjectStatus;
use lims_core::term::TermSpec;
use lims_core::types::DbId;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

use crate::models::object::{BaseObject, ObjectHeader};

/// A row from the `terms` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Term {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub header: ObjectHeader,
    /// `None` for global terms.
    pub project_id: Option<DbId>,
    pub taxonomy: String,
    pub measured: bool,
    pub validators: Json<Vec<PluginSpec>>,
    pub input_widget: Option<Json<PluginSpec>>,
    pub output_widget: Option<Json<PluginSpec>>,
}

impl Term {
    /// The stored plugin specs.
    pub fn spec(&self) -> TermSpec {
        TermSpec {
            validators: self.validators.0.clone(),
            input_widget: self.input_widget.as_ref().map(|w| w.0.clone()),
            output_widget: self.output_widget.as_ref().map(|w| w.0.clone()),
        }
    }
}

impl BaseObject for Term {
    const KIND: EntityKind = EntityKind::Term;

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn project_id(&self) -> Option<DbId> {
        self.project_id
    }

    fn term_taxonomy(&self) -> Option<&str> {
        Some(&self.taxonomy)
    }
}

/// DTO for creating a new term.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTerm {
    /// `None` creates a global term (staff only).
    pub project_id: Option<DbId>,
    #[validate(length(min = 1, max = 55))]
    pub taxonomy: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    pub geometry: Option<String>,
    #[serde(default)]
    pub measured: bool,
    #[serde(default)]
    pub spec: TermSpec,
    pub status: Option<ObjectStatus>,
}

impl CreateTerm {
    pub fn new(project_id: Option<DbId>, taxonomy: &str, name: &str) -> Self {
        Self {
            project_id,
            taxonomy: taxonomy.to_string(),
            name: name.to_string(),
            slug: None,
            description: None,
            parent_id: None,
            geometry: None,
            measured: false,
            spec: TermSpec::default(),
            status: None,
        }
    }
}

/// DTO for updating an existing term. Project and taxonomy cannot change.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTerm {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 55))]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<DbId>,
    #[serde(default)]
    pub clear_parent: bool,
    pub geometry: Option<String>,
    pub measured: Option<bool>,
    /// Replaces all plugin specs when present.
    pub spec: Option<TermSpec>,
    pub status: Option<ObjectStatus>,
}
