//! Domain error taxonomy shared by every layer.

use std::fmt;

use serde::Serialize;

use crate::kind::EntityKind;
use crate::permissions::Action;
use crate::plugins::PluginNamespace;
use crate::types::DbId;

/// Maximum number of blocking referents listed in a [`ProtectedReferents`].
pub const MAX_LISTED_REFERENTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Cannot create a unique identifier for \"{base}\" after {attempts} attempts")]
    SlugExhausted { base: String, attempts: usize },

    #[error("Unknown {namespace}: \"{name}\"")]
    UnknownPlugin {
        namespace: PluginNamespace,
        name: String,
    },

    #[error("{0}")]
    ReferentialIntegrity(ProtectedReferents),

    #[error("User {user_id} is not allowed to {action} {target}")]
    ObjectPermission {
        target: EntityRef,
        action: Action,
        user_id: DbId,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for CoreError {
    fn from(errors: ValidationErrors) -> Self {
        CoreError::Validation(errors)
    }
}

impl CoreError {
    /// Shorthand for a validation error on a single field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        CoreError::Validation(errors)
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A single field-scoped violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every violation found while validating one operation, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Messages recorded against `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// `Ok(())` when nothing was recorded, otherwise a [`CoreError::Validation`].
    pub fn into_result(self) -> Result<(), CoreError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

/// A lightweight pointer to a stored entity, used in error payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Option<DbId>,
    pub label: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: Option<DbId>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            label: label.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} \"{}\" (#{id})", self.kind, self.label),
            None => write!(f, "{} \"{}\"", self.kind, self.label),
        }
    }
}

/// Entities blocking a delete. At most [`MAX_LISTED_REFERENTS`] are listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedReferents {
    pub target: EntityRef,
    pub referents: Vec<EntityRef>,
    pub overflow: usize,
}

impl ProtectedReferents {
    /// Build from the full set of blocking referents, capping the listed ones.
    pub fn new(target: EntityRef, mut all: Vec<EntityRef>) -> Self {
        let overflow = all.len().saturating_sub(MAX_LISTED_REFERENTS);
        all.truncate(MAX_LISTED_REFERENTS);
        Self {
            target,
            referents: all,
            overflow,
        }
    }

    /// Build from a capped list plus the total count reported by the store.
    pub fn with_total(target: EntityRef, listed: Vec<EntityRef>, total: usize) -> Self {
        let mut protected = Self::new(target, listed);
        protected.overflow = total.saturating_sub(protected.referents.len());
        protected
    }

    pub fn total(&self) -> usize {
        self.referents.len() + self.overflow
    }
}

impl fmt::Display for ProtectedReferents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.referents.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} could not be deleted due to relationships with other objects: {}",
            self.target,
            items.join(", ")
        )?;
        if self.overflow > 0 {
            write!(f, "...plus {} more objects", self.overflow)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ref(id: DbId) -> EntityRef {
        EntityRef::new(EntityKind::Sample, Some(id), format!("s{id}"))
    }

    #[test]
    fn validation_errors_accumulate_in_order() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "too long");
        errors.add("parent", "wrong project");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.to_string(), "name: too long; parent: wrong project");
        assert_eq!(errors.for_field("parent").collect::<Vec<_>>(), vec!["wrong project"]);
    }

    #[test]
    fn empty_validation_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn protected_referents_cap_at_ten() {
        let all: Vec<EntityRef> = (1..=13).map(sample_ref).collect();
        let target = EntityRef::new(EntityKind::Project, Some(1), "p");
        let protected = ProtectedReferents::new(target, all);
        assert_eq!(protected.referents.len(), 10);
        assert_eq!(protected.overflow, 3);
        assert_eq!(protected.total(), 13);
        assert!(protected.to_string().ends_with("...plus 3 more objects"));
    }

    #[test]
    fn protected_referents_with_total() {
        let target = EntityRef::new(EntityKind::Project, Some(1), "p");
        let protected = ProtectedReferents::with_total(target, vec![sample_ref(1)], 25);
        assert_eq!(protected.overflow, 24);
    }
}
