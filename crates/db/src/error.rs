//! Store-level error type and database error classification.

use lims_core::error::{CoreError, EntityRef, ProtectedReferents, ValidationErrors};

/// SQLSTATE for unique constraint violations.
pub const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE for foreign key violations.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// SQLSTATE for a pattern Postgres cannot compile.
pub const INVALID_REGULAR_EXPRESSION: &str = "2201B";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<ValidationErrors> for StoreError {
    fn from(errors: ValidationErrors) -> Self {
        StoreError::Core(CoreError::Validation(errors))
    }
}

impl StoreError {
    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            StoreError::Core(err) => Some(err),
            StoreError::Database(_) => None,
        }
    }
}

/// Whether `err` is a unique violation on a slug constraint (`uq_*slug*`).
pub fn is_slug_conflict(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
        && db_err
            .constraint()
            .is_some_and(|c| c.starts_with("uq_") && c.contains("slug"))
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
}

pub fn is_invalid_regex(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == INVALID_REGULAR_EXPRESSION)
}

/// Map a failed delete of `target`: foreign key violations become
/// [`CoreError::ReferentialIntegrity`] instead of a raw database error.
pub(crate) fn on_delete(err: sqlx::Error, target: &EntityRef) -> StoreError {
    if is_foreign_key_violation(&err) {
        tracing::debug!(kind = %target.kind, id = ?target.id, error = %err, "Delete blocked by foreign key");
        StoreError::Core(CoreError::ReferentialIntegrity(ProtectedReferents::new(
            target.clone(),
            Vec::new(),
        )))
    } else {
        StoreError::Database(err)
    }
}

/// Convert `validator` derive output into the domain error shape.
///
/// Fields are reported in name order so messages are stable.
pub fn from_validator(errors: &validator::ValidationErrors) -> ValidationErrors {
    let mut out = ValidationErrors::new();
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.keys().collect();
    fields.sort();
    for field in fields {
        for err in field_errors[field].iter() {
            let message = match &err.message {
                Some(m) => m.to_string(),
                None => match err.code.as_ref() {
                    "length" => length_message(err),
                    code => format!("Invalid value ({code})"),
                },
            };
            out.add(field.to_string(), message);
        }
    }
    out
}

fn length_message(err: &validator::ValidationError) -> String {
    let min = err.params.get("min").and_then(|v| v.as_u64());
    let max = err.params.get("max").and_then(|v| v.as_u64());
    match (min, max) {
        (Some(min), Some(max)) => format!("Length must be between {min} and {max}"),
        (Some(min), None) => format!("Length must be at least {min}"),
        (None, Some(max)) => format!("Length must be at most {max}"),
        (None, None) => "Invalid length".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    #[derive(Validate)]
    struct Input {
        #[validate(length(min = 1, max = 3))]
        name: String,
        #[validate(length(max = 2))]
        slug: Option<String>,
    }

    #[test]
    fn validator_errors_convert_in_field_order() {
        let input = Input {
            name: "toolong".into(),
            slug: Some("abc".into()),
        };
        let errors = from_validator(&input.validate().unwrap_err());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.errors[0].field, "name");
        assert_eq!(errors.errors[0].message, "Length must be between 1 and 3");
        assert_eq!(errors.errors[1].field, "slug");
        assert_eq!(errors.errors[1].message, "Length must be at most 2");
    }

    #[test]
    fn non_database_errors_are_not_conflicts() {
        assert!(!is_slug_conflict(&sqlx::Error::RowNotFound));
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
        assert!(!is_invalid_regex(&sqlx::Error::RowNotFound));
    }
}
