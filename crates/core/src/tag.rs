//! Tag value helpers shared by the tag store and the query engine.

use crate::error::ValidationErrors;
use crate::term::TermRef;
use crate::types::DbId;

/// One key/value pair handed to the tag store.
#[derive(Debug, Clone, PartialEq)]
pub struct TagPair {
    pub key: TermRef,
    /// `None` or blank means "no value": skipped on add, deleted on update.
    pub value: Option<String>,
    pub comment: Option<String>,
}

impl TagPair {
    pub fn new(key: impl Into<TermRef>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            comment: None,
        }
    }

    /// A pair that clears `key` when passed to an update.
    pub fn clear(key: impl Into<TermRef>) -> Self {
        Self {
            key: key.into(),
            value: None,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// The value, or `None` when it is missing or blank.
    pub fn effective_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Build pairs from `(key, value)` tuples.
pub fn pairs<K, V, I>(items: I) -> Vec<TagPair>
where
    K: Into<TermRef>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    items.into_iter().map(|(k, v)| TagPair::new(k, v)).collect()
}

/// Cached numeric form of a tag value.
///
/// Finite floats parse as themselves; `true`/`false` (any case) become 1 and 0;
/// everything else is `None`.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return n.is_finite().then_some(n);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        Some(1.0)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(0.0)
    } else {
        None
    }
}

/// A tag's key must be global or belong to the tagged object's project.
pub fn check_key_project(
    errors: &mut ValidationErrors,
    object_project: Option<DbId>,
    key_project: Option<DbId>,
) {
    if let Some(key_project) = key_project {
        if Some(key_project) != object_project {
            errors.add("key", "Tag key must belong to the same project as the tagged object");
        }
    }
}
