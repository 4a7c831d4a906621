//! Ready-made list views, one per collection.

use super::{DataView, FieldSpec};
use crate::error::CoreError;
use crate::kind::EntityKind;

fn id() -> FieldSpec {
    FieldSpec::new("slug").label("ID")
}

fn user() -> FieldSpec {
    FieldSpec::new("user").label("User")
}

fn modified() -> FieldSpec {
    FieldSpec::new("modified").label("Modified")
}

pub fn samples(name: &str) -> Result<DataView, CoreError> {
    DataView::new(
        name,
        EntityKind::Sample,
        vec![
            id(),
            user(),
            FieldSpec::new("collected").label("Collected"),
            FieldSpec::new("name").label("Name"),
            FieldSpec::new("status").label("Status"),
            modified(),
        ],
    )
}

pub fn terms(name: &str) -> Result<DataView, CoreError> {
    DataView::new(
        name,
        EntityKind::Term,
        vec![
            id(),
            user(),
            FieldSpec::new("name").label("Name"),
            FieldSpec::new("taxonomy").label("Taxonomy"),
            FieldSpec::new("status").label("Status"),
            modified(),
        ],
    )
}

pub fn attachments(name: &str) -> Result<DataView, CoreError> {
    DataView::new(
        name,
        EntityKind::Attachment,
        vec![id(), user(), FieldSpec::new("name").label("Name"), modified()],
    )
}

pub fn projects(name: &str) -> Result<DataView, CoreError> {
    DataView::new(
        name,
        EntityKind::Project,
        vec![id(), user(), FieldSpec::new("name").label("Name"), modified()],
    )
}

/// Tags of any tag kind: object, key, value, user, modified.
pub fn tags(name: &str, kind: EntityKind) -> Result<DataView, CoreError> {
    if !kind.is_tag() {
        return Err(CoreError::field(
            "kind",
            format!("{kind} is not a tag kind"),
        ));
    }
    DataView::new(
        name,
        kind,
        vec![
            FieldSpec::new("object").label("Object"),
            FieldSpec::new("key").label("Term"),
            FieldSpec::new("value").label("Value"),
            user(),
            modified(),
        ],
    )
}

/// The preset for `kind`.
pub fn for_kind(name: &str, kind: EntityKind) -> Result<DataView, CoreError> {
    match kind {
        EntityKind::Project => projects(name),
        EntityKind::Sample => samples(name),
        EntityKind::Attachment => attachments(name),
        EntityKind::Term => terms(name),
        tag => tags(name, tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_preset() {
        for kind in EntityKind::ALL {
            let view = for_kind("v", kind).unwrap();
            assert_eq!(view.kind(), kind);
            assert!(view.field("modified").is_some());
        }
    }

    #[test]
    fn sample_preset_accepts_term_columns() {
        let view = samples("samples").unwrap().with_term_field("ph").unwrap();
        assert_eq!(view.fields().len(), 7);
        assert_eq!(view.field("slug").map(|f| f.label.as_str()), Some("ID"));
    }

    #[test]
    fn tags_preset_requires_tag_kind() {
        assert!(tags("t", EntityKind::Sample).is_err());
    }
}
