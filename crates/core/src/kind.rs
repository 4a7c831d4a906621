//! The closed set of entity kinds and their per-kind lookup table.
//!
//! Behavior that depends on "what kind of thing is this" is resolved through
//! [`EntityKind::info`] rather than by inspecting display names at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where an entity's slug must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugScope {
    /// Unique across the whole table.
    Global,
    /// Unique within one project.
    Project,
    /// Unique within one (project, taxonomy) pair; the project may be null.
    ProjectTaxonomy,
    /// The kind carries no slug.
    None,
}

/// Every kind of record the catalog manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Sample,
    Attachment,
    Term,
    ProjectTag,
    SampleTag,
    AttachmentTag,
    TermTag,
    SampleTagTag,
}

/// Static facts about one [`EntityKind`].
#[derive(Debug, Clone, Copy)]
pub struct KindInfo {
    pub name: &'static str,
    pub table: &'static str,
    /// For tag kinds, the kind of the object the tag hangs off.
    pub owner: Option<EntityKind>,
    /// The tag kind that attaches to this kind, if it is taggable.
    pub tag_kind: Option<EntityKind>,
    pub slug_scope: SlugScope,
    /// Maximum slug length in characters.
    pub slug_max_len: usize,
}

const fn info(
    name: &'static str,
    table: &'static str,
    owner: Option<EntityKind>,
    tag_kind: Option<EntityKind>,
    slug_scope: SlugScope,
    slug_max_len: usize,
) -> KindInfo {
    KindInfo {
        name,
        table,
        owner,
        tag_kind,
        slug_scope,
        slug_max_len,
    }
}

const PROJECT: KindInfo = info(
    "Project",
    "projects",
    None,
    Some(EntityKind::ProjectTag),
    SlugScope::Global,
    55,
);
const SAMPLE: KindInfo = info(
    "Sample",
    "samples",
    None,
    Some(EntityKind::SampleTag),
    SlugScope::Project,
    55,
);
const ATTACHMENT: KindInfo = info(
    "Attachment",
    "attachments",
    None,
    Some(EntityKind::AttachmentTag),
    SlugScope::Project,
    55,
);
const TERM: KindInfo = info(
    "Term",
    "terms",
    None,
    Some(EntityKind::TermTag),
    SlugScope::ProjectTaxonomy,
    55,
);
const PROJECT_TAG: KindInfo = info(
    "ProjectTag",
    "project_tags",
    Some(EntityKind::Project),
    None,
    SlugScope::None,
    0,
);
const SAMPLE_TAG: KindInfo = info(
    "SampleTag",
    "sample_tags",
    Some(EntityKind::Sample),
    Some(EntityKind::SampleTagTag),
    SlugScope::None,
    0,
);
const ATTACHMENT_TAG: KindInfo = info(
    "AttachmentTag",
    "attachment_tags",
    Some(EntityKind::Attachment),
    None,
    SlugScope::None,
    0,
);
const TERM_TAG: KindInfo = info(
    "TermTag",
    "term_tags",
    Some(EntityKind::Term),
    None,
    SlugScope::None,
    0,
);
const SAMPLE_TAG_TAG: KindInfo = info(
    "SampleTagTag",
    "sample_tag_tags",
    Some(EntityKind::SampleTag),
    None,
    SlugScope::None,
    0,
);

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Project,
        EntityKind::Sample,
        EntityKind::Attachment,
        EntityKind::Term,
        EntityKind::ProjectTag,
        EntityKind::SampleTag,
        EntityKind::AttachmentTag,
        EntityKind::TermTag,
        EntityKind::SampleTagTag,
    ];

    /// Kinds that are not tags; permission rows are only ever written for these.
    pub const BASE: [EntityKind; 4] = [
        EntityKind::Project,
        EntityKind::Sample,
        EntityKind::Attachment,
        EntityKind::Term,
    ];

    pub const fn info(self) -> &'static KindInfo {
        match self {
            EntityKind::Project => &PROJECT,
            EntityKind::Sample => &SAMPLE,
            EntityKind::Attachment => &ATTACHMENT,
            EntityKind::Term => &TERM,
            EntityKind::ProjectTag => &PROJECT_TAG,
            EntityKind::SampleTag => &SAMPLE_TAG,
            EntityKind::AttachmentTag => &ATTACHMENT_TAG,
            EntityKind::TermTag => &TERM_TAG,
            EntityKind::SampleTagTag => &SAMPLE_TAG_TAG,
        }
    }

    pub const fn name(self) -> &'static str {
        self.info().name
    }

    pub const fn table(self) -> &'static str {
        self.info().table
    }

    pub fn is_tag(self) -> bool {
        self.info().owner.is_some()
    }

    pub fn owner(self) -> Option<EntityKind> {
        self.info().owner
    }

    pub fn tag_kind(self) -> Option<EntityKind> {
        self.info().tag_kind
    }

    /// The base kind whose permission grant applies: tags inherit from their owner.
    pub fn permission_kind(self) -> EntityKind {
        let mut kind = self;
        while let Some(owner) = kind.owner() {
            kind = owner;
        }
        kind
    }

    /// Owner hops from this kind down to its base kind, nearest first.
    ///
    /// `SampleTagTag` yields `[SampleTag, Sample]`; base kinds yield `[]`.
    pub fn owner_chain(self) -> Vec<EntityKind> {
        let mut chain = Vec::new();
        let mut kind = self;
        while let Some(owner) = kind.owner() {
            chain.push(owner);
            kind = owner;
        }
        chain
    }

    /// Default taxonomy for Terms used as keys of this kind's tags.
    ///
    /// For a tag kind this is the taxonomy of the kind it tags.
    pub fn default_taxonomy(self) -> &'static str {
        match self.owner() {
            Some(owner) => owner.name(),
            None => self.name(),
        }
    }

    /// Whether records of this kind belong to a project through a `project_id` column.
    pub fn has_project_column(self) -> bool {
        matches!(
            self,
            EntityKind::Sample | EntityKind::Attachment | EntityKind::Term
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Parses the display name (`"Sample"`) or the table name (`"samples"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        EntityKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(trimmed) || k.table() == trimmed)
            .ok_or_else(|| format!("Unknown entity kind: \"{trimmed}\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_kinds_inherit_base_permission_kind() {
        assert_eq!(EntityKind::Sample.permission_kind(), EntityKind::Sample);
        assert_eq!(EntityKind::SampleTag.permission_kind(), EntityKind::Sample);
        assert_eq!(EntityKind::SampleTagTag.permission_kind(), EntityKind::Sample);
        assert_eq!(EntityKind::ProjectTag.permission_kind(), EntityKind::Project);
        assert_eq!(EntityKind::TermTag.permission_kind(), EntityKind::Term);
    }

    #[test]
    fn owner_chain_lists_hops() {
        assert!(EntityKind::Project.owner_chain().is_empty());
        assert_eq!(EntityKind::AttachmentTag.owner_chain(), vec![EntityKind::Attachment]);
        assert_eq!(
            EntityKind::SampleTagTag.owner_chain(),
            vec![EntityKind::SampleTag, EntityKind::Sample]
        );
    }

    #[test]
    fn taggable_kinds_point_at_their_tag_tables() {
        assert_eq!(EntityKind::Sample.tag_kind(), Some(EntityKind::SampleTag));
        assert_eq!(EntityKind::SampleTag.tag_kind(), Some(EntityKind::SampleTagTag));
        assert_eq!(EntityKind::TermTag.tag_kind(), None);
        for kind in EntityKind::ALL {
            if let Some(tag) = kind.tag_kind() {
                assert_eq!(tag.owner(), Some(kind));
            }
        }
    }

    #[test]
    fn default_taxonomy_follows_owner() {
        assert_eq!(EntityKind::Sample.default_taxonomy(), "Sample");
        assert_eq!(EntityKind::SampleTag.default_taxonomy(), "Sample");
        assert_eq!(EntityKind::SampleTagTag.default_taxonomy(), "SampleTag");
    }

    #[test]
    fn parse_by_name_or_table() {
        assert_eq!("sample".parse::<EntityKind>(), Ok(EntityKind::Sample));
        assert_eq!("sample_tags".parse::<EntityKind>(), Ok(EntityKind::SampleTag));
        assert!("widget".parse::<EntityKind>().is_err());
    }
}
