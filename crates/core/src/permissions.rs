//! Project-scoped permission decisions.
//!
//! The matrix is `(user, project, base kind, action)`. Staff bypass every
//! check; tag kinds always inherit the grant of their base kind. This module
//! decides *what* must be looked up; the store performs the lookup.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, EntityRef};
use crate::kind::EntityKind;
use crate::term::PROJECT_TAXONOMY;
use crate::types::DbId;

/// An action name. The set is open; the four constants are the ones the
/// catalog itself checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub const VIEW: Action = Action(Cow::Borrowed("view"));
    pub const EDIT: Action = Action(Cow::Borrowed("edit"));
    pub const ADD: Action = Action(Cow::Borrowed("add"));
    pub const DELETE: Action = Action(Cow::Borrowed("delete"));

    /// Normalizes to trimmed lowercase.
    pub fn new(name: &str) -> Self {
        Action(Cow::Owned(name.trim().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = Action::new(s);
        if action.0.is_empty() || !action.0.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(format!("Invalid action name: \"{s}\""));
        }
        Ok(action)
    }
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: DbId,
    pub username: String,
    pub is_staff: bool,
}

/// What the permission check needs to know about the entity acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTarget {
    pub entity: EntityRef,
    /// The owning project: the entity itself for Projects, the tagged
    /// object's project for tags. `None` for global Terms.
    pub project_id: Option<DbId>,
    /// For Terms and Term tags, the taxonomy of the (tagged) Term.
    pub term_taxonomy: Option<String>,
}

/// The grant row that would authorize an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantKey {
    pub user_id: DbId,
    pub project_id: DbId,
    pub kind: EntityKind,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    /// Allowed if and only if this grant row exists.
    RequiresGrant(GrantKey),
}

/// Decide whether `actor` may perform `action` on `target`.
pub fn decide(actor: &Actor, target: &PermissionTarget, action: &Action) -> Decision {
    if actor.is_staff {
        return Decision::Allow;
    }

    let kind = target.entity.kind.permission_kind();
    if kind == EntityKind::Term && target.term_taxonomy.as_deref() == Some(PROJECT_TAXONOMY) {
        return Decision::Deny;
    }

    match target.project_id {
        Some(project_id) => Decision::RequiresGrant(GrantKey {
            user_id: actor.user_id,
            project_id,
            kind,
            action: action.clone(),
        }),
        None => Decision::Deny,
    }
}

/// Turn a negative answer into [`CoreError::ObjectPermission`].
pub fn deny(actor: &Actor, target: &PermissionTarget, action: &Action) -> CoreError {
    tracing::debug!(
        user_id = actor.user_id,
        kind = %target.entity.kind,
        id = ?target.entity.id,
        action = %action,
        "Permission denied"
    );
    CoreError::ObjectPermission {
        target: target.entity.clone(),
        action: action.clone(),
        user_id: actor.user_id,
    }
}

/// A collection-level filter, compiled to SQL by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Unrestricted,
    /// Rows whose owning project has a grant `(user_id, permission_kind, action)`.
    Granted {
        user_id: DbId,
        /// The kind being listed; tags reach their project through owner hops.
        kind: EntityKind,
        permission_kind: EntityKind,
        action: Action,
        /// Exclude the staff-only project vocabulary (Terms, Term tags).
        exclude_project_vocabulary: bool,
    },
}

/// The filter that restricts a collection of `kind` to what `actor` may `action`.
pub fn scope_collection(kind: EntityKind, actor: &Actor, action: &Action) -> ScopeFilter {
    if actor.is_staff {
        return ScopeFilter::Unrestricted;
    }
    let permission_kind = kind.permission_kind();
    ScopeFilter::Granted {
        user_id: actor.user_id,
        kind,
        permission_kind,
        action: action.clone(),
        exclude_project_vocabulary: permission_kind == EntityKind::Term,
    }
}

/// Action a mutation needs on the owning project.
pub fn required_action(op: Mutation) -> Action {
    match op {
        Mutation::Create | Mutation::Update => Action::EDIT,
        Mutation::Delete => Action::DELETE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn user(is_staff: bool) -> Actor {
        Actor {
            user_id: 7,
            username: "alice".into(),
            is_staff,
        }
    }

    fn target(kind: EntityKind, project_id: Option<DbId>, taxonomy: Option<&str>) -> PermissionTarget {
        PermissionTarget {
            entity: EntityRef::new(kind, Some(1), "x"),
            project_id,
            term_taxonomy: taxonomy.map(str::to_string),
        }
    }

    #[test]
    fn staff_always_allowed() {
        let t = target(EntityKind::Term, None, Some(PROJECT_TAXONOMY));
        assert_eq!(decide(&user(true), &t, &Action::EDIT), Decision::Allow);
        assert_eq!(
            scope_collection(EntityKind::Sample, &user(true), &Action::VIEW),
            ScopeFilter::Unrestricted
        );
    }

    #[test]
    fn tags_require_base_kind_grant() {
        let t = target(EntityKind::SampleTagTag, Some(3), None);
        assert_matches!(
            decide(&user(false), &t, &Action::VIEW),
            Decision::RequiresGrant(GrantKey { project_id: 3, kind: EntityKind::Sample, .. })
        );
    }

    #[test]
    fn project_vocabulary_is_staff_only() {
        let t = target(EntityKind::Term, Some(3), Some(PROJECT_TAXONOMY));
        assert_eq!(decide(&user(false), &t, &Action::VIEW), Decision::Deny);
        let t = target(EntityKind::TermTag, Some(3), Some(PROJECT_TAXONOMY));
        assert_eq!(decide(&user(false), &t, &Action::VIEW), Decision::Deny);
        let t = target(EntityKind::Term, Some(3), Some("Sample"));
        assert_matches!(decide(&user(false), &t, &Action::VIEW), Decision::RequiresGrant(_));
    }

    #[test]
    fn global_terms_denied_to_non_staff() {
        let t = target(EntityKind::Term, None, Some("Sample"));
        assert_eq!(decide(&user(false), &t, &Action::EDIT), Decision::Deny);
    }

    #[test]
    fn scope_filter_for_tag_kind() {
        let f = scope_collection(EntityKind::TermTag, &user(false), &Action::VIEW);
        assert_matches!(
            f,
            ScopeFilter::Granted {
                kind: EntityKind::TermTag,
                permission_kind: EntityKind::Term,
                exclude_project_vocabulary: true,
                ..
            }
        );
    }

    #[test]
    fn action_names_normalize() {
        assert_eq!(" VIEW ".parse::<Action>().unwrap(), Action::VIEW);
        assert_eq!("approve".parse::<Action>().unwrap().as_str(), "approve");
        assert!("".parse::<Action>().is_err());
        assert!("drop table".parse::<Action>().is_err());
        assert_eq!(serde_json::to_string(&Action::DELETE).unwrap(), "\"delete\"");
    }

    #[test]
    fn mutations_map_to_actions() {
        assert_eq!(required_action(Mutation::Create), Action::EDIT);
        assert_eq!(required_action(Mutation::Delete), Action::DELETE);
    }
}
