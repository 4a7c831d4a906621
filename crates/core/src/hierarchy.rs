//! Parent-chain validation and `recursive_depth` derivation.

use crate::error::{CoreError, ValidationErrors};
use crate::types::DbId;

/// Chains longer than this are treated as corrupt (a cycle already in storage).
pub const MAX_TREE_DEPTH: i32 = 256;

/// One ancestor as loaded from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub id: DbId,
    pub project_id: Option<DbId>,
}

/// Validate a proposed parent chain and return the derived depth.
///
/// `chain` lists the ancestors nearest first: the proposed parent, its parent,
/// and so on up to the root. `self_id` is `None` for records not yet stored.
/// The depth is the number of ancestors; callers never supply it.
pub fn check_parent_chain(
    self_id: Option<DbId>,
    project_id: Option<DbId>,
    chain: &[ChainLink],
) -> Result<i32, CoreError> {
    let Some(parent) = chain.first() else {
        return Ok(0);
    };

    let mut errors = ValidationErrors::new();

    if parent.project_id != project_id {
        errors.add("parent", "Parent must belong to the same project");
    }

    if let Some(id) = self_id {
        if chain.iter().any(|link| link.id == id) {
            errors.add("parent", "An object cannot be its own ancestor");
        }
    }

    let depth = i32::try_from(chain.len()).unwrap_or(i32::MAX);
    if depth > MAX_TREE_DEPTH {
        errors.add(
            "parent",
            format!("Parent chain exceeds the maximum depth of {MAX_TREE_DEPTH}"),
        );
    }

    errors.into_result()?;
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn chain(ids: &[DbId], project: Option<DbId>) -> Vec<ChainLink> {
        ids.iter()
            .map(|&id| ChainLink {
                id,
                project_id: project,
            })
            .collect()
    }

    #[test]
    fn root_has_depth_zero() {
        assert_eq!(check_parent_chain(None, Some(1), &[]).unwrap(), 0);
    }

    #[test]
    fn depth_equals_chain_length() {
        for len in 1..6 {
            let ids: Vec<DbId> = (10..10 + len).collect();
            let depth = check_parent_chain(None, Some(1), &chain(&ids, Some(1))).unwrap();
            assert_eq!(depth, len as i32);
        }
    }

    #[test]
    fn projects_have_no_project() {
        assert_eq!(check_parent_chain(Some(5), None, &chain(&[4, 3], None)).unwrap(), 2);
    }

    #[test]
    fn parent_in_other_project_rejected() {
        let err = check_parent_chain(None, Some(1), &chain(&[7], Some(2))).unwrap_err();
        assert_matches!(err, CoreError::Validation(ref e) if e.for_field("parent").count() == 1);
    }

    #[test]
    fn cycle_rejected_with_all_violations() {
        let mut links = chain(&[3, 9], Some(2));
        links[0].project_id = Some(1);
        let err = check_parent_chain(Some(9), Some(2), &links).unwrap_err();
        assert_matches!(err, CoreError::Validation(ref e) if e.len() == 2);
    }
}
