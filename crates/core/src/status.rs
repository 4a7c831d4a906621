//! Object visibility status.
//!
//! Discriminants match the seed rows of the `object_statuses` lookup table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStatus {
    /// Exists only for direct-by-id access; never listed.
    AutoDraft = 1,
    /// Listed only for its owner.
    #[default]
    Draft = 2,
    /// Listed for everyone with view permission. Freezes the slug.
    Published = 3,
}

impl ObjectStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(ObjectStatus::AutoDraft),
            2 => Some(ObjectStatus::Draft),
            3 => Some(ObjectStatus::Published),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectStatus::AutoDraft => "auto-draft",
            ObjectStatus::Draft => "draft",
            ObjectStatus::Published => "published",
        }
    }
}

impl From<ObjectStatus> for StatusId {
    fn from(value: ObjectStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto-draft" => Ok(ObjectStatus::AutoDraft),
            "draft" => Ok(ObjectStatus::Draft),
            "published" => Ok(ObjectStatus::Published),
            other => Err(format!("Unknown status: \"{other}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for status in [
            ObjectStatus::AutoDraft,
            ObjectStatus::Draft,
            ObjectStatus::Published,
        ] {
            assert_eq!(ObjectStatus::from_id(status.id()), Some(status));
            assert_eq!(status.as_str().parse::<ObjectStatus>(), Ok(status));
        }
        assert_eq!(ObjectStatus::from_id(9), None);
    }

    #[test]
    fn serializes_kebab_case() {
        let json = serde_json::to_string(&ObjectStatus::AutoDraft).unwrap();
        assert_eq!(json, "\"auto-draft\"");
    }
}
