//! The header every base object shares, and the capability trait over it.

use lims_core::error::EntityRef;
use lims_core::geometry::Bounds;
use lims_core::kind::EntityKind;
use lims_core::permissions::PermissionTarget;
use lims_core::status::{ObjectStatus, StatusId};
use lims_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Columns of [`ObjectHeader`], in struct order.
pub const HEADER_COLUMNS: &str = "id, name, slug, description, parent_id, recursive_depth, \
    geometry, bbox_xmin, bbox_xmax, bbox_ymin, bbox_ymax, user_id, status_id, created_at, \
    modified_at";

/// Fields common to Projects, Samples, Attachments and Terms.
///
/// The bounding box is stored as `bbox_*`; `xmin`/`xmax` are Postgres system columns.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ObjectHeader {
    pub id: DbId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<DbId>,
    /// Number of ancestors. Derived on every save.
    pub recursive_depth: i32,
    /// WKT; empty when the object has no geometry.
    pub geometry: String,
    #[sqlx(rename = "bbox_xmin")]
    pub xmin: Option<f64>,
    #[sqlx(rename = "bbox_xmax")]
    pub xmax: Option<f64>,
    #[sqlx(rename = "bbox_ymin")]
    pub ymin: Option<f64>,
    #[sqlx(rename = "bbox_ymax")]
    pub ymax: Option<f64>,
    pub user_id: Option<DbId>,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl ObjectHeader {
    pub fn status(&self) -> ObjectStatus {
        ObjectStatus::from_id(self.status_id).unwrap_or_default()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
        }
    }
}

/// Capabilities shared by the four base kinds.
pub trait BaseObject {
    const KIND: EntityKind;

    fn header(&self) -> &ObjectHeader;

    /// The owning project; the object itself for Projects, `None` for global Terms.
    fn project_id(&self) -> Option<DbId>;

    /// Taxonomy consulted by the permission rules; only Terms have one.
    fn term_taxonomy(&self) -> Option<&str> {
        None
    }

    fn id(&self) -> DbId {
        self.header().id
    }

    fn entity_ref(&self) -> EntityRef {
        let header = self.header();
        EntityRef::new(Self::KIND, Some(header.id), header.slug.clone())
    }

    fn permission_target(&self) -> PermissionTarget {
        PermissionTarget {
            entity: self.entity_ref(),
            project_id: self.project_id(),
            term_taxonomy: self.term_taxonomy().map(str::to_string),
        }
    }
}

/// A pointer to any stored record by kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: EntityKind,
    pub id: DbId,
}

impl ObjectRef {
    pub fn new(kind: EntityKind, id: DbId) -> Self {
        Self { kind, id }
    }

    pub fn of<T: BaseObject>(object: &T) -> Self {
        Self::new(T::KIND, object.id())
    }
}
