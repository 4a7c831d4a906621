//! Write path shared by the four base kinds: derived header fields, slug
//! assignment with a race retry, status changes and guarded deletes.

use std::collections::BTreeSet;

use lims_core::config::CatalogConfig;
use lims_core::error::{
    CoreError, EntityRef, ProtectedReferents, ValidationErrors, MAX_LISTED_REFERENTS,
};
use lims_core::geometry::{self, Bounds};
use lims_core::hierarchy::{check_parent_chain, ChainLink, MAX_TREE_DEPTH};
use lims_core::kind::{EntityKind, SlugScope};
use lims_core::permissions::{required_action, Action, Actor, Mutation};
use lims_core::slug::{self, join_parts, candidate_root, slugify, MAX_SLUG_ATTEMPTS};
use lims_core::status::ObjectStatus;
use lims_core::types::DbId;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use validator::Validate;

use crate::error::{self, StoreResult};
use crate::models::object::ObjectHeader;
use crate::repositories::PermissionRepo;
use crate::sql::{escape_like, label_expr};

/// Header columns written on insert, bound by [`bind_header`] as `$1..$11`.
pub(crate) const HEADER_INSERT_COLUMNS: &str = "name, slug, description, parent_id, \
    recursive_depth, geometry, bbox_xmin, bbox_xmax, bbox_ymin, bbox_ymax, status_id";

/// Header assignments for updates: `$1` is the row id, [`bind_header`] fills `$2..$12`.
pub(crate) const HEADER_UPDATE_SET: &str = "name = $2, slug = $3, description = $4, \
    parent_id = $5, recursive_depth = $6, geometry = $7, bbox_xmin = $8, bbox_xmax = $9, \
    bbox_ymin = $10, bbox_ymax = $11, status_id = $12, modified_at = now()";

/// Number of values [`bind_header`] binds.
pub(crate) const HEADER_BINDS: usize = 11;

/// `$from, $from+1, ...` for `count` placeholders.
pub(crate) fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Header values
// ---------------------------------------------------------------------------

/// Caller-controlled header values, after defaults or after merging an
/// update over the stored row.
#[derive(Debug, Clone)]
pub(crate) struct HeaderValues {
    pub name: String,
    pub description: String,
    pub parent_id: Option<DbId>,
    pub geometry: String,
    pub status: ObjectStatus,
}

impl HeaderValues {
    pub fn new(
        name: &str,
        description: Option<&str>,
        parent_id: Option<DbId>,
        geometry: Option<&str>,
        status: Option<ObjectStatus>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.unwrap_or_default().to_string(),
            parent_id,
            geometry: geometry.unwrap_or_default().to_string(),
            status: status.unwrap_or_default(),
        }
    }

    /// Overlay the non-`None` update fields on `current`.
    pub fn merge(
        current: &ObjectHeader,
        name: Option<&str>,
        description: Option<&str>,
        parent_id: Option<DbId>,
        clear_parent: bool,
        geometry: Option<&str>,
        status: Option<ObjectStatus>,
    ) -> Self {
        Self {
            name: name.unwrap_or(&current.name).to_string(),
            description: description.unwrap_or(&current.description).to_string(),
            parent_id: if clear_parent {
                None
            } else {
                parent_id.or(current.parent_id)
            },
            geometry: geometry.unwrap_or(&current.geometry).to_string(),
            status: status.unwrap_or_else(|| current.status()),
        }
    }

    /// Checks the derive attributes cannot express.
    pub fn check(&self, errors: &mut ValidationErrors) {
        if self.name.trim().is_empty() {
            errors.add("name", "This field cannot be blank");
        }
    }
}

/// Run the `validator` derive on a DTO, in the domain error shape.
pub(crate) fn dto_errors<T: Validate>(input: &T) -> ValidationErrors {
    match input.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(e) => error::from_validator(&e),
    }
}

/// Values derived on every save; never taken from the caller.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DerivedHeader {
    pub recursive_depth: i32,
    pub bounds: Bounds,
}

/// Bind the eleven header values in [`HEADER_INSERT_COLUMNS`] order.
pub(crate) fn bind_header<'q, O>(
    q: QueryAs<'q, Postgres, O, PgArguments>,
    values: &'q HeaderValues,
    slug: &'q str,
    derived: &DerivedHeader,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    q.bind(values.name.as_str())
        .bind(slug)
        .bind(values.description.as_str())
        .bind(values.parent_id)
        .bind(derived.recursive_depth)
        .bind(values.geometry.as_str())
        .bind(derived.bounds.xmin)
        .bind(derived.bounds.xmax)
        .bind(derived.bounds.ymin)
        .bind(derived.bounds.ymax)
        .bind(values.status.id())
}

/// Load the ancestors of a record starting at `start`, nearest first.
///
/// Stops after [`MAX_TREE_DEPTH`] + 1 links so a cycle already in storage
/// cannot loop forever.
pub(crate) async fn load_chain(
    conn: &mut PgConnection,
    kind: EntityKind,
    start: DbId,
) -> Result<Vec<ChainLink>, sqlx::Error> {
    let (project, project_t) = if kind.has_project_column() {
        ("project_id", "t.project_id")
    } else {
        ("NULL::BIGINT", "NULL::BIGINT")
    };
    let table = kind.table();
    let query = format!(
        "WITH RECURSIVE chain AS ( \
             SELECT id, parent_id, {project} AS project_id, 1 AS depth FROM {table} WHERE id = $1 \
             UNION ALL \
             SELECT t.id, t.parent_id, {project_t}, c.depth + 1 \
             FROM {table} t JOIN chain c ON t.id = c.parent_id \
             WHERE c.depth <= $2 \
         ) \
         SELECT id, project_id FROM chain ORDER BY depth"
    );
    let rows: Vec<(DbId, Option<DbId>)> = sqlx::query_as(&query)
        .bind(start)
        .bind(MAX_TREE_DEPTH)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, project_id)| ChainLink { id, project_id })
        .collect())
}

/// Recompute `recursive_depth` below `id` after it moved in the tree.
pub(crate) async fn refresh_descendant_depths(
    conn: &mut PgConnection,
    kind: EntityKind,
    id: DbId,
) -> Result<u64, sqlx::Error> {
    let table = kind.table();
    let query = format!(
        "WITH RECURSIVE tree AS ( \
             SELECT id, recursive_depth AS depth FROM {table} WHERE id = $1 \
             UNION ALL \
             SELECT c.id, tree.depth + 1 FROM {table} c JOIN tree ON c.parent_id = tree.id \
         ) \
         UPDATE {table} x SET recursive_depth = tree.depth \
         FROM tree WHERE x.id = tree.id AND x.recursive_depth <> tree.depth"
    );
    let result = sqlx::query(&query).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Whether project `id` exists; reported as a `project` field error if not.
pub(crate) async fn check_project(
    conn: &mut PgConnection,
    id: DbId,
    errors: &mut ValidationErrors,
) -> Result<(), sqlx::Error> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if !exists {
        errors.add("project", format!("Project {id} does not exist"));
    }
    Ok(())
}

/// Derive depth and bounds, validating the parent chain and the geometry.
///
/// `errors` carries violations found earlier; everything is reported together.
pub(crate) async fn derive_header(
    conn: &mut PgConnection,
    kind: EntityKind,
    self_id: Option<DbId>,
    project_id: Option<DbId>,
    values: &HeaderValues,
    mut errors: ValidationErrors,
) -> StoreResult<DerivedHeader> {
    let mut recursive_depth = 0;
    if let Some(parent_id) = values.parent_id {
        let chain = load_chain(conn, kind, parent_id).await?;
        if chain.is_empty() {
            errors.add("parent", format!("{kind} {parent_id} does not exist"));
        } else {
            match check_parent_chain(self_id, project_id, &chain) {
                Ok(depth) => recursive_depth = depth,
                Err(err) => absorb(&mut errors, err)?,
            }
        }
    }

    let bounds = match geometry::bounds(&values.geometry) {
        Ok(bounds) => bounds,
        Err(err) => {
            absorb(&mut errors, err)?;
            Bounds::default()
        }
    };

    errors.into_result()?;
    Ok(DerivedHeader {
        recursive_depth,
        bounds,
    })
}

/// Fold a validation error into `errors`; pass anything else through.
pub(crate) fn absorb(errors: &mut ValidationErrors, err: CoreError) -> Result<(), CoreError> {
    match err {
        CoreError::Validation(inner) => {
            errors.extend(inner);
            Ok(())
        }
        other => Err(other),
    }
}

// ---------------------------------------------------------------------------
// Slugs
// ---------------------------------------------------------------------------

/// How the slug of a record being written is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlugPlan {
    /// Written as-is; a collision is a conflict.
    Fixed(String),
    /// Resolved from these parts against the slugs already in scope.
    Generate(Vec<String>),
}

/// Plan for a new record: the caller's slug if given, else generated.
pub(crate) fn plan_for_new(
    explicit: Option<&str>,
    parts: Vec<String>,
    errors: &mut ValidationErrors,
) -> SlugPlan {
    match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => {
            check_slug_chars(slug, errors);
            SlugPlan::Fixed(slug.to_string())
        }
        None => SlugPlan::Generate(parts),
    }
}

/// Plan for an existing record. Published records keep their slug unless
/// the caller sets one explicitly; an explicit blank slug is rejected.
pub(crate) fn plan_for_update(
    explicit: Option<&str>,
    status: ObjectStatus,
    current: &str,
    parts: Vec<String>,
    errors: &mut ValidationErrors,
) -> SlugPlan {
    match explicit.map(str::trim) {
        Some("") => {
            errors.add("slug", "An existing record cannot have an empty slug");
            SlugPlan::Fixed(current.to_string())
        }
        Some(slug) => {
            check_slug_chars(slug, errors);
            SlugPlan::Fixed(slug.to_string())
        }
        None if status == ObjectStatus::Published => SlugPlan::Fixed(current.to_string()),
        None => SlugPlan::Generate(parts),
    }
}

fn check_slug_chars(slug: &str, errors: &mut ValidationErrors) {
    if slugify(slug) != slug {
        errors.add(
            "slug",
            "Use only lowercase letters, numbers, underscores or hyphens",
        );
    }
}

/// The values that select a slug namespace.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlugScopeKey<'a> {
    pub project_id: Option<DbId>,
    pub taxonomy: Option<&'a str>,
}

/// Slugs in scope starting with `root`, ignoring the record `exclude`.
pub(crate) async fn taken_slugs(
    conn: &mut PgConnection,
    kind: EntityKind,
    scope: SlugScopeKey<'_>,
    root: &str,
    exclude: Option<DbId>,
) -> Result<BTreeSet<String>, sqlx::Error> {
    let table = kind.table();
    let pattern = format!("{}%", escape_like(root));
    let base = format!(
        "SELECT slug FROM {table} WHERE slug LIKE $1 ESCAPE '\\' AND id IS DISTINCT FROM $2"
    );
    let slugs: Vec<String> = match kind.info().slug_scope {
        SlugScope::None => Vec::new(),
        SlugScope::Global => {
            sqlx::query_scalar(&base)
                .bind(&pattern)
                .bind(exclude)
                .fetch_all(&mut *conn)
                .await?
        }
        SlugScope::Project => {
            sqlx::query_scalar(&format!("{base} AND project_id = $3"))
                .bind(&pattern)
                .bind(exclude)
                .bind(scope.project_id)
                .fetch_all(&mut *conn)
                .await?
        }
        SlugScope::ProjectTaxonomy => {
            sqlx::query_scalar(&format!(
                "{base} AND COALESCE(project_id, 0) = COALESCE($3, 0) AND taxonomy = $4"
            ))
            .bind(&pattern)
            .bind(exclude)
            .bind(scope.project_id)
            .bind(scope.taxonomy)
            .fetch_all(&mut *conn)
            .await?
        }
    };
    Ok(slugs.into_iter().collect())
}

/// Writes one row with a given slug. Implemented per kind for inserts and updates.
pub(crate) trait SlugWrite {
    type Row;

    async fn write(&self, conn: &mut PgConnection, slug: &str) -> Result<Self::Row, sqlx::Error>;
}

/// Choose a slug per `plan` and write the row inside a savepoint.
///
/// A unique violation on a slug constraint is a concurrent writer taking
/// the same candidate: generated slugs are resolved again once, fixed slugs
/// fail with [`CoreError::Conflict`].
pub(crate) async fn write_with_slug<W: SlugWrite>(
    conn: &mut PgConnection,
    kind: EntityKind,
    scope: SlugScopeKey<'_>,
    exclude: Option<DbId>,
    plan: &SlugPlan,
    writer: &W,
) -> StoreResult<W::Row> {
    let max_len = kind.info().slug_max_len;
    for attempt in 1..=2 {
        let slug = match plan {
            SlugPlan::Fixed(slug) => slug.clone(),
            SlugPlan::Generate(parts) => {
                let root = candidate_root(&join_parts(parts), max_len);
                let taken = taken_slugs(conn, kind, scope, &root, exclude).await?;
                slug::resolve(parts, max_len, &taken, 0)?
            }
        };

        let mut savepoint = conn.begin().await?;
        match writer.write(&mut savepoint, &slug).await {
            Ok(row) => {
                savepoint.commit().await?;
                return Ok(row);
            }
            Err(err) if error::is_slug_conflict(&err) => {
                savepoint.rollback().await?;
                if let SlugPlan::Fixed(_) = plan {
                    return Err(CoreError::Conflict(format!(
                        "{kind} identifier \"{slug}\" is already in use"
                    ))
                    .into());
                }
                tracing::warn!(kind = %kind, slug = %slug, attempt, "Slug taken concurrently, probing again");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let base = match plan {
        SlugPlan::Fixed(slug) => slug.clone(),
        SlugPlan::Generate(parts) => join_parts(parts),
    };
    Err(CoreError::SlugExhausted {
        base,
        attempts: MAX_SLUG_ATTEMPTS,
    }
    .into())
}

/// Username of `user_id`, for slug parts.
pub(crate) async fn username_of(
    conn: &mut PgConnection,
    user_id: Option<DbId>,
) -> Result<Option<String>, sqlx::Error> {
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Change the status of one record. Requires `edit`.
pub(crate) async fn set_status(
    pool: &PgPool,
    actor: &Actor,
    kind: EntityKind,
    id: DbId,
    status: ObjectStatus,
) -> StoreResult<()> {
    let mut conn = pool.acquire().await?;
    let target = PermissionRepo::target_of_in(&mut conn, kind, id).await?;
    PermissionRepo::require_in(&mut conn, actor, &target, &required_action(Mutation::Update))
        .await?;
    let query = format!(
        "UPDATE {} SET status_id = $2, modified_at = now() WHERE id = $1",
        kind.table()
    );
    sqlx::query(&query)
        .bind(id)
        .bind(status.id())
        .execute(&mut *conn)
        .await?;
    tracing::info!(kind = %kind, id, status = %status, user_id = actor.user_id, "Changed status");
    Ok(())
}

// ---------------------------------------------------------------------------
// Deletes
// ---------------------------------------------------------------------------

/// Records that block deleting `id`: children in the tree, members of a
/// project, and (for Terms) tags keyed by it. Returns at most
/// [`MAX_LISTED_REFERENTS`] of them plus the total.
async fn referents(
    conn: &mut PgConnection,
    kind: EntityKind,
    id: DbId,
) -> Result<(Vec<EntityRef>, usize), sqlx::Error> {
    let select = |k: EntityKind, column: &str| {
        format!(
            "SELECT '{name}' AS kind, x.id, {label} AS label FROM {table} x WHERE x.{column} = $1",
            name = k.name(),
            label = label_expr(k, "x"),
            table = k.table(),
        )
    };

    let mut parts = vec![select(kind, "parent_id")];
    if kind == EntityKind::Project {
        for member in [EntityKind::Sample, EntityKind::Attachment, EntityKind::Term] {
            parts.push(select(member, "project_id"));
        }
    }
    if kind == EntityKind::Term {
        for tag_kind in EntityKind::ALL.into_iter().filter(|k| k.is_tag()) {
            parts.push(select(tag_kind, "key_id"));
        }
    }
    let union = parts.join(" UNION ALL ");

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*)::BIGINT FROM ({union}) r"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if total == 0 {
        return Ok((Vec::new(), 0));
    }

    let rows: Vec<(String, DbId, String)> = sqlx::query_as(&format!(
        "SELECT kind, id, label FROM ({union}) r ORDER BY kind, id LIMIT {MAX_LISTED_REFERENTS}"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let listed = rows
        .into_iter()
        .filter_map(|(k, id, label)| {
            k.parse::<EntityKind>()
                .ok()
                .map(|kind| EntityRef::new(kind, Some(id), label))
        })
        .collect();
    Ok((listed, usize::try_from(total).unwrap_or(usize::MAX)))
}

/// `id` and all its descendants.
async fn subtree(
    conn: &mut PgConnection,
    kind: EntityKind,
    id: DbId,
) -> Result<Vec<DbId>, sqlx::Error> {
    let table = kind.table();
    let query = format!(
        "WITH RECURSIVE tree AS ( \
             SELECT id FROM {table} WHERE id = $1 \
             UNION \
             SELECT c.id FROM {table} c JOIN tree ON c.parent_id = tree.id \
         ) \
         SELECT id FROM tree"
    );
    sqlx::query_scalar(&query)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
}

async fn ids_in_projects(
    conn: &mut PgConnection,
    kind: EntityKind,
    projects: &[DbId],
) -> Result<Vec<DbId>, sqlx::Error> {
    let query = format!("SELECT id FROM {} WHERE project_id = ANY($1)", kind.table());
    sqlx::query_scalar(&query)
        .bind(projects)
        .fetch_all(&mut *conn)
        .await
}

async fn delete_ids(
    conn: &mut PgConnection,
    kind: EntityKind,
    ids: &[DbId],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let query = format!("DELETE FROM {} WHERE id = ANY($1)", kind.table());
    let result = sqlx::query(&query).bind(ids).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Drop attachment links pointing at records of `kind`.
async fn clear_links(
    conn: &mut PgConnection,
    kind: EntityKind,
    ids: &[DbId],
) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM attachment_links WHERE entity_kind = $1 AND entity_id = ANY($2)")
        .bind(kind.name())
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Drop attachment links pointing at the tags of the given samples.
async fn clear_sample_tag_links(conn: &mut PgConnection, samples: &[DbId]) -> Result<(), sqlx::Error> {
    if samples.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "DELETE FROM attachment_links WHERE entity_kind = $1 \
         AND entity_id IN (SELECT id FROM sample_tags WHERE object_id = ANY($2))",
    )
    .bind(EntityKind::SampleTag.name())
    .bind(samples)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete every tag keyed by one of `terms`, in every tag table.
async fn delete_keyed_tags(conn: &mut PgConnection, terms: &[DbId]) -> Result<(), sqlx::Error> {
    if terms.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "DELETE FROM attachment_links WHERE entity_kind = $1 \
         AND entity_id IN (SELECT id FROM sample_tags WHERE key_id = ANY($2))",
    )
    .bind(EntityKind::SampleTag.name())
    .bind(terms)
    .execute(&mut *conn)
    .await?;
    for tag_kind in EntityKind::ALL.into_iter().filter(|k| k.is_tag()) {
        let query = format!("DELETE FROM {} WHERE key_id = ANY($1)", tag_kind.table());
        sqlx::query(&query).bind(terms).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Remove `id` with everything it owns. Returns the number of base records removed.
async fn remove(conn: &mut PgConnection, kind: EntityKind, id: DbId) -> Result<u64, sqlx::Error> {
    let ids = subtree(conn, kind, id).await?;
    let mut removed = 0;
    match kind {
        EntityKind::Project => {
            let samples = ids_in_projects(conn, EntityKind::Sample, &ids).await?;
            let attachments = ids_in_projects(conn, EntityKind::Attachment, &ids).await?;
            let terms = ids_in_projects(conn, EntityKind::Term, &ids).await?;
            clear_links(conn, EntityKind::Sample, &samples).await?;
            clear_sample_tag_links(conn, &samples).await?;
            clear_links(conn, EntityKind::Term, &terms).await?;
            delete_keyed_tags(conn, &terms).await?;
            removed += delete_ids(conn, EntityKind::Sample, &samples).await?;
            removed += delete_ids(conn, EntityKind::Attachment, &attachments).await?;
            removed += delete_ids(conn, EntityKind::Term, &terms).await?;
        }
        EntityKind::Sample => {
            clear_links(conn, kind, &ids).await?;
            clear_sample_tag_links(conn, &ids).await?;
        }
        EntityKind::Term => {
            clear_links(conn, kind, &ids).await?;
            delete_keyed_tags(conn, &ids).await?;
        }
        _ => {}
    }
    removed += delete_ids(conn, kind, &ids).await?;
    Ok(removed)
}

/// Delete one record after checking `delete` permission.
///
/// Records with referents are refused with [`CoreError::ReferentialIntegrity`]
/// unless `config` cascades deletes for `kind`.
pub(crate) async fn delete_in(
    conn: &mut PgConnection,
    actor: &Actor,
    kind: EntityKind,
    id: DbId,
    config: &CatalogConfig,
) -> StoreResult<()> {
    let target = PermissionRepo::target_of_in(conn, kind, id).await?;
    PermissionRepo::require_in(conn, actor, &target, &required_action(Mutation::Delete)).await?;

    let (listed, total) = referents(conn, kind, id).await?;
    if total > 0 && !config.cascades(kind) {
        tracing::debug!(kind = %kind, id, referents = total, "Delete refused");
        return Err(CoreError::ReferentialIntegrity(ProtectedReferents::with_total(
            target.entity,
            listed,
            total,
        ))
        .into());
    }

    let mut savepoint = conn.begin().await?;
    let removed = remove(&mut savepoint, kind, id)
        .await
        .map_err(|err| error::on_delete(err, &target.entity))?;
    savepoint.commit().await?;

    tracing::info!(kind = %kind, id, user_id = actor.user_id, removed, "Deleted object");
    Ok(())
}

/// Delete several records in one transaction; the first failure rolls back all.
///
/// Records already removed by an earlier cascade in the same call are skipped.
pub(crate) async fn delete_many(
    pool: &PgPool,
    actor: &Actor,
    kind: EntityKind,
    ids: &[DbId],
    config: &CatalogConfig,
) -> StoreResult<u64> {
    let mut tx = pool.begin().await?;
    for id in ids {
        PermissionRepo::target_of_in(&mut tx, kind, *id).await?;
    }
    let mut deleted = 0;
    for id in ids {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            kind.table()
        ))
        .bind(*id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            continue;
        }
        delete_in(&mut tx, actor, kind, *id, config).await?;
        deleted += 1;
    }
    tx.commit().await?;
    Ok(deleted)
}

/// Require `action` on an existing record.
pub(crate) async fn require_on(
    conn: &mut PgConnection,
    actor: &Actor,
    kind: EntityKind,
    id: DbId,
    action: &Action,
) -> StoreResult<()> {
    let target = PermissionRepo::target_of_in(conn, kind, id).await?;
    PermissionRepo::require_in(conn, actor, &target, action).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_runs() {
        assert_eq!(placeholders(12, 3), "$12, $13, $14");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn new_records_generate_unless_slug_given() {
        let mut errors = ValidationErrors::new();
        let parts = vec!["a".to_string()];
        assert_eq!(
            plan_for_new(None, parts.clone(), &mut errors),
            SlugPlan::Generate(parts.clone())
        );
        assert_eq!(
            plan_for_new(Some("  "), parts.clone(), &mut errors),
            SlugPlan::Generate(parts.clone())
        );
        assert_eq!(
            plan_for_new(Some("my-slug"), parts, &mut errors),
            SlugPlan::Fixed("my-slug".into())
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn published_records_keep_their_slug() {
        let mut errors = ValidationErrors::new();
        let parts = vec!["renamed".to_string()];
        assert_eq!(
            plan_for_update(None, ObjectStatus::Published, "old", parts.clone(), &mut errors),
            SlugPlan::Fixed("old".into())
        );
        assert_eq!(
            plan_for_update(None, ObjectStatus::Draft, "old", parts.clone(), &mut errors),
            SlugPlan::Generate(parts)
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn blank_or_unsafe_slugs_on_update_are_errors() {
        let mut errors = ValidationErrors::new();
        plan_for_update(Some(""), ObjectStatus::Draft, "old", vec![], &mut errors);
        plan_for_update(Some("Not Safe"), ObjectStatus::Draft, "old", vec![], &mut errors);
        assert_eq!(errors.for_field("slug").count(), 2);
    }

    #[test]
    fn merge_overlays_only_given_fields() {
        let now = chrono::Utc::now();
        let current = ObjectHeader {
            id: 1,
            name: "old".into(),
            slug: "old".into(),
            description: "desc".into(),
            parent_id: Some(4),
            recursive_depth: 1,
            geometry: String::new(),
            xmin: None,
            xmax: None,
            ymin: None,
            ymax: None,
            user_id: Some(2),
            status_id: ObjectStatus::Published.id(),
            created_at: now,
            modified_at: now,
        };
        let merged = HeaderValues::merge(&current, Some("new"), None, None, false, None, None);
        assert_eq!(merged.name, "new");
        assert_eq!(merged.description, "desc");
        assert_eq!(merged.parent_id, Some(4));
        assert_eq!(merged.status, ObjectStatus::Published);

        let detached = HeaderValues::merge(&current, None, None, Some(9), true, None, None);
        assert_eq!(detached.parent_id, None);
    }
}
