//! Repository for the `project_permissions` table, and the permission
//! checks that consult it.

use lims_core::error::{CoreError, EntityRef};
use lims_core::kind::EntityKind;
use lims_core::permissions::{decide, deny, Action, Actor, Decision, GrantKey, PermissionTarget};
use lims_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::ObjectRef;
use crate::models::permission::ProjectPermission;
use crate::sql::{label_expr, owner_chain, BASE_ALIAS};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, project_id, model, action, created_at, modified_at";

/// Grants, revocations and permission checks.
pub struct PermissionRepo;

impl PermissionRepo {
    /// Grant `action` on `kind` within a project. Returns `false` if the
    /// grant already existed.
    pub async fn grant(
        pool: &PgPool,
        user_id: DbId,
        project_id: DbId,
        kind: EntityKind,
        action: &Action,
    ) -> StoreResult<bool> {
        let mut conn = pool.acquire().await?;
        Self::grant_in(&mut conn, user_id, project_id, kind, action).await
    }

    pub async fn grant_in(
        conn: &mut PgConnection,
        user_id: DbId,
        project_id: DbId,
        kind: EntityKind,
        action: &Action,
    ) -> StoreResult<bool> {
        if kind.is_tag() {
            return Err(CoreError::field(
                "kind",
                format!("{kind} inherits its permissions from {}", kind.permission_kind()),
            )
            .into());
        }
        let result = sqlx::query(
            "INSERT INTO project_permissions (user_id, project_id, model, action)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, project_id, model, action) DO NOTHING",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(kind.name())
        .bind(action.as_str())
        .execute(&mut *conn)
        .await?;

        let added = result.rows_affected() > 0;
        if added {
            tracing::info!(user_id, project_id, kind = %kind, action = %action, "Granted permission");
        }
        Ok(added)
    }

    /// Remove a grant. Returns `true` if a row was deleted.
    pub async fn revoke(
        pool: &PgPool,
        user_id: DbId,
        project_id: DbId,
        kind: EntityKind,
        action: &Action,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM project_permissions
             WHERE user_id = $1 AND project_id = $2 AND model = $3 AND action = $4",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(kind.name())
        .bind(action.as_str())
        .execute(pool)
        .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(user_id, project_id, kind = %kind, action = %action, "Revoked permission");
        }
        Ok(removed)
    }

    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<ProjectPermission>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_permissions
             WHERE user_id = $1 ORDER BY project_id, model, action"
        );
        sqlx::query_as::<_, ProjectPermission>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<ProjectPermission>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_permissions
             WHERE project_id = $1 ORDER BY user_id, model, action"
        );
        sqlx::query_as::<_, ProjectPermission>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    pub async fn has_grant_in(conn: &mut PgConnection, key: &GrantKey) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM project_permissions
                 WHERE user_id = $1 AND project_id = $2 AND model = $3 AND action = $4
             )",
        )
        .bind(key.user_id)
        .bind(key.project_id)
        .bind(key.kind.name())
        .bind(key.action.as_str())
        .fetch_one(&mut *conn)
        .await
    }

    /// Whether `actor` may perform `action` on `target`.
    pub async fn can_act(
        pool: &PgPool,
        actor: &Actor,
        target: &PermissionTarget,
        action: &Action,
    ) -> StoreResult<bool> {
        let mut conn = pool.acquire().await?;
        Self::can_act_in(&mut conn, actor, target, action).await
    }

    pub async fn can_act_in(
        conn: &mut PgConnection,
        actor: &Actor,
        target: &PermissionTarget,
        action: &Action,
    ) -> StoreResult<bool> {
        Ok(match decide(actor, target, action) {
            Decision::Allow => true,
            Decision::Deny => false,
            Decision::RequiresGrant(key) => Self::has_grant_in(conn, &key).await?,
        })
    }

    /// Like [`Self::can_act_in`], failing with `ObjectPermission` when denied.
    pub async fn require_in(
        conn: &mut PgConnection,
        actor: &Actor,
        target: &PermissionTarget,
        action: &Action,
    ) -> StoreResult<()> {
        if Self::can_act_in(conn, actor, target, action).await? {
            Ok(())
        } else {
            Err(deny(actor, target, action).into())
        }
    }

    /// Whether `actor` may perform `action` on a stored record of any kind.
    pub async fn can_act_on(
        pool: &PgPool,
        actor: &Actor,
        object: ObjectRef,
        action: &Action,
    ) -> StoreResult<bool> {
        let mut conn = pool.acquire().await?;
        let target = Self::target_of_in(&mut conn, object.kind, object.id).await?;
        Self::can_act_in(&mut conn, actor, &target, action).await
    }

    pub async fn target_of(pool: &PgPool, kind: EntityKind, id: DbId) -> StoreResult<PermissionTarget> {
        let mut conn = pool.acquire().await?;
        Self::target_of_in(&mut conn, kind, id).await
    }

    /// Resolve what the permission rules need to know about a stored record,
    /// following tag owners up to the base object.
    pub async fn target_of_in(
        conn: &mut PgConnection,
        kind: EntityKind,
        id: DbId,
    ) -> StoreResult<PermissionTarget> {
        let chain = owner_chain(kind);
        let query = format!(
            "SELECT {project} AS project_id, {taxonomy} AS term_taxonomy, {label} AS label
             FROM {table} {BASE_ALIAS}{joins}
             WHERE {BASE_ALIAS}.id = $1",
            project = chain.project_expr(),
            taxonomy = chain.taxonomy_expr(),
            label = label_expr(kind, BASE_ALIAS),
            table = kind.table(),
            joins = chain.joins,
        );
        let row: Option<(Option<DbId>, Option<String>, String)> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        let (project_id, term_taxonomy, label) = row.ok_or(CoreError::NotFound {
            entity: kind.name(),
            id,
        })?;
        Ok(PermissionTarget {
            entity: EntityRef::new(kind, Some(id), label),
            project_id,
            term_taxonomy,
        })
    }
}
