//! Repository for the `projects` table.

use lims_core::config::CatalogConfig;
use lims_core::error::CoreError;
use lims_core::kind::EntityKind;
use lims_core::permissions::{required_action, Action, Actor, Mutation};
use lims_core::slug::name_slug_parts;
use lims_core::status::ObjectStatus;
use lims_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::{BaseObject, HEADER_COLUMNS};
use crate::models::project::{CreateProject, Project, UpdateProject};
use crate::repositories::object::{
    self, bind_header, derive_header, dto_errors, placeholders, plan_for_new, plan_for_update,
    write_with_slug, DerivedHeader, HeaderValues, SlugScopeKey, SlugWrite, HEADER_BINDS,
    HEADER_INSERT_COLUMNS, HEADER_UPDATE_SET,
};
use crate::repositories::PermissionRepo;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = HEADER_COLUMNS;

const KIND: EntityKind = EntityKind::Project;

/// Provides CRUD operations for projects.
pub struct ProjectRepo;

/// Inserts (`id: None`) or updates one project row.
struct ProjectWrite<'a> {
    id: Option<DbId>,
    values: &'a HeaderValues,
    derived: DerivedHeader,
    user_id: Option<DbId>,
}

impl SlugWrite for ProjectWrite<'_> {
    type Row = Project;

    async fn write(&self, conn: &mut PgConnection, slug: &str) -> Result<Project, sqlx::Error> {
        match self.id {
            None => {
                let query = format!(
                    "INSERT INTO projects ({HEADER_INSERT_COLUMNS}, user_id)
                     VALUES ({})
                     RETURNING {COLUMNS}",
                    placeholders(1, HEADER_BINDS + 1)
                );
                bind_header(sqlx::query_as::<_, Project>(&query), self.values, slug, &self.derived)
                    .bind(self.user_id)
                    .fetch_one(&mut *conn)
                    .await
            }
            Some(id) => {
                let query = format!(
                    "UPDATE projects SET {HEADER_UPDATE_SET} WHERE id = $1 RETURNING {COLUMNS}"
                );
                bind_header(
                    sqlx::query_as::<_, Project>(&query).bind(id),
                    self.values,
                    slug,
                    &self.derived,
                )
                .fetch_one(&mut *conn)
                .await
            }
        }
    }
}

impl ProjectRepo {
    /// Create a project owned by `actor`.
    ///
    /// The creator receives `config.default_actions` on every base kind in
    /// the new project. A sub-project also needs `edit` on its parent.
    pub async fn create(
        pool: &PgPool,
        actor: &Actor,
        input: &CreateProject,
        config: &CatalogConfig,
    ) -> StoreResult<Project> {
        let mut errors = dto_errors(input);
        let values = HeaderValues::new(
            &input.name,
            input.description.as_deref(),
            input.parent_id,
            input.geometry.as_deref(),
            input.status,
        );
        values.check(&mut errors);
        let plan = plan_for_new(input.slug.as_deref(), name_slug_parts(&values.name), &mut errors);

        let mut tx = pool.begin().await?;
        let derived = derive_header(&mut tx, KIND, None, None, &values, errors).await?;
        if let Some(parent_id) = values.parent_id {
            object::require_on(&mut tx, actor, KIND, parent_id, &Action::EDIT).await?;
        }

        let writer = ProjectWrite {
            id: None,
            values: &values,
            derived,
            user_id: Some(actor.user_id),
        };
        let project =
            write_with_slug(&mut tx, KIND, SlugScopeKey::default(), None, &plan, &writer).await?;

        for kind in EntityKind::BASE {
            for action in &config.default_actions {
                PermissionRepo::grant_in(&mut tx, actor.user_id, project.id(), kind, action)
                    .await?;
            }
        }
        tx.commit().await?;

        tracing::info!(project_id = project.id(), slug = %project.header.slug, user_id = actor.user_id, "Created project");
        Ok(project)
    }

    /// Update a project. Only non-`None` fields in `input` are applied.
    pub async fn update(
        pool: &PgPool,
        actor: &Actor,
        id: DbId,
        input: &UpdateProject,
    ) -> StoreResult<Project> {
        let mut errors = dto_errors(input);
        let mut tx = pool.begin().await?;
        let current = Self::lock(&mut tx, id).await?;
        PermissionRepo::require_in(
            &mut tx,
            actor,
            &current.permission_target(),
            &required_action(Mutation::Update),
        )
        .await?;

        let values = HeaderValues::merge(
            &current.header,
            input.name.as_deref(),
            input.description.as_deref(),
            input.parent_id,
            input.clear_parent,
            input.geometry.as_deref(),
            input.status,
        );
        values.check(&mut errors);
        let plan = plan_for_update(
            input.slug.as_deref(),
            values.status,
            &current.header.slug,
            name_slug_parts(&values.name),
            &mut errors,
        );
        let derived = derive_header(&mut tx, KIND, Some(id), None, &values, errors).await?;
        let moved = values.parent_id != current.header.parent_id;
        if let (true, Some(parent_id)) = (moved, values.parent_id) {
            object::require_on(&mut tx, actor, KIND, parent_id, &Action::EDIT).await?;
        }

        let writer = ProjectWrite {
            id: Some(id),
            values: &values,
            derived,
            user_id: current.header.user_id,
        };
        let project =
            write_with_slug(&mut tx, KIND, SlugScopeKey::default(), Some(id), &plan, &writer)
                .await?;
        if moved {
            object::refresh_descendant_depths(&mut tx, KIND, id).await?;
        }
        tx.commit().await?;

        tracing::info!(project_id = id, user_id = actor.user_id, "Updated project");
        Ok(project)
    }

    /// Find a project the actor may view.
    pub async fn find_by_id(pool: &PgPool, actor: &Actor, id: DbId) -> StoreResult<Project> {
        let mut conn = pool.acquire().await?;
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        PermissionRepo::require_in(&mut conn, actor, &project.permission_target(), &Action::VIEW)
            .await?;
        Ok(project)
    }

    /// Find a project by its globally unique slug.
    pub async fn find_by_slug(
        pool: &PgPool,
        actor: &Actor,
        slug: &str,
    ) -> StoreResult<Option<Project>> {
        let mut conn = pool.acquire().await?;
        let query = format!("SELECT {COLUMNS} FROM projects WHERE slug = $1");
        let Some(project) = sqlx::query_as::<_, Project>(&query)
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        PermissionRepo::require_in(&mut conn, actor, &project.permission_target(), &Action::VIEW)
            .await?;
        Ok(Some(project))
    }

    /// Mark a project published; its slug is frozen from then on.
    pub async fn publish(pool: &PgPool, actor: &Actor, id: DbId) -> StoreResult<()> {
        object::set_status(pool, actor, KIND, id, ObjectStatus::Published).await
    }

    pub async fn delete(
        pool: &PgPool,
        actor: &Actor,
        id: DbId,
        config: &CatalogConfig,
    ) -> StoreResult<()> {
        let mut conn = pool.acquire().await?;
        object::delete_in(&mut conn, actor, KIND, id, config).await
    }

    /// Delete several projects atomically. Returns how many were deleted.
    pub async fn delete_many(
        pool: &PgPool,
        actor: &Actor,
        ids: &[DbId],
        config: &CatalogConfig,
    ) -> StoreResult<u64> {
        object::delete_many(pool, actor, KIND, ids, config).await
    }

    async fn lock(conn: &mut PgConnection, id: DbId) -> StoreResult<Project> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1 FOR UPDATE");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        Ok(project)
    }
}
