//! Repository for the `samples` table.

use lims_core::config::CatalogConfig;
use lims_core::error::{CoreError, EntityRef};
use lims_core::kind::EntityKind;
use lims_core::permissions::{required_action, Action, Actor, Mutation, PermissionTarget};
use lims_core::slug::sample_slug_parts;
use lims_core::status::ObjectStatus;
use lims_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::{BaseObject, HEADER_COLUMNS};
use crate::models::sample::{CreateSample, Sample, UpdateSample};
use crate::repositories::object::{
    self, bind_header, derive_header, dto_errors, placeholders, plan_for_new, plan_for_update,
    write_with_slug, DerivedHeader, HeaderValues, SlugScopeKey, SlugWrite, HEADER_BINDS,
    HEADER_INSERT_COLUMNS, HEADER_UPDATE_SET,
};
use crate::repositories::PermissionRepo;

const KIND: EntityKind = EntityKind::Sample;

/// Provides CRUD operations for samples.
pub struct SampleRepo;

fn columns() -> String {
    format!("{HEADER_COLUMNS}, project_id, collected")
}

struct SampleWrite<'a> {
    id: Option<DbId>,
    values: &'a HeaderValues,
    derived: DerivedHeader,
    user_id: Option<DbId>,
    project_id: DbId,
    collected: Option<Timestamp>,
}

impl SlugWrite for SampleWrite<'_> {
    type Row = Sample;

    async fn write(&self, conn: &mut PgConnection, slug: &str) -> Result<Sample, sqlx::Error> {
        let columns = columns();
        match self.id {
            None => {
                let query = format!(
                    "INSERT INTO samples ({HEADER_INSERT_COLUMNS}, user_id, project_id, collected)
                     VALUES ({})
                     RETURNING {columns}",
                    placeholders(1, HEADER_BINDS + 3)
                );
                bind_header(sqlx::query_as::<_, Sample>(&query), self.values, slug, &self.derived)
                    .bind(self.user_id)
                    .bind(self.project_id)
                    .bind(self.collected)
                    .fetch_one(&mut *conn)
                    .await
            }
            Some(id) => {
                let query = format!(
                    "UPDATE samples SET {HEADER_UPDATE_SET}, collected = $13
                     WHERE id = $1
                     RETURNING {columns}"
                );
                bind_header(
                    sqlx::query_as::<_, Sample>(&query).bind(id),
                    self.values,
                    slug,
                    &self.derived,
                )
                .bind(self.collected)
                .fetch_one(&mut *conn)
                .await
            }
        }
    }
}

impl SampleRepo {
    /// Create a sample owned by `actor`. Requires `edit` on the project.
    ///
    /// Without an explicit slug one is generated from the owner's username,
    /// the collection date and the name.
    pub async fn create(pool: &PgPool, actor: &Actor, input: &CreateSample) -> StoreResult<Sample> {
        let mut errors = dto_errors(input);
        let values = HeaderValues::new(
            &input.name,
            input.description.as_deref(),
            input.parent_id,
            input.geometry.as_deref(),
            input.status,
        );
        values.check(&mut errors);

        let mut tx = pool.begin().await?;
        let target = PermissionTarget {
            entity: EntityRef::new(KIND, None, values.name.clone()),
            project_id: Some(input.project_id),
            term_taxonomy: None,
        };
        PermissionRepo::require_in(&mut tx, actor, &target, &required_action(Mutation::Create))
            .await?;
        object::check_project(&mut tx, input.project_id, &mut errors).await?;

        let parts = sample_slug_parts(
            Some(actor.username.as_str()),
            input.collected.map(|c| c.date_naive()),
            &values.name,
        );
        let plan = plan_for_new(input.slug.as_deref(), parts, &mut errors);
        let derived =
            derive_header(&mut tx, KIND, None, Some(input.project_id), &values, errors).await?;

        let writer = SampleWrite {
            id: None,
            values: &values,
            derived,
            user_id: Some(actor.user_id),
            project_id: input.project_id,
            collected: input.collected,
        };
        let scope = SlugScopeKey {
            project_id: Some(input.project_id),
            taxonomy: None,
        };
        let sample = write_with_slug(&mut tx, KIND, scope, None, &plan, &writer).await?;
        tx.commit().await?;

        tracing::info!(sample_id = sample.id(), project_id = sample.project_id, slug = %sample.header.slug, "Created sample");
        Ok(sample)
    }

    /// Update a sample. Only non-`None` fields in `input` are applied.
    pub async fn update(
        pool: &PgPool,
        actor: &Actor,
        id: DbId,
        input: &UpdateSample,
    ) -> StoreResult<Sample> {
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
        let collected = input.collected.or(current.collected);

        let owner = object::username_of(&mut tx, current.header.user_id).await?;
        let parts = sample_slug_parts(
            owner.as_deref(),
            collected.map(|c| c.date_naive()),
            &values.name,
        );
        let plan = plan_for_update(
            input.slug.as_deref(),
            values.status,
            &current.header.slug,
            parts,
            &mut errors,
        );
        let derived =
            derive_header(&mut tx, KIND, Some(id), Some(current.project_id), &values, errors)
                .await?;
        let moved = values.parent_id != current.header.parent_id;

        let writer = SampleWrite {
            id: Some(id),
            values: &values,
            derived,
            user_id: current.header.user_id,
            project_id: current.project_id,
            collected,
        };
        let scope = SlugScopeKey {
            project_id: Some(current.project_id),
            taxonomy: None,
        };
        let sample = write_with_slug(&mut tx, KIND, scope, Some(id), &plan, &writer).await?;
        if moved {
            object::refresh_descendant_depths(&mut tx, KIND, id).await?;
        }
        tx.commit().await?;

        tracing::info!(sample_id = id, user_id = actor.user_id, "Updated sample");
        Ok(sample)
    }

    /// Find a sample the actor may view.
    pub async fn find_by_id(pool: &PgPool, actor: &Actor, id: DbId) -> StoreResult<Sample> {
        let mut conn = pool.acquire().await?;
        let query = format!("SELECT {} FROM samples WHERE id = $1", columns());
        let sample = sqlx::query_as::<_, Sample>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        PermissionRepo::require_in(&mut conn, actor, &sample.permission_target(), &Action::VIEW)
            .await?;
        Ok(sample)
    }

    /// Find a sample by slug within a project.
    pub async fn find_by_slug(
        pool: &PgPool,
        actor: &Actor,
        project_id: DbId,
        slug: &str,
    ) -> StoreResult<Option<Sample>> {
        let mut conn = pool.acquire().await?;
        let query = format!(
            "SELECT {} FROM samples WHERE project_id = $1 AND slug = $2",
            columns()
        );
        let Some(sample) = sqlx::query_as::<_, Sample>(&query)
            .bind(project_id)
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        PermissionRepo::require_in(&mut conn, actor, &sample.permission_target(), &Action::VIEW)
            .await?;
        Ok(Some(sample))
    }

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

    /// Delete several samples atomically. Returns how many were deleted.
    pub async fn delete_many(
        pool: &PgPool,
        actor: &Actor,
        ids: &[DbId],
        config: &CatalogConfig,
    ) -> StoreResult<u64> {
        object::delete_many(pool, actor, KIND, ids, config).await
    }

    async fn lock(conn: &mut PgConnection, id: DbId) -> StoreResult<Sample> {
        let query = format!("SELECT {} FROM samples WHERE id = $1 FOR UPDATE", columns());
        let sample = sqlx::query_as::<_, Sample>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        Ok(sample)
    }
}
