//! Repository for the `attachments` and `attachment_links` tables.

use lims_core::config::CatalogConfig;
use lims_core::error::{CoreError, EntityRef};
use lims_core::kind::EntityKind;
use lims_core::permissions::{required_action, Action, Actor, Mutation, PermissionTarget};
use lims_core::slug::name_slug_parts;
use lims_core::status::ObjectStatus;
use lims_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::attachment::{
    Attachment, AttachmentLink, CreateAttachment, UpdateAttachment, LINKABLE_KINDS,
};
use crate::models::object::{BaseObject, ObjectRef, HEADER_COLUMNS};
use crate::repositories::object::{
    self, bind_header, derive_header, dto_errors, placeholders, plan_for_new, plan_for_update,
    write_with_slug, DerivedHeader, HeaderValues, SlugScopeKey, SlugWrite, HEADER_BINDS,
    HEADER_INSERT_COLUMNS, HEADER_UPDATE_SET,
};
use crate::repositories::PermissionRepo;

const KIND: EntityKind = EntityKind::Attachment;

const LINK_COLUMNS: &str = "id, attachment_id, entity_kind, entity_id, created_at, modified_at";

/// Provides CRUD operations for attachments and their links.
pub struct AttachmentRepo;

fn columns() -> String {
    format!("{HEADER_COLUMNS}, project_id, file_path, file_hash")
}

/// Same as [`columns`], qualified with table alias `a`.
fn qualified_columns() -> String {
    columns()
        .split(", ")
        .map(|c| format!("a.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

struct AttachmentWrite<'a> {
    id: Option<DbId>,
    values: &'a HeaderValues,
    derived: DerivedHeader,
    user_id: Option<DbId>,
    project_id: DbId,
    file_path: Option<&'a str>,
    file_hash: Option<&'a str>,
}

impl SlugWrite for AttachmentWrite<'_> {
    type Row = Attachment;

    async fn write(&self, conn: &mut PgConnection, slug: &str) -> Result<Attachment, sqlx::Error> {
        let columns = columns();
        match self.id {
            None => {
                let query = format!(
                    "INSERT INTO attachments ({HEADER_INSERT_COLUMNS}, user_id, project_id, file_path, file_hash)
                     VALUES ({})
                     RETURNING {columns}",
                    placeholders(1, HEADER_BINDS + 4)
                );
                bind_header(
                    sqlx::query_as::<_, Attachment>(&query),
                    self.values,
                    slug,
                    &self.derived,
                )
                .bind(self.user_id)
                .bind(self.project_id)
                .bind(self.file_path)
                .bind(self.file_hash)
                .fetch_one(&mut *conn)
                .await
            }
            Some(id) => {
                let query = format!(
                    "UPDATE attachments SET {HEADER_UPDATE_SET}, file_path = $13, file_hash = $14
                     WHERE id = $1
                     RETURNING {columns}"
                );
                bind_header(
                    sqlx::query_as::<_, Attachment>(&query).bind(id),
                    self.values,
                    slug,
                    &self.derived,
                )
                .bind(self.file_path)
                .bind(self.file_hash)
                .fetch_one(&mut *conn)
                .await
            }
        }
    }
}

impl AttachmentRepo {
    /// Create an attachment owned by `actor`. Requires `edit` on the project.
    pub async fn create(
        pool: &PgPool,
        actor: &Actor,
        input: &CreateAttachment,
    ) -> StoreResult<Attachment> {
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

        let plan = plan_for_new(input.slug.as_deref(), name_slug_parts(&values.name), &mut errors);
        let derived =
            derive_header(&mut tx, KIND, None, Some(input.project_id), &values, errors).await?;

        let writer = AttachmentWrite {
            id: None,
            values: &values,
            derived,
            user_id: Some(actor.user_id),
            project_id: input.project_id,
            file_path: input.file_path.as_deref(),
            file_hash: input.file_hash.as_deref(),
        };
        let scope = SlugScopeKey {
            project_id: Some(input.project_id),
            taxonomy: None,
        };
        let attachment = write_with_slug(&mut tx, KIND, scope, None, &plan, &writer).await?;
        tx.commit().await?;

        tracing::info!(attachment_id = attachment.id(), project_id = attachment.project_id, "Created attachment");
        Ok(attachment)
    }

    /// Update an attachment. Only non-`None` fields in `input` are applied.
    pub async fn update(
        pool: &PgPool,
        actor: &Actor,
        id: DbId,
        input: &UpdateAttachment,
    ) -> StoreResult<Attachment> {
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
        let derived =
            derive_header(&mut tx, KIND, Some(id), Some(current.project_id), &values, errors)
                .await?;
        let moved = values.parent_id != current.header.parent_id;

        let writer = AttachmentWrite {
            id: Some(id),
            values: &values,
            derived,
            user_id: current.header.user_id,
            project_id: current.project_id,
            file_path: input.file_path.as_deref().or(current.file_path.as_deref()),
            file_hash: input.file_hash.as_deref().or(current.file_hash.as_deref()),
        };
        let scope = SlugScopeKey {
            project_id: Some(current.project_id),
            taxonomy: None,
        };
        let attachment = write_with_slug(&mut tx, KIND, scope, Some(id), &plan, &writer).await?;
        if moved {
            object::refresh_descendant_depths(&mut tx, KIND, id).await?;
        }
        tx.commit().await?;

        tracing::info!(attachment_id = id, user_id = actor.user_id, "Updated attachment");
        Ok(attachment)
    }

    /// Find an attachment the actor may view.
    pub async fn find_by_id(pool: &PgPool, actor: &Actor, id: DbId) -> StoreResult<Attachment> {
        let mut conn = pool.acquire().await?;
        let query = format!("SELECT {} FROM attachments WHERE id = $1", columns());
        let attachment = sqlx::query_as::<_, Attachment>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        PermissionRepo::require_in(
            &mut conn,
            actor,
            &attachment.permission_target(),
            &Action::VIEW,
        )
        .await?;
        Ok(attachment)
    }

    /// Find an attachment by slug within a project.
    pub async fn find_by_slug(
        pool: &PgPool,
        actor: &Actor,
        project_id: DbId,
        slug: &str,
    ) -> StoreResult<Option<Attachment>> {
        let mut conn = pool.acquire().await?;
        let query = format!(
            "SELECT {} FROM attachments WHERE project_id = $1 AND slug = $2",
            columns()
        );
        let Some(attachment) = sqlx::query_as::<_, Attachment>(&query)
            .bind(project_id)
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        PermissionRepo::require_in(
            &mut conn,
            actor,
            &attachment.permission_target(),
            &Action::VIEW,
        )
        .await?;
        Ok(Some(attachment))
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

    /// Delete several attachments atomically. Returns how many were deleted.
    pub async fn delete_many(
        pool: &PgPool,
        actor: &Actor,
        ids: &[DbId],
        config: &CatalogConfig,
    ) -> StoreResult<u64> {
        object::delete_many(pool, actor, KIND, ids, config).await
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Link an attachment to a sample, term or sample tag of the same project.
    ///
    /// Requires `edit` on the attachment and `view` on the target. Returns
    /// `false` if the link already existed.
    pub async fn link(
        pool: &PgPool,
        actor: &Actor,
        attachment_id: DbId,
        target: ObjectRef,
    ) -> StoreResult<bool> {
        if !LINKABLE_KINDS.contains(&target.kind) {
            return Err(CoreError::field(
                "entity_kind",
                format!("Attachments cannot be linked to {}", target.kind),
            )
            .into());
        }

        let mut conn = pool.acquire().await?;
        let attachment = PermissionRepo::target_of_in(&mut conn, KIND, attachment_id).await?;
        PermissionRepo::require_in(&mut conn, actor, &attachment, &Action::EDIT).await?;
        let entity = PermissionRepo::target_of_in(&mut conn, target.kind, target.id).await?;
        PermissionRepo::require_in(&mut conn, actor, &entity, &Action::VIEW).await?;
        if entity.project_id.is_some() && entity.project_id != attachment.project_id {
            return Err(CoreError::field(
                "entity",
                "Linked records must belong to the attachment's project",
            )
            .into());
        }

        let result = sqlx::query(
            "INSERT INTO attachment_links (attachment_id, entity_kind, entity_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (attachment_id, entity_kind, entity_id) DO NOTHING",
        )
        .bind(attachment_id)
        .bind(target.kind.name())
        .bind(target.id)
        .execute(&mut *conn)
        .await?;
        let added = result.rows_affected() > 0;
        if added {
            tracing::info!(attachment_id, kind = %target.kind, entity_id = target.id, "Linked attachment");
        }
        Ok(added)
    }

    /// Remove a link. Requires `edit` on the attachment.
    pub async fn unlink(
        pool: &PgPool,
        actor: &Actor,
        attachment_id: DbId,
        target: ObjectRef,
    ) -> StoreResult<bool> {
        let mut conn = pool.acquire().await?;
        object::require_on(&mut conn, actor, KIND, attachment_id, &Action::EDIT).await?;
        let result = sqlx::query(
            "DELETE FROM attachment_links
             WHERE attachment_id = $1 AND entity_kind = $2 AND entity_id = $3",
        )
        .bind(attachment_id)
        .bind(target.kind.name())
        .bind(target.id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Links of one attachment, oldest first.
    pub async fn links_of(
        pool: &PgPool,
        actor: &Actor,
        attachment_id: DbId,
    ) -> StoreResult<Vec<AttachmentLink>> {
        let mut conn = pool.acquire().await?;
        object::require_on(&mut conn, actor, KIND, attachment_id, &Action::VIEW).await?;
        let query = format!(
            "SELECT {LINK_COLUMNS} FROM attachment_links WHERE attachment_id = $1 ORDER BY id"
        );
        let links = sqlx::query_as::<_, AttachmentLink>(&query)
            .bind(attachment_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(links)
    }

    /// Attachments linked to `target`, oldest link first.
    pub async fn attachments_of(
        pool: &PgPool,
        actor: &Actor,
        target: ObjectRef,
    ) -> StoreResult<Vec<Attachment>> {
        let mut conn = pool.acquire().await?;
        object::require_on(&mut conn, actor, target.kind, target.id, &Action::VIEW).await?;
        let query = format!(
            "SELECT {} FROM attachments a
             JOIN attachment_links l ON l.attachment_id = a.id
             WHERE l.entity_kind = $1 AND l.entity_id = $2
             ORDER BY l.id",
            qualified_columns()
        );
        let attachments = sqlx::query_as::<_, Attachment>(&query)
            .bind(target.kind.name())
            .bind(target.id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(attachments)
    }

    async fn lock(conn: &mut PgConnection, id: DbId) -> StoreResult<Attachment> {
        let query = format!(
            "SELECT {} FROM attachments WHERE id = $1 FOR UPDATE",
            columns()
        );
        let attachment = sqlx::query_as::<_, Attachment>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        Ok(attachment)
    }
}
