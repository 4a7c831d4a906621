//! Repository for the `terms` table.
//!
//! Terms are the controlled vocabulary: tag keys, taxonomies and the
//! validator/widget specs applied to tag values.

use lims_core::config::CatalogConfig;
use lims_core::error::{CoreError, EntityRef, ValidationErrors};
use lims_core::kind::EntityKind;
use lims_core::permissions::{required_action, Action, Actor, Mutation, PermissionTarget};
use lims_core::plugins::PluginRegistry;
use lims_core::slug::name_slug_parts;
use lims_core::status::ObjectStatus;
use lims_core::term::{normalize_key, ResolvedTerm, TermKey, TermRef, TermSpec};
use lims_core::types::DbId;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::{BaseObject, HEADER_COLUMNS};
use crate::models::term::{CreateTerm, Term, UpdateTerm};
use crate::repositories::object::{
    self, absorb, bind_header, derive_header, dto_errors, placeholders, plan_for_new,
    plan_for_update, write_with_slug, DerivedHeader, HeaderValues, SlugScopeKey, SlugWrite,
    HEADER_BINDS, HEADER_INSERT_COLUMNS, HEADER_UPDATE_SET,
};
use crate::repositories::PermissionRepo;

const KIND: EntityKind = EntityKind::Term;

/// Provides CRUD operations and key resolution for terms.
pub struct TermRepo;

fn columns() -> String {
    format!(
        "{HEADER_COLUMNS}, project_id, taxonomy, measured, validators, input_widget, output_widget"
    )
}

struct TermWrite<'a> {
    id: Option<DbId>,
    values: &'a HeaderValues,
    derived: DerivedHeader,
    user_id: Option<DbId>,
    project_id: Option<DbId>,
    taxonomy: &'a str,
    measured: bool,
    spec: &'a TermSpec,
}

impl SlugWrite for TermWrite<'_> {
    type Row = Term;

    async fn write(&self, conn: &mut PgConnection, slug: &str) -> Result<Term, sqlx::Error> {
        let columns = columns();
        let validators = Json(&self.spec.validators);
        let input_widget = self.spec.input_widget.as_ref().map(Json);
        let output_widget = self.spec.output_widget.as_ref().map(Json);
        match self.id {
            None => {
                let query = format!(
                    "INSERT INTO terms ({HEADER_INSERT_COLUMNS}, user_id, project_id, taxonomy,
                                        measured, validators, input_widget, output_widget)
                     VALUES ({})
                     RETURNING {columns}",
                    placeholders(1, HEADER_BINDS + 7)
                );
                bind_header(sqlx::query_as::<_, Term>(&query), self.values, slug, &self.derived)
                    .bind(self.user_id)
                    .bind(self.project_id)
                    .bind(self.taxonomy)
                    .bind(self.measured)
                    .bind(validators)
                    .bind(input_widget)
                    .bind(output_widget)
                    .fetch_one(&mut *conn)
                    .await
            }
            Some(id) => {
                let query = format!(
                    "UPDATE terms SET {HEADER_UPDATE_SET}, measured = $13, validators = $14,
                                      input_widget = $15, output_widget = $16
                     WHERE id = $1
                     RETURNING {columns}"
                );
                bind_header(
                    sqlx::query_as::<_, Term>(&query).bind(id),
                    self.values,
                    slug,
                    &self.derived,
                )
                .bind(self.measured)
                .bind(validators)
                .bind(input_widget)
                .bind(output_widget)
                .fetch_one(&mut *conn)
                .await
            }
        }
    }
}

/// Check a spec against the registry; every broken plugin is a field error.
fn check_spec(spec: &TermSpec, registry: &PluginRegistry, errors: &mut ValidationErrors) -> StoreResult<()> {
    if let Err(err) = spec.resolve(registry, true) {
        absorb(errors, err)?;
    }
    Ok(())
}

impl TermRepo {
    /// Create a term. Requires `edit` on the project; global terms and the
    /// `Project` taxonomy are staff-only.
    pub async fn create(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        input: &CreateTerm,
    ) -> StoreResult<Term> {
        let mut tx = pool.begin().await?;
        let target = PermissionTarget {
            entity: EntityRef::new(KIND, None, input.name.clone()),
            project_id: input.project_id,
            term_taxonomy: Some(input.taxonomy.trim().to_string()),
        };
        PermissionRepo::require_in(&mut tx, actor, &target, &required_action(Mutation::Create))
            .await?;
        let term = Self::insert_in(&mut tx, actor, registry, input).await?;
        tx.commit().await?;
        Ok(term)
    }

    /// Insert without a permission check.
    async fn insert_in(
        conn: &mut PgConnection,
        actor: &Actor,
        registry: &PluginRegistry,
        input: &CreateTerm,
    ) -> StoreResult<Term> {
        let mut errors = dto_errors(input);
        let values = HeaderValues::new(
            &input.name,
            input.description.as_deref(),
            input.parent_id,
            input.geometry.as_deref(),
            input.status,
        );
        values.check(&mut errors);
        let taxonomy = input.taxonomy.trim();
        if taxonomy.is_empty() {
            errors.add("taxonomy", "This field cannot be blank");
        }
        check_spec(&input.spec, registry, &mut errors)?;
        if let Some(project_id) = input.project_id {
            object::check_project(conn, project_id, &mut errors).await?;
        }

        let plan = plan_for_new(input.slug.as_deref(), name_slug_parts(&values.name), &mut errors);
        let derived = derive_header(conn, KIND, None, input.project_id, &values, errors).await?;

        let writer = TermWrite {
            id: None,
            values: &values,
            derived,
            user_id: Some(actor.user_id),
            project_id: input.project_id,
            taxonomy,
            measured: input.measured,
            spec: &input.spec,
        };
        let scope = SlugScopeKey {
            project_id: input.project_id,
            taxonomy: Some(taxonomy),
        };
        let term = write_with_slug(conn, KIND, scope, None, &plan, &writer).await?;

        tracing::info!(term_id = term.id(), project_id = ?term.project_id, taxonomy = %term.taxonomy, slug = %term.header.slug, "Created term");
        Ok(term)
    }

    /// Update a term. Project and taxonomy never change.
    pub async fn update(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        id: DbId,
        input: &UpdateTerm,
    ) -> StoreResult<Term> {
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
        let spec = match &input.spec {
            Some(spec) => {
                check_spec(spec, registry, &mut errors)?;
                spec.clone()
            }
            None => current.spec(),
        };
        let plan = plan_for_update(
            input.slug.as_deref(),
            values.status,
            &current.header.slug,
            name_slug_parts(&values.name),
            &mut errors,
        );
        let derived =
            derive_header(&mut tx, KIND, Some(id), current.project_id, &values, errors).await?;
        let moved = values.parent_id != current.header.parent_id;

        let writer = TermWrite {
            id: Some(id),
            values: &values,
            derived,
            user_id: current.header.user_id,
            project_id: current.project_id,
            taxonomy: &current.taxonomy,
            measured: input.measured.unwrap_or(current.measured),
            spec: &spec,
        };
        let scope = SlugScopeKey {
            project_id: current.project_id,
            taxonomy: Some(&current.taxonomy),
        };
        let term = write_with_slug(&mut tx, KIND, scope, Some(id), &plan, &writer).await?;
        if moved {
            object::refresh_descendant_depths(&mut tx, KIND, id).await?;
        }
        tx.commit().await?;

        tracing::info!(term_id = id, user_id = actor.user_id, "Updated term");
        Ok(term)
    }

    /// Find a term the actor may view.
    pub async fn find_by_id(pool: &PgPool, actor: &Actor, id: DbId) -> StoreResult<Term> {
        let mut conn = pool.acquire().await?;
        let term = Self::load(&mut conn, id).await?;
        PermissionRepo::require_in(&mut conn, actor, &term.permission_target(), &Action::VIEW)
            .await?;
        Ok(term)
    }

    /// Find a term by slug within `(project, taxonomy)`; `None` project means global.
    pub async fn find_by_slug(
        pool: &PgPool,
        actor: &Actor,
        project_id: Option<DbId>,
        taxonomy: &str,
        slug: &str,
    ) -> StoreResult<Option<Term>> {
        let mut conn = pool.acquire().await?;
        let query = format!(
            "SELECT {} FROM terms
             WHERE COALESCE(project_id, 0) = COALESCE($1, 0) AND taxonomy = $2 AND slug = $3",
            columns()
        );
        let Some(term) = sqlx::query_as::<_, Term>(&query)
            .bind(project_id)
            .bind(taxonomy)
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        PermissionRepo::require_in(&mut conn, actor, &term.permission_target(), &Action::VIEW)
            .await?;
        Ok(Some(term))
    }

    /// Terms of one taxonomy usable in a project: its own, then the global ones.
    pub async fn list_for_taxonomy(
        pool: &PgPool,
        actor: &Actor,
        project_id: Option<DbId>,
        taxonomy: &str,
    ) -> StoreResult<Vec<Term>> {
        let mut conn = pool.acquire().await?;
        let target = PermissionTarget {
            entity: EntityRef::new(KIND, None, taxonomy),
            project_id,
            term_taxonomy: Some(taxonomy.to_string()),
        };
        PermissionRepo::require_in(&mut conn, actor, &target, &Action::VIEW).await?;
        let query = format!(
            "SELECT {} FROM terms
             WHERE taxonomy = $1 AND (project_id = $2 OR project_id IS NULL)
             ORDER BY project_id NULLS LAST, name, id",
            columns()
        );
        let terms = sqlx::query_as::<_, Term>(&query)
            .bind(taxonomy)
            .bind(project_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(terms)
    }

    /// Look up a term by textual key: slug first, then exact name. A project
    /// term wins over a global one.
    pub async fn lookup(
        pool: &PgPool,
        actor: &Actor,
        project_id: Option<DbId>,
        taxonomy: &str,
        key: &str,
    ) -> StoreResult<Option<Term>> {
        let Some(key) = normalize_key(key) else {
            return Ok(None);
        };
        let mut conn = pool.acquire().await?;
        let Some(term) = Self::lookup_in(&mut conn, project_id, taxonomy, &key).await? else {
            return Ok(None);
        };
        PermissionRepo::require_in(&mut conn, actor, &term.permission_target(), &Action::VIEW)
            .await?;
        Ok(Some(term))
    }

    pub(crate) async fn lookup_in(
        conn: &mut PgConnection,
        project_id: Option<DbId>,
        taxonomy: &str,
        key: &TermKey,
    ) -> Result<Option<Term>, sqlx::Error> {
        for (column, value) in [("slug", &key.slug), ("name", &key.name)] {
            let query = format!(
                "SELECT {} FROM terms
                 WHERE taxonomy = $1 AND (project_id = $2 OR project_id IS NULL) AND {column} = $3
                 ORDER BY project_id NULLS LAST, id
                 LIMIT 1",
                columns()
            );
            let found = sqlx::query_as::<_, Term>(&query)
                .bind(taxonomy)
                .bind(project_id)
                .bind(value)
                .fetch_optional(&mut *conn)
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Find a term by key or create it. Requires `edit` on the vocabulary,
    /// the same as [`Self::create`].
    pub async fn get_or_create(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        key: &str,
        project_id: Option<DbId>,
        taxonomy: &str,
    ) -> StoreResult<Option<Term>> {
        let mut tx = pool.begin().await?;
        let target = PermissionTarget {
            entity: EntityRef::new(KIND, None, key.trim()),
            project_id,
            term_taxonomy: Some(taxonomy.to_string()),
        };
        PermissionRepo::require_in(&mut tx, actor, &target, &required_action(Mutation::Create))
            .await?;
        let term = Self::get_or_create_in(
            &mut tx,
            actor,
            registry,
            &TermRef::from(key),
            project_id,
            taxonomy,
        )
        .await?;
        tx.commit().await?;
        Ok(term)
    }

    /// Resolve a tag key to a term, creating one from a textual key that
    /// matches nothing. Blank keys yield `None`.
    ///
    /// Implicit creation needs no permission beyond the caller's right to
    /// write the tag. Concurrent callers with the same key are serialized
    /// by a transaction-scoped advisory lock.
    pub(crate) async fn get_or_create_in(
        conn: &mut PgConnection,
        actor: &Actor,
        registry: &PluginRegistry,
        key: &TermRef,
        project_id: Option<DbId>,
        taxonomy: &str,
    ) -> StoreResult<Option<Term>> {
        let key = match key {
            TermRef::Id(id) => return Ok(Some(Self::load(conn, *id).await?)),
            TermRef::Key(raw) => match normalize_key(raw) {
                Some(key) => key,
                None => return Ok(None),
            },
        };

        let lock_key = format!("terms:{}:{taxonomy}:{}", project_id.unwrap_or(0), key.slug);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&lock_key)
            .execute(&mut *conn)
            .await?;

        if let Some(term) = Self::lookup_in(conn, project_id, taxonomy, &key).await? {
            return Ok(Some(term));
        }

        let input = CreateTerm::new(project_id, taxonomy, &key.name);
        let term = Self::insert_in(conn, actor, registry, &input).await?;
        tracing::debug!(term_id = term.id(), key = %key.name, "Created term for tag key");
        Ok(Some(term))
    }

    /// Instantiate a term's plugins, dropping broken specs.
    pub fn resolve(term: &Term, registry: &PluginRegistry) -> StoreResult<ResolvedTerm> {
        let plugins = term.spec().resolve(registry, false)?;
        Ok(ResolvedTerm {
            id: term.id(),
            slug: term.header.slug.clone(),
            name: term.header.name.clone(),
            taxonomy: term.taxonomy.clone(),
            project_id: term.project_id,
            validators: plugins.validators,
            input_widget: plugins.input_widget,
            output_widget: plugins.output_widget,
        })
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

    /// Delete several terms atomically. Returns how many were deleted.
    pub async fn delete_many(
        pool: &PgPool,
        actor: &Actor,
        ids: &[DbId],
        config: &CatalogConfig,
    ) -> StoreResult<u64> {
        object::delete_many(pool, actor, KIND, ids, config).await
    }

    pub(crate) async fn load(conn: &mut PgConnection, id: DbId) -> StoreResult<Term> {
        let query = format!("SELECT {} FROM terms WHERE id = $1", columns());
        let term = sqlx::query_as::<_, Term>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        Ok(term)
    }

    async fn lock(conn: &mut PgConnection, id: DbId) -> StoreResult<Term> {
        let query = format!("SELECT {} FROM terms WHERE id = $1 FOR UPDATE", columns());
        let term = sqlx::query_as::<_, Term>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CoreError::NotFound {
                entity: KIND.name(),
                id,
            })?;
        Ok(term)
    }
}
