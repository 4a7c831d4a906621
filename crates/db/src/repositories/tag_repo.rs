//! Repository for the tag tables (`project_tags`, `sample_tags`,
//! `attachment_tags`, `term_tags`, `sample_tag_tags`).
//!
//! A tag is a `(key Term, value)` pair hung off one object. Keys resolve
//! through [`TermRepo`]; values run through the key's validators and get
//! a cached numeric form for sorting.

use std::collections::BTreeMap;

use lims_core::error::CoreError;
use lims_core::kind::EntityKind;
use lims_core::permissions::{Action, Actor, PermissionTarget};
use lims_core::plugins::PluginRegistry;
use lims_core::tag::{check_key_project, parse_numeric, TagPair};
use lims_core::term::{normalize_key, TermRef};
use lims_core::types::DbId;
use sqlx::{Connection, PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::{BaseObject, ObjectRef};
use crate::models::tag::{Tag, TagWithKey, TAG_COLUMNS};
use crate::models::term::Term;
use crate::repositories::{PermissionRepo, TermRepo};

/// Rows per batch in [`TagRepo::recompute_numeric_values`].
const RECOMPUTE_BATCH: i64 = 1000;

/// Tag reads and writes for every taggable kind.
pub struct TagRepo;

/// The tagged object, resolved and permission-checked.
struct TagOwner {
    object: ObjectRef,
    tag_kind: EntityKind,
    target: PermissionTarget,
}

impl TagOwner {
    fn table(&self) -> &'static str {
        self.tag_kind.table()
    }

    fn taxonomy<'a>(&self, taxonomy: Option<&'a str>) -> &'a str {
        taxonomy.unwrap_or(self.tag_kind.default_taxonomy())
    }
}

fn qualified_tag_columns() -> String {
    TAG_COLUMNS
        .split(", ")
        .map(|c| format!("t.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl TagRepo {
    /// Add one tag per pair. Pairs with a blank key or value are skipped.
    ///
    /// Each tag is written in its own savepoint: a failing pair stops the
    /// batch and is rolled back, earlier pairs stay applied. Callers wanting
    /// all-or-nothing use [`Self::add_tags_in`] inside their own transaction.
    pub async fn add_tags(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        object: ObjectRef,
        pairs: &[TagPair],
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<Tag>> {
        let mut conn = pool.acquire().await?;
        Self::add_tags_in(&mut conn, actor, registry, object, pairs, taxonomy).await
    }

    pub async fn add_tags_in(
        conn: &mut PgConnection,
        actor: &Actor,
        registry: &PluginRegistry,
        object: ObjectRef,
        pairs: &[TagPair],
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<Tag>> {
        let owner = Self::owner_in(conn, actor, object, &Action::EDIT).await?;
        let taxonomy = owner.taxonomy(taxonomy);

        let mut added = Vec::new();
        for pair in pairs {
            let Some(value) = pair.effective_value() else {
                continue;
            };
            let mut savepoint = conn.begin().await?;
            match Self::write_pair(&mut savepoint, actor, registry, &owner, taxonomy, pair, value, false)
                .await
            {
                Ok(tag) => {
                    savepoint.commit().await?;
                    added.extend(tag);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    return Err(err);
                }
            }
        }
        Ok(added)
    }

    /// Replace every tag of `taxonomy` on the object with `pairs`, atomically.
    pub async fn set_tags(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        object: ObjectRef,
        pairs: &[TagPair],
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<Tag>> {
        let mut tx = pool.begin().await?;
        let owner = Self::owner_in(&mut tx, actor, object, &Action::EDIT).await?;
        let taxonomy = owner.taxonomy(taxonomy);

        let query = format!(
            "SELECT t.id FROM {} t JOIN terms k ON k.id = t.key_id
             WHERE t.object_id = $1 AND k.taxonomy = $2",
            owner.table()
        );
        let existing: Vec<DbId> = sqlx::query_scalar(&query)
            .bind(object.id)
            .bind(taxonomy)
            .fetch_all(&mut *tx)
            .await?;
        let removed = delete_ids(&mut tx, owner.tag_kind, &existing).await?;

        let added =
            Self::add_tags_in(&mut tx, actor, registry, object, pairs, Some(taxonomy)).await?;
        if removed > 0 && added.is_empty() {
            touch(&mut tx, object).await?;
        }
        tx.commit().await?;

        tracing::info!(kind = %object.kind, id = object.id, taxonomy, removed, added = added.len(), "Replaced tags");
        Ok(added)
    }

    /// Merge `pairs` into the object's tags: an existing key has its last tag
    /// updated, a blank value deletes every tag with that key, and a new key
    /// is added. Applied per pair like [`Self::add_tags`].
    pub async fn update_tags(
        pool: &PgPool,
        actor: &Actor,
        registry: &PluginRegistry,
        object: ObjectRef,
        pairs: &[TagPair],
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<Tag>> {
        let mut conn = pool.acquire().await?;
        let owner = Self::owner_in(&mut conn, actor, object, &Action::EDIT).await?;
        let taxonomy = owner.taxonomy(taxonomy);

        let mut written = Vec::new();
        for pair in pairs {
            let mut savepoint = conn.begin().await?;
            let result = match pair.effective_value() {
                Some(value) => {
                    Self::write_pair(&mut savepoint, actor, registry, &owner, taxonomy, pair, value, true)
                        .await
                }
                None => Self::clear_key(&mut savepoint, &owner, taxonomy, &pair.key)
                    .await
                    .map(|_| None),
            };
            match result {
                Ok(tag) => {
                    savepoint.commit().await?;
                    written.extend(tag);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    return Err(err);
                }
            }
        }
        Ok(written)
    }

    /// The last tag with `key`, or `None` when the key or the tag is missing.
    pub async fn get_tag(
        pool: &PgPool,
        actor: &Actor,
        object: ObjectRef,
        key: &TermRef,
        taxonomy: Option<&str>,
    ) -> StoreResult<Option<Tag>> {
        let mut tags = Self::get_tag_list(pool, actor, object, key, taxonomy).await?;
        Ok(tags.pop())
    }

    /// Every tag with `key`, in insertion order.
    pub async fn get_tag_list(
        pool: &PgPool,
        actor: &Actor,
        object: ObjectRef,
        key: &TermRef,
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<Tag>> {
        let mut conn = pool.acquire().await?;
        let owner = Self::owner_in(&mut conn, actor, object, &Action::VIEW).await?;
        let taxonomy = owner.taxonomy(taxonomy);
        let Some(term) = find_key(&mut conn, &owner, taxonomy, key).await? else {
            return Ok(Vec::new());
        };
        let query = format!(
            "SELECT {TAG_COLUMNS} FROM {} WHERE object_id = $1 AND key_id = $2 ORDER BY id",
            owner.table()
        );
        let tags = sqlx::query_as::<_, Tag>(&query)
            .bind(object.id)
            .bind(term.id())
            .fetch_all(&mut *conn)
            .await?;
        Ok(tags)
    }

    /// All tags of the object whose key is in `taxonomy`, in insertion order.
    pub async fn get_tags(
        pool: &PgPool,
        actor: &Actor,
        object: ObjectRef,
        taxonomy: Option<&str>,
    ) -> StoreResult<Vec<TagWithKey>> {
        let mut conn = pool.acquire().await?;
        let owner = Self::owner_in(&mut conn, actor, object, &Action::VIEW).await?;
        let taxonomy = owner.taxonomy(taxonomy);
        let query = format!(
            "SELECT {}, k.slug AS key_slug, k.name AS key_name, k.taxonomy AS key_taxonomy
             FROM {} t JOIN terms k ON k.id = t.key_id
             WHERE t.object_id = $1 AND k.taxonomy = $2
             ORDER BY t.id",
            qualified_tag_columns(),
            owner.table()
        );
        let tags = sqlx::query_as::<_, TagWithKey>(&query)
            .bind(object.id)
            .bind(taxonomy)
            .fetch_all(&mut *conn)
            .await?;
        Ok(tags)
    }

    /// Key slug to value; for duplicated keys the last tag wins.
    pub async fn tag_map(
        pool: &PgPool,
        actor: &Actor,
        object: ObjectRef,
        taxonomy: Option<&str>,
    ) -> StoreResult<BTreeMap<String, String>> {
        let tags = Self::get_tags(pool, actor, object, taxonomy).await?;
        Ok(tags
            .into_iter()
            .map(|t| (t.key_slug, t.tag.value))
            .collect())
    }

    /// Delete one tag by id. Requires `edit` on the tagged object.
    pub async fn delete_tag(
        pool: &PgPool,
        actor: &Actor,
        tag_kind: EntityKind,
        id: DbId,
    ) -> StoreResult<()> {
        if !tag_kind.is_tag() {
            return Err(CoreError::field("kind", format!("{tag_kind} is not a tag kind")).into());
        }
        let mut tx = pool.begin().await?;
        let target = PermissionRepo::target_of_in(&mut tx, tag_kind, id).await?;
        PermissionRepo::require_in(&mut tx, actor, &target, &Action::EDIT).await?;

        let object_id: DbId = sqlx::query_scalar(&format!(
            "SELECT object_id FROM {} WHERE id = $1",
            tag_kind.table()
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        delete_ids(&mut tx, tag_kind, &[id]).await?;
        if let Some(owner_kind) = tag_kind.owner() {
            touch(&mut tx, ObjectRef::new(owner_kind, object_id)).await?;
        }
        tx.commit().await?;

        tracing::info!(kind = %tag_kind, id, user_id = actor.user_id, "Deleted tag");
        Ok(())
    }

    /// Recompute the cached numeric value of every tag of `tag_kind`.
    /// Returns how many rows changed.
    pub async fn recompute_numeric_values(pool: &PgPool, tag_kind: EntityKind) -> StoreResult<u64> {
        if !tag_kind.is_tag() {
            return Err(CoreError::field("kind", format!("{tag_kind} is not a tag kind")).into());
        }
        let table = tag_kind.table();
        let select = format!(
            "SELECT id, value, numeric_value FROM {table} WHERE id > $1 ORDER BY id LIMIT $2"
        );
        let update = format!(
            "UPDATE {table} t SET numeric_value = u.numeric_value
             FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[]) AS u(id, numeric_value)
             WHERE t.id = u.id"
        );

        let mut last_id: DbId = 0;
        let mut changed = 0;
        loop {
            let rows: Vec<(DbId, String, Option<f64>)> = sqlx::query_as(&select)
                .bind(last_id)
                .bind(RECOMPUTE_BATCH)
                .fetch_all(pool)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            last_id = last.0;

            let (ids, values): (Vec<DbId>, Vec<Option<f64>>) = rows
                .iter()
                .filter_map(|(id, value, cached)| {
                    let fresh = parse_numeric(value);
                    (fresh != *cached).then_some((*id, fresh))
                })
                .unzip();
            if ids.is_empty() {
                continue;
            }
            let result = sqlx::query(&update)
                .bind(&ids)
                .bind(&values)
                .execute(pool)
                .await?;
            changed += result.rows_affected();
        }

        tracing::info!(kind = %tag_kind, changed, "Recomputed numeric tag values");
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn owner_in(
        conn: &mut PgConnection,
        actor: &Actor,
        object: ObjectRef,
        action: &Action,
    ) -> StoreResult<TagOwner> {
        let tag_kind = object.kind.tag_kind().ok_or_else(|| {
            CoreError::field("kind", format!("{} cannot be tagged", object.kind))
        })?;
        let target = PermissionRepo::target_of_in(conn, object.kind, object.id).await?;
        PermissionRepo::require_in(conn, actor, &target, action).await?;
        Ok(TagOwner {
            object,
            tag_kind,
            target,
        })
    }

    /// Validate and store one pair. With `merge`, the last tag with the same
    /// key is updated instead of adding another. `None` for a blank key.
    #[allow(clippy::too_many_arguments)]
    async fn write_pair(
        conn: &mut PgConnection,
        actor: &Actor,
        registry: &PluginRegistry,
        owner: &TagOwner,
        taxonomy: &str,
        pair: &TagPair,
        value: &str,
        merge: bool,
    ) -> StoreResult<Option<Tag>> {
        let Some(term) = TermRepo::get_or_create_in(
            conn,
            actor,
            registry,
            &pair.key,
            owner.target.project_id,
            taxonomy,
        )
        .await?
        else {
            return Ok(None);
        };

        let resolved = TermRepo::resolve(&term, registry)?;
        let mut errors = resolved.validate_value(&resolved.slug, value);
        check_key_project(&mut errors, owner.target.project_id, term.project_id);
        errors.into_result()?;

        let numeric_value = parse_numeric(value);
        let existing: Option<DbId> = if merge {
            sqlx::query_scalar(&format!(
                "SELECT id FROM {} WHERE object_id = $1 AND key_id = $2 ORDER BY id DESC LIMIT 1",
                owner.table()
            ))
            .bind(owner.object.id)
            .bind(term.id())
            .fetch_optional(&mut *conn)
            .await?
        } else {
            None
        };

        let tag = match existing {
            Some(id) => {
                let query = format!(
                    "UPDATE {} SET value = $2, comment = COALESCE($3, comment), numeric_value = $4,
                                   user_id = $5, modified_at = now()
                     WHERE id = $1
                     RETURNING {TAG_COLUMNS}",
                    owner.table()
                );
                sqlx::query_as::<_, Tag>(&query)
                    .bind(id)
                    .bind(value)
                    .bind(pair.comment.as_deref())
                    .bind(numeric_value)
                    .bind(actor.user_id)
                    .fetch_one(&mut *conn)
                    .await?
            }
            None => {
                let query = format!(
                    "INSERT INTO {} (object_id, key_id, value, comment, numeric_value, user_id)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {TAG_COLUMNS}",
                    owner.table()
                );
                sqlx::query_as::<_, Tag>(&query)
                    .bind(owner.object.id)
                    .bind(term.id())
                    .bind(value)
                    .bind(pair.comment.as_deref())
                    .bind(numeric_value)
                    .bind(actor.user_id)
                    .fetch_one(&mut *conn)
                    .await?
            }
        };
        touch(conn, owner.object).await?;

        tracing::debug!(kind = %owner.tag_kind, id = tag.id, object_id = owner.object.id, key = %term.header.slug, "Wrote tag");
        Ok(Some(tag))
    }

    /// Delete every tag on the owner keyed by `key`; a key that names no term is a no-op.
    async fn clear_key(
        conn: &mut PgConnection,
        owner: &TagOwner,
        taxonomy: &str,
        key: &TermRef,
    ) -> StoreResult<u64> {
        let Some(term) = find_key(conn, owner, taxonomy, key).await? else {
            return Ok(0);
        };
        let ids: Vec<DbId> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE object_id = $1 AND key_id = $2",
            owner.table()
        ))
        .bind(owner.object.id)
        .bind(term.id())
        .fetch_all(&mut *conn)
        .await?;
        let removed = delete_ids(conn, owner.tag_kind, &ids).await?;
        if removed > 0 {
            touch(conn, owner.object).await?;
        }
        Ok(removed)
    }
}

/// Resolve a key without creating a term.
async fn find_key(
    conn: &mut PgConnection,
    owner: &TagOwner,
    taxonomy: &str,
    key: &TermRef,
) -> StoreResult<Option<Term>> {
    match key {
        TermRef::Id(id) => Ok(Some(TermRepo::load(conn, *id).await?)),
        TermRef::Key(raw) => match normalize_key(raw) {
            Some(key) => {
                Ok(TermRepo::lookup_in(conn, owner.target.project_id, taxonomy, &key).await?)
            }
            None => Ok(None),
        },
    }
}

/// Delete tags by id, dropping attachment links to sample tags first.
async fn delete_ids(
    conn: &mut PgConnection,
    tag_kind: EntityKind,
    ids: &[DbId],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    if tag_kind == EntityKind::SampleTag {
        sqlx::query("DELETE FROM attachment_links WHERE entity_kind = $1 AND entity_id = ANY($2)")
            .bind(tag_kind.name())
            .bind(ids)
            .execute(&mut *conn)
            .await?;
    }
    let query = format!("DELETE FROM {} WHERE id = ANY($1)", tag_kind.table());
    let result = sqlx::query(&query).bind(ids).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Bump `modified_at` on the tagged object and every owner above it.
async fn touch(conn: &mut PgConnection, object: ObjectRef) -> Result<(), sqlx::Error> {
    let mut current = Some(object);
    while let Some(obj) = current {
        if obj.kind.is_tag() {
            let query = format!(
                "UPDATE {} SET modified_at = now() WHERE id = $1 RETURNING object_id",
                obj.kind.table()
            );
            let parent: Option<DbId> = sqlx::query_scalar(&query)
                .bind(obj.id)
                .fetch_optional(&mut *conn)
                .await?;
            current = obj.kind.owner().zip(parent).map(|(k, id)| ObjectRef::new(k, id));
        } else {
            let query = format!(
                "UPDATE {} SET modified_at = now() WHERE id = $1",
                obj.kind.table()
            );
            sqlx::query(&query).bind(obj.id).execute(&mut *conn).await?;
            current = None;
        }
    }
    Ok(())
}
