//! Default and personal projects, and the grants every user starts with.

use lims_core::config::CatalogConfig;
use lims_core::kind::EntityKind;
use lims_core::status::ObjectStatus;
use lims_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreResult;
use crate::models::object::{BaseObject, HEADER_COLUMNS};
use crate::models::project::Project;
use crate::models::user::User;
use crate::repositories::PermissionRepo;

/// Slug of the project shared by every user.
pub const DEFAULT_PROJECT_SLUG: &str = "default_project";

pub const DEFAULT_PROJECT_NAME: &str = "Default Project";

/// Slug of the personal project of user `user_id`.
pub fn user_project_slug(user_id: DbId) -> String {
    format!("user_project_{user_id}")
}

/// Idempotent setup of the shared and per-user projects.
pub struct BootstrapRepo;

impl BootstrapRepo {
    /// The shared default project, created published if missing.
    pub async fn ensure_default_project(pool: &PgPool) -> StoreResult<Project> {
        let mut conn = pool.acquire().await?;
        Self::ensure_project_in(&mut conn, DEFAULT_PROJECT_SLUG, DEFAULT_PROJECT_NAME, None).await
    }

    /// The personal project of `user`, created if missing.
    pub async fn ensure_user_project(pool: &PgPool, user: &User) -> StoreResult<Project> {
        let mut conn = pool.acquire().await?;
        Self::ensure_project_in(
            &mut conn,
            &user_project_slug(user.id),
            &format!("User Project: {}", user.username),
            Some(user.id),
        )
        .await
    }

    /// Ensure both projects exist and grant `user` the configured default
    /// actions on every base kind in each. Safe to run repeatedly.
    pub async fn bootstrap_user(
        pool: &PgPool,
        user: &User,
        config: &CatalogConfig,
    ) -> StoreResult<(Project, Project)> {
        let mut tx = pool.begin().await?;
        let shared =
            Self::ensure_project_in(&mut tx, DEFAULT_PROJECT_SLUG, DEFAULT_PROJECT_NAME, None)
                .await?;
        let personal = Self::ensure_project_in(
            &mut tx,
            &user_project_slug(user.id),
            &format!("User Project: {}", user.username),
            Some(user.id),
        )
        .await?;

        let mut granted = 0;
        for project in [&shared, &personal] {
            for kind in EntityKind::BASE {
                for action in &config.default_actions {
                    if PermissionRepo::grant_in(&mut tx, user.id, project.id(), kind, action).await? {
                        granted += 1;
                    }
                }
            }
        }
        tx.commit().await?;

        tracing::info!(user_id = user.id, granted, "Bootstrapped user");
        Ok((shared, personal))
    }

    async fn ensure_project_in(
        conn: &mut PgConnection,
        slug: &str,
        name: &str,
        user_id: Option<DbId>,
    ) -> StoreResult<Project> {
        let inserted = sqlx::query(
            "INSERT INTO projects (name, slug, user_id, status_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (slug) DO NOTHING",
        )
        .bind(name)
        .bind(slug)
        .bind(user_id)
        .bind(ObjectStatus::Published.id())
        .execute(&mut *conn)
        .await?;
        if inserted.rows_affected() > 0 {
            tracing::info!(slug, "Created bootstrap project");
        }

        let query = format!("SELECT {HEADER_COLUMNS} FROM projects WHERE slug = $1");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(slug)
            .fetch_one(&mut *conn)
            .await?;
        Ok(project)
    }
}
