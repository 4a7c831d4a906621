use lims_core::config::CatalogConfig;
use lims_core::kind::EntityKind;
use lims_core::status::ObjectStatus;
use lims_db::models::object::BaseObject;
use lims_db::models::user::CreateUser;
use lims_db::repositories::bootstrap_repo::{user_project_slug, DEFAULT_PROJECT_SLUG};
use lims_db::repositories::{BootstrapRepo, PermissionRepo, UserRepo};
use sqlx::PgPool;

/// Full bootstrap test: connect, migrate, verify seed data.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    lims_db::health_check(&pool).await.unwrap();

    let statuses: Vec<(i16, String)> =
        sqlx::query_as("SELECT id, name FROM object_statuses ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    let ids: Vec<i16> = statuses.iter().map(|(id, _)| *id).collect();
    assert_eq!(
        ids,
        vec![
            ObjectStatus::AutoDraft.id(),
            ObjectStatus::Draft.id(),
            ObjectStatus::Published.id()
        ]
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_bootstrap_user_is_idempotent(pool: PgPool) {
    let config = CatalogConfig::default();
    let user = UserRepo::create(
        &pool,
        &CreateUser {
            username: "alice".to_string(),
            is_staff: false,
        },
    )
    .await
    .unwrap();

    let (shared, personal) = BootstrapRepo::bootstrap_user(&pool, &user, &config)
        .await
        .unwrap();
    assert_eq!(shared.header.slug, DEFAULT_PROJECT_SLUG);
    assert_eq!(shared.header.user_id, None);
    assert_eq!(shared.header.status(), ObjectStatus::Published);
    assert_eq!(personal.header.slug, user_project_slug(user.id));
    assert_eq!(personal.header.user_id, Some(user.id));

    let grants = PermissionRepo::list_for_user(&pool, user.id).await.unwrap();
    let expected = 2 * EntityKind::BASE.len() * config.default_actions.len();
    assert_eq!(grants.len(), expected);

    let (again_shared, again_personal) = BootstrapRepo::bootstrap_user(&pool, &user, &config)
        .await
        .unwrap();
    assert_eq!(again_shared.id(), shared.id());
    assert_eq!(again_personal.id(), personal.id());
    let grants = PermissionRepo::list_for_user(&pool, user.id).await.unwrap();
    assert_eq!(grants.len(), expected);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_users_share_the_default_project(pool: PgPool) {
    let config = CatalogConfig::default();
    let mut shared_ids = Vec::new();
    for name in ["alice", "bob"] {
        let user = UserRepo::create(
            &pool,
            &CreateUser {
                username: name.to_string(),
                is_staff: false,
            },
        )
        .await
        .unwrap();
        let (shared, _) = BootstrapRepo::bootstrap_user(&pool, &user, &config)
            .await
            .unwrap();
        shared_ids.push(shared.id());
    }
    assert_eq!(shared_ids[0], shared_ids[1]);

    let default = BootstrapRepo::ensure_default_project(&pool).await.unwrap();
    assert_eq!(default.id(), shared_ids[0]);
}
