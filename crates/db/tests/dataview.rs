//! Integration tests for DataView listings: permission scope, visibility,
//! search, filters, tag columns and pagination.

use assert_matches::assert_matches;
use lims_core::config::CatalogConfig;
use lims_core::dataview::{presets, Collection, DataView, Page, RequestParams};
use lims_core::error::CoreError;
use lims_core::kind::EntityKind;
use lims_core::permissions::{Action, Actor};
use lims_core::plugins::PluginRegistry;
use lims_core::tag::pairs;
use lims_db::models::dataview::ViewRow;
use lims_db::models::object::{BaseObject, ObjectRef};
use lims_db::models::project::{CreateProject, Project};
use lims_db::models::sample::{CreateSample, Sample};
use lims_db::models::user::CreateUser;
use lims_db::repositories::{DataViewRepo, PermissionRepo, ProjectRepo, SampleRepo, TagRepo, UserRepo};
use lims_db::StoreError;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    alice: Actor,
    bob: Actor,
    project: Project,
    samples: Vec<Sample>,
}

async fn new_actor(pool: &PgPool, username: &str, is_staff: bool) -> Actor {
    UserRepo::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            is_staff,
        },
    )
    .await
    .unwrap()
    .actor()
}

/// Alice's project with four published samples (Alpha..Delta, pH 7, 10,
/// "n/a" and none) and one draft. Bob may view samples in it.
async fn fixture(pool: &PgPool) -> Fixture {
    let alice = new_actor(pool, "alice", false).await;
    let bob = new_actor(pool, "bob", false).await;
    let registry = PluginRegistry::with_builtins();
    let input = CreateProject {
        name: "Field".to_string(),
        ..Default::default()
    };
    let project = ProjectRepo::create(pool, &alice, &input, &CatalogConfig::default())
        .await
        .unwrap();
    PermissionRepo::grant(pool, bob.user_id, project.id(), EntityKind::Sample, &Action::VIEW)
        .await
        .unwrap();

    let mut samples = Vec::new();
    for (name, ph) in [("Alpha", Some("7")), ("Beta", Some("10")), ("Gamma", Some("n/a")), ("Delta", None)] {
        let sample = SampleRepo::create(pool, &alice, &CreateSample::new(project.id(), name))
            .await
            .unwrap();
        if let Some(ph) = ph {
            TagRepo::add_tags(pool, &alice, &registry, ObjectRef::of(&sample), &pairs([("ph", ph)]), None)
                .await
                .unwrap();
        }
        SampleRepo::publish(pool, &alice, sample.id()).await.unwrap();
        samples.push(sample);
    }
    let draft = SampleRepo::create(pool, &alice, &CreateSample::new(project.id(), "Draft One"))
        .await
        .unwrap();
    samples.push(draft);

    Fixture {
        alice,
        bob,
        project,
        samples,
    }
}

fn sample_view() -> DataView {
    presets::samples("samples").unwrap().with_term_field("ph").unwrap()
}

async fn list(
    pool: &PgPool,
    actor: &Actor,
    collections: &[Collection],
    params: &[(&str, &str)],
) -> Result<Page<ViewRow>, StoreError> {
    DataViewRepo::bind(
        pool,
        actor,
        &sample_view(),
        collections,
        &RequestParams::from_pairs(params.iter().copied()),
        &CatalogConfig::default(),
    )
    .await
}

fn names(page: &Page<ViewRow>) -> Vec<String> {
    page.rows
        .iter()
        .map(|r| r.field_text("name").unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_visibility_and_scope(pool: PgPool) {
    let fx = fixture(&pool).await;
    let carol = new_actor(&pool, "carol", false).await;
    let staff = new_actor(&pool, "root", true).await;

    let page = list(&pool, &fx.alice, &[], &[]).await.unwrap();
    assert_eq!(page.total_count, 5);

    // Drafts are listed only for their owner.
    let page = list(&pool, &fx.bob, &[], &[]).await.unwrap();
    assert_eq!(page.total_count, 4);
    assert!(!names(&page).contains(&"Draft One".to_string()));

    let page = list(&pool, &carol, &[], &[]).await.unwrap();
    assert_eq!(page.total_count, 0);
    assert!(page.rows.is_empty());

    let page = list(&pool, &staff, &[], &[]).await.unwrap();
    assert_eq!(page.total_count, 5);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_collections_narrow_the_listing(pool: PgPool) {
    let fx = fixture(&pool).await;

    let page = list(&pool, &fx.alice, &[Collection::Project(fx.project.id())], &[])
        .await
        .unwrap();
    assert_eq!(page.total_count, 5);
    let page = list(&pool, &fx.alice, &[Collection::OwnedBy(fx.bob.user_id)], &[])
        .await
        .unwrap();
    assert_eq!(page.total_count, 0);

    let err = list(&pool, &fx.alice, &[Collection::TagsOf(1)], &[])
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Validation(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_search_and_filters(pool: PgPool) {
    let fx = fixture(&pool).await;

    let page = list(&pool, &fx.bob, &[], &[("samples_q", "alp")]).await.unwrap();
    assert_eq!(names(&page), vec!["Alpha"]);

    let page = list(&pool, &fx.bob, &[], &[("samples_name__icontains", "ET")])
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Beta"]);

    // Ordering comparisons on tag columns use the numeric value.
    let page = list(&pool, &fx.bob, &[], &[("samples_ph__gte", "8")]).await.unwrap();
    assert_eq!(names(&page), vec!["Beta"]);

    // Unknown fields and operators are ignored.
    let page = list(&pool, &fx.bob, &[], &[("samples_nope__exact", "x"), ("samples_name__bogus", "x")])
        .await
        .unwrap();
    assert_eq!(page.total_count, 4);

    let err = list(&pool, &fx.bob, &[], &[("samples_collected__year", "soon")])
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Validation(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_regex_filters_follow_postgres_syntax(pool: PgPool) {
    let fx = fixture(&pool).await;

    // Backreferences are valid in Postgres patterns.
    let page = list(&pool, &fx.bob, &[], &[("samples_name__regex", r"(m)\1")])
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Gamma"]);

    let page = list(&pool, &fx.bob, &[], &[("samples_name__iregex", "^a")])
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Alpha"]);

    // Named groups are not, and every bad pattern is reported by parameter.
    let err = list(
        &pool,
        &fx.bob,
        &[],
        &[("samples_name__regex", "(?P<x>A)"), ("samples_name__iregex", "(")],
    )
    .await
    .unwrap_err();
    let StoreError::Core(CoreError::Validation(errors)) = err else {
        panic!("Expected a validation error, got {err:?}");
    };
    let mut fields: Vec<&str> = errors.errors.iter().map(|e| e.field.as_str()).collect();
    fields.sort();
    assert_eq!(fields, vec!["samples_name__iregex", "samples_name__regex"]);
    assert!(errors.errors[0].message.starts_with("Invalid regular expression: "));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_tag_columns_sort_missing_values_last(pool: PgPool) {
    let fx = fixture(&pool).await;

    let page = list(&pool, &fx.bob, &[], &[("samples_order", "ph")]).await.unwrap();
    assert_eq!(names(&page), vec!["Alpha", "Beta", "Gamma", "Delta"]);
    assert_eq!(page.rows[0].field_text("ph").as_deref(), Some("7"));
    assert_eq!(page.rows[3].field_text("ph"), None);

    let page = list(&pool, &fx.bob, &[], &[("samples_order", "-ph")]).await.unwrap();
    assert_eq!(names(&page), vec!["Beta", "Alpha", "Gamma", "Delta"]);

    // Legacy parameter names still work.
    let page = list(&pool, &fx.bob, &[], &[("samples_order_variable", "-name")])
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Gamma", "Delta", "Beta", "Alpha"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_pagination(pool: PgPool) {
    let fx = fixture(&pool).await;
    let order = ("samples_order", "name");

    let page = list(&pool, &fx.bob, &[], &[order, ("samples_limit", "3")]).await.unwrap();
    assert_eq!(names(&page), vec!["Alpha", "Beta", "Delta"]);
    assert_eq!(page.num_pages, 2);
    assert!(page.has_next);
    assert!(!page.has_prev);

    let page = list(&pool, &fx.bob, &[], &[order, ("samples_item_limit", "3"), ("samples_page", "2")])
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Gamma"]);
    assert!(!page.has_next);
    assert!(page.has_prev);

    let page = list(&pool, &fx.bob, &[], &[order, ("samples_limit", "3"), ("samples_page", "9")])
        .await
        .unwrap();
    assert!(page.rows.is_empty());
    assert_eq!(page.total_count, 4);
    assert!(!page.has_next);
    assert!(!page.has_prev);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_tag_listing_of_one_object(pool: PgPool) {
    let fx = fixture(&pool).await;
    let alpha = &fx.samples[0];
    let view = presets::tags("tags", EntityKind::SampleTag).unwrap();

    let page = DataViewRepo::bind(
        &pool,
        &fx.bob,
        &view,
        &[Collection::TagsOf(alpha.id())],
        &RequestParams::new(),
        &CatalogConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.rows[0].field_text("value").as_deref(), Some("7"));
    assert_eq!(page.rows[0].field_text("key").as_deref(), Some("ph"));
}
