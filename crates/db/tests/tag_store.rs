//! Integration tests for the tag store: implicit keys, value validation,
//! duplicate handling and the cached numeric value.

use assert_matches::assert_matches;
use lims_core::config::CatalogConfig;
use lims_core::error::CoreError;
use lims_core::kind::EntityKind;
use lims_core::permissions::Actor;
use lims_core::plugins::{PluginRegistry, PluginSpec};
use lims_core::tag::{pairs, TagPair};
use lims_core::term::{TermRef, TermSpec};
use lims_core::types::Timestamp;
use lims_db::models::object::{BaseObject, ObjectRef};
use lims_db::models::project::{CreateProject, Project};
use lims_db::models::sample::{CreateSample, Sample};
use lims_db::models::term::{CreateTerm, Term};
use lims_db::models::user::CreateUser;
use lims_db::repositories::{ProjectRepo, SampleRepo, TagRepo, TermRepo, UserRepo};
use lims_db::StoreError;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

async fn new_project(pool: &PgPool, actor: &Actor, name: &str) -> Project {
    let input = CreateProject {
        name: name.to_string(),
        ..Default::default()
    };
    ProjectRepo::create(pool, actor, &input, &CatalogConfig::default())
        .await
        .unwrap()
}

async fn new_sample(pool: &PgPool, actor: &Actor, project: &Project, name: &str) -> Sample {
    SampleRepo::create(pool, actor, &CreateSample::new(project.id(), name))
        .await
        .unwrap()
}

/// A pH term limited to 0..=14 in `project`.
async fn ph_term(pool: &PgPool, actor: &Actor, registry: &PluginRegistry, project: &Project) -> Term {
    let mut input = CreateTerm::new(Some(project.id()), "Sample", "pH");
    input.spec = TermSpec {
        validators: vec![
            PluginSpec::new("MinValue").arg("limit_value", 0),
            PluginSpec::new("MaxValue").arg("limit_value", 14),
        ],
        ..Default::default()
    };
    TermRepo::create(pool, actor, registry, &input).await.unwrap()
}

fn key(k: &str) -> TermRef {
    TermRef::from(k)
}

async fn modified_at(pool: &PgPool, actor: &Actor, sample: &Sample) -> Timestamp {
    SampleRepo::find_by_id(pool, actor, sample.id())
        .await
        .unwrap()
        .header
        .modified_at
}

/// Let the clock move so consecutive `now()` stamps differ.
async fn pause() {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_add_tags_creates_keys_and_keeps_duplicates(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);

    let added = TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("Soil Color", "brown"), ("Soil Color", "red"), ("depth", "3.5")]),
        None,
    )
    .await
    .unwrap();
    assert_eq!(added.len(), 3);
    assert_eq!(added[2].numeric_value, Some(3.5));
    assert_eq!(added[0].numeric_value, None);

    let term = TermRepo::lookup(&pool, &alice, Some(project.id()), "Sample", "Soil Color")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(term.header.slug, "soil-color");
    assert_eq!(term.project_id, Some(project.id()));

    let list = TagRepo::get_tag_list(&pool, &alice, object, &key("soil-color"), None)
        .await
        .unwrap();
    let values: Vec<&str> = list.iter().map(|t| t.value.as_str()).collect();
    assert_eq!(values, vec!["brown", "red"]);

    let last = TagRepo::get_tag(&pool, &alice, object, &key("Soil Color"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.value, "red");

    let map = TagRepo::tag_map(&pool, &alice, object, None).await.unwrap();
    assert_eq!(map.get("soil-color").map(String::as_str), Some("red"));
    assert_eq!(map.get("depth").map(String::as_str), Some("3.5"));

    let missing = TagRepo::get_tag(&pool, &alice, object, &key("nothing"), None)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_blank_values_are_skipped(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;

    let added = TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        ObjectRef::of(&sample),
        &pairs([("depth", "  "), ("  ", "3")]),
        None,
    )
    .await
    .unwrap();
    assert!(added.is_empty());

    let terms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM terms")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(terms, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_invalid_value_stops_the_batch(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    ph_term(&pool, &alice, &registry, &project).await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);

    let err = TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("depth", "3"), ("pH", "15"), ("color", "red")]),
        None,
    )
    .await
    .unwrap_err();
    match err {
        StoreError::Core(CoreError::Validation(errors)) => {
            assert_eq!(errors.for_field("ph").count(), 1);
        }
        other => panic!("Expected a validation error, got {other:?}"),
    }

    // Pairs before the failure stay applied.
    let map = TagRepo::tag_map(&pool, &alice, object, None).await.unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("depth").map(String::as_str), Some("3"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_set_tags_replaces_the_taxonomy(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    ph_term(&pool, &alice, &registry, &project).await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);

    TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("depth", "3"), ("color", "red")]),
        None,
    )
    .await
    .unwrap();
    TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("kit", "A-7")]),
        Some("Equipment"),
    )
    .await
    .unwrap();

    TagRepo::set_tags(&pool, &alice, &registry, object, &pairs([("pH", "6.5")]), None)
        .await
        .unwrap();
    let map = TagRepo::tag_map(&pool, &alice, object, None).await.unwrap();
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["ph"]);

    // Other taxonomies are untouched.
    let equipment = TagRepo::tag_map(&pool, &alice, object, Some("Equipment"))
        .await
        .unwrap();
    assert_eq!(equipment.get("kit").map(String::as_str), Some("A-7"));

    // A failing replacement leaves the previous set in place.
    let err = TagRepo::set_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("depth", "4"), ("pH", "99")]),
        None,
    )
    .await
    .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Validation(_)));
    let map = TagRepo::tag_map(&pool, &alice, object, None).await.unwrap();
    assert_eq!(map.get("ph").map(String::as_str), Some("6.5"));
    assert!(!map.contains_key("depth"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_update_tags_merges_and_clears(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);

    TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        object,
        &pairs([("depth", "3"), ("depth", "4"), ("color", "red")]),
        None,
    )
    .await
    .unwrap();

    let written = TagRepo::update_tags(
        &pool,
        &alice,
        &registry,
        object,
        &[
            TagPair::new("depth", "5").with_comment("re-measured"),
            TagPair::clear("color"),
            TagPair::new("site", "north"),
        ],
        None,
    )
    .await
    .unwrap();
    assert_eq!(written.len(), 2);

    let depths = TagRepo::get_tag_list(&pool, &alice, object, &key("depth"), None)
        .await
        .unwrap();
    let values: Vec<&str> = depths.iter().map(|t| t.value.as_str()).collect();
    assert_eq!(values, vec!["3", "5"]);
    assert_eq!(depths[1].comment.as_deref(), Some("re-measured"));
    assert_eq!(depths[1].numeric_value, Some(5.0));

    let map = TagRepo::tag_map(&pool, &alice, object, None).await.unwrap();
    assert!(!map.contains_key("color"));
    assert_eq!(map.get("site").map(String::as_str), Some("north"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_tag_writes_bump_the_owner(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);
    let mut last = sample.header.modified_at;

    pause().await;
    TagRepo::add_tags(&pool, &alice, &registry, object, &pairs([("depth", "3")]), None)
        .await
        .unwrap();
    let now = modified_at(&pool, &alice, &sample).await;
    assert!(now > last, "add_tags did not bump the sample");
    last = now;

    pause().await;
    TagRepo::update_tags(&pool, &alice, &registry, object, &pairs([("depth", "4")]), None)
        .await
        .unwrap();
    let now = modified_at(&pool, &alice, &sample).await;
    assert!(now > last, "update_tags did not bump the sample");
    last = now;

    pause().await;
    TagRepo::set_tags(&pool, &alice, &registry, object, &pairs([("color", "red")]), None)
        .await
        .unwrap();
    let now = modified_at(&pool, &alice, &sample).await;
    assert!(now > last, "set_tags did not bump the sample");
    last = now;

    let color = TagRepo::get_tag(&pool, &alice, object, &key("color"), None)
        .await
        .unwrap()
        .unwrap();
    pause().await;
    TagRepo::delete_tag(&pool, &alice, EntityKind::SampleTag, color.id)
        .await
        .unwrap();
    let now = modified_at(&pool, &alice, &sample).await;
    assert!(now > last, "delete_tag did not bump the sample");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_key_must_share_the_project(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let one = new_project(&pool, &alice, "One").await;
    let two = new_project(&pool, &alice, "Two").await;
    let foreign = ph_term(&pool, &alice, &registry, &two).await;
    let sample = new_sample(&pool, &alice, &one, "Core").await;

    let err = TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        ObjectRef::of(&sample),
        &[TagPair::new(foreign.id(), "7")],
        None,
    )
    .await
    .unwrap_err();
    match err {
        StoreError::Core(CoreError::Validation(errors)) => {
            assert_eq!(errors.for_field("key").count(), 1);
        }
        other => panic!("Expected a validation error, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_project_terms_win_over_global_ones(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let staff = new_actor(&pool, "root", true).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let global = TermRepo::create(&pool, &staff, &registry, &CreateTerm::new(None, "Sample", "pH"))
        .await
        .unwrap();
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);

    // Only the global term exists: it is used.
    let added = TagRepo::add_tags(&pool, &alice, &registry, object, &pairs([("pH", "7")]), None)
        .await
        .unwrap();
    assert_eq!(added[0].key_id, global.id());

    // A project term with the same slug takes precedence afterwards.
    let local = ph_term(&pool, &alice, &registry, &project).await;
    let added = TagRepo::add_tags(&pool, &alice, &registry, object, &pairs([("pH", "8")]), None)
        .await
        .unwrap();
    assert_eq!(added[0].key_id, local.id());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_tag_reads_follow_the_object_permissions(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let bob = new_actor(&pool, "bob", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    let object = ObjectRef::of(&sample);
    let added = TagRepo::add_tags(&pool, &alice, &registry, object, &pairs([("depth", "3")]), None)
        .await
        .unwrap();

    let err = TagRepo::get_tags(&pool, &bob, object, None).await.unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::ObjectPermission { .. }));
    let err = TagRepo::delete_tag(&pool, &bob, EntityKind::SampleTag, added[0].id)
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::ObjectPermission { .. }));

    TagRepo::delete_tag(&pool, &alice, EntityKind::SampleTag, added[0].id)
        .await
        .unwrap();
    let tags = TagRepo::get_tags(&pool, &alice, object, None).await.unwrap();
    assert!(tags.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_recompute_numeric_values(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;
    let sample = new_sample(&pool, &alice, &project, "Core").await;
    TagRepo::add_tags(
        &pool,
        &alice,
        &registry,
        ObjectRef::of(&sample),
        &pairs([("depth", "3"), ("wet", "TRUE"), ("color", "red")]),
        None,
    )
    .await
    .unwrap();

    sqlx::query("UPDATE sample_tags SET numeric_value = NULL")
        .execute(&pool)
        .await
        .unwrap();
    let changed = TagRepo::recompute_numeric_values(&pool, EntityKind::SampleTag)
        .await
        .unwrap();
    assert_eq!(changed, 2);

    let cached: Vec<Option<f64>> =
        sqlx::query_scalar("SELECT numeric_value FROM sample_tags ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(cached, vec![Some(3.0), Some(1.0), None]);

    let err = TagRepo::recompute_numeric_values(&pool, EntityKind::Sample)
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Core(CoreError::Validation(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_get_or_create_reuses_existing_terms(pool: PgPool) {
    let alice = new_actor(&pool, "alice", false).await;
    let registry = PluginRegistry::with_builtins();
    let project = new_project(&pool, &alice, "Field").await;

    let created = TermRepo::get_or_create(&pool, &alice, &registry, "Grain Size", Some(project.id()), "Sample")
        .await
        .unwrap()
        .unwrap();
    let by_slug = TermRepo::get_or_create(&pool, &alice, &registry, "grain-size", Some(project.id()), "Sample")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.id(), by_slug.id());
    assert_eq!(created.header.name, "Grain Size");

    let blank = TermRepo::get_or_create(&pool, &alice, &registry, "   ", Some(project.id()), "Sample")
        .await
        .unwrap();
    assert!(blank.is_none());

    let listed = TermRepo::list_for_taxonomy(&pool, &alice, Some(project.id()), "Sample")
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
