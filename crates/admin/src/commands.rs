//! Subcommand implementations.

use anyhow::{anyhow, bail, Context as _};
use chrono::{NaiveDate, NaiveTime};
use lims_core::config::CatalogConfig;
use lims_core::dataview::{presets, Collection, RequestParams};
use lims_core::kind::EntityKind;
use lims_core::permissions::Actor;
use lims_core::plugins::PluginRegistry;
use lims_core::tag::TagPair;
use lims_core::term::TermSpec;
use lims_core::types::Timestamp;
use lims_db::models::object::{BaseObject, ObjectRef};
use lims_db::models::project::{CreateProject, Project};
use lims_db::models::sample::CreateSample;
use lims_db::models::term::CreateTerm;
use lims_db::models::user::CreateUser;
use lims_db::repositories::{
    AttachmentRepo, BootstrapRepo, DataViewRepo, PermissionRepo, ProjectRepo, SampleRepo,
    TagRepo, TermRepo, UserRepo,
};
use serde::Serialize;
use sqlx::PgPool;

use crate::{Command, GrantArgs, ListArgs, TagArgs};

/// Shared state for one invocation.
pub struct Context {
    pub pool: PgPool,
    pub config: CatalogConfig,
    pub registry: PluginRegistry,
}

pub async fn run(ctx: &Context, command: Command) -> anyhow::Result<()> {
    let pool = &ctx.pool;
    match command {
        Command::Migrate => {
            lims_db::run_migrations(pool).await?;
            tracing::info!("Database migrations applied");
            print_json(&serde_json::json!({ "migrated": true }))
        }

        Command::CreateUser { username, staff } => {
            let user = UserRepo::create(
                pool,
                &CreateUser {
                    username,
                    is_staff: staff,
                },
            )
            .await?;
            print_json(&user)
        }

        Command::BootstrapUser { username } => {
            let user = UserRepo::find_by_username(pool, &username)
                .await?
                .ok_or_else(|| anyhow!("No user named \"{username}\""))?;
            let (shared, personal) = BootstrapRepo::bootstrap_user(pool, &user, &ctx.config).await?;
            print_json(&[shared, personal])
        }

        Command::Grant(args) => grant(ctx, args, true).await,
        Command::Revoke(args) => grant(ctx, args, false).await,

        Command::Permissions { username } => {
            let user = UserRepo::find_by_username(pool, &username)
                .await?
                .ok_or_else(|| anyhow!("No user named \"{username}\""))?;
            let grants = PermissionRepo::list_for_user(pool, user.id).await?;
            print_json(&grants)
        }

        Command::CreateProject {
            actor,
            name,
            slug,
            parent,
            description,
        } => {
            let actor = actor_named(pool, &actor).await?;
            let parent_id = match parent {
                Some(slug) => Some(project_by_slug(pool, &actor, &slug).await?.id()),
                None => None,
            };
            let input = CreateProject {
                name,
                slug,
                description,
                parent_id,
                ..Default::default()
            };
            let project = ProjectRepo::create(pool, &actor, &input, &ctx.config).await?;
            print_json(&project)
        }

        Command::CreateSample {
            actor,
            project,
            name,
            collected,
            parent,
            geometry,
        } => {
            let actor = actor_named(pool, &actor).await?;
            let project = project_by_slug(pool, &actor, &project).await?;
            let mut input = CreateSample::new(project.id(), &name);
            input.collected = collected.as_deref().map(parse_date).transpose()?;
            input.parent_id = parent;
            input.geometry = geometry;
            let sample = SampleRepo::create(pool, &actor, &input).await?;
            print_json(&sample)
        }

        Command::CreateTerm {
            actor,
            project,
            taxonomy,
            name,
            spec,
        } => {
            let actor = actor_named(pool, &actor).await?;
            let project_id = match project {
                Some(slug) => Some(project_by_slug(pool, &actor, &slug).await?.id()),
                None => None,
            };
            let mut input = CreateTerm::new(project_id, &taxonomy, &name);
            if let Some(raw) = spec {
                input.spec = serde_json::from_str::<TermSpec>(&raw).context("Invalid --spec JSON")?;
            }
            let term = TermRepo::create(pool, &actor, &ctx.registry, &input).await?;
            print_json(&term)
        }

        Command::Publish { actor, kind, id } => {
            let actor = actor_named(pool, &actor).await?;
            match kind {
                EntityKind::Project => ProjectRepo::publish(pool, &actor, id).await?,
                EntityKind::Sample => SampleRepo::publish(pool, &actor, id).await?,
                EntityKind::Attachment => AttachmentRepo::publish(pool, &actor, id).await?,
                EntityKind::Term => TermRepo::publish(pool, &actor, id).await?,
                tag => bail!("{tag} records have no status"),
            }
            print_json(&serde_json::json!({ "kind": kind, "id": id, "status": "published" }))
        }

        Command::Delete { actor, kind, ids } => {
            let actor = actor_named(pool, &actor).await?;
            let config = &ctx.config;
            let deleted = match kind {
                EntityKind::Project => ProjectRepo::delete_many(pool, &actor, &ids, config).await?,
                EntityKind::Sample => SampleRepo::delete_many(pool, &actor, &ids, config).await?,
                EntityKind::Attachment => {
                    AttachmentRepo::delete_many(pool, &actor, &ids, config).await?
                }
                EntityKind::Term => TermRepo::delete_many(pool, &actor, &ids, config).await?,
                tag => {
                    for id in &ids {
                        TagRepo::delete_tag(pool, &actor, tag, *id).await?;
                    }
                    ids.len() as u64
                }
            };
            print_json(&serde_json::json!({ "kind": kind, "deleted": deleted }))
        }

        Command::Tag(args) => tag(ctx, args).await,

        Command::Tags {
            actor,
            kind,
            id,
            taxonomy,
        } => {
            let actor = actor_named(pool, &actor).await?;
            let tags =
                TagRepo::get_tags(pool, &actor, ObjectRef::new(kind, id), taxonomy.as_deref())
                    .await?;
            print_json(&tags)
        }

        Command::List(args) => list(ctx, args).await,

        Command::RecomputeNumeric { kind } => {
            let changed = TagRepo::recompute_numeric_values(pool, kind).await?;
            print_json(&serde_json::json!({ "kind": kind, "changed": changed }))
        }
    }
}

async fn grant(ctx: &Context, args: GrantArgs, add: bool) -> anyhow::Result<()> {
    let pool = &ctx.pool;
    let user = UserRepo::find_by_username(pool, &args.username)
        .await?
        .ok_or_else(|| anyhow!("No user named \"{}\"", args.username))?;
    let project = project_by_slug(pool, &operator(), &args.project).await?;
    let changed = if add {
        PermissionRepo::grant(pool, user.id, project.id(), args.kind, &args.action).await?
    } else {
        PermissionRepo::revoke(pool, user.id, project.id(), args.kind, &args.action).await?
    };
    print_json(&serde_json::json!({
        "user": user.username,
        "project": project.header.slug,
        "kind": args.kind,
        "action": args.action.as_str(),
        "changed": changed,
    }))
}

async fn tag(ctx: &Context, args: TagArgs) -> anyhow::Result<()> {
    let pool = &ctx.pool;
    let actor = actor_named(pool, &args.actor).await?;
    let object = ObjectRef::new(args.kind, args.id);
    let pairs = parse_pairs(&args.pairs)?;
    let taxonomy = args.taxonomy.as_deref();

    let written = if args.replace {
        TagRepo::set_tags(pool, &actor, &ctx.registry, object, &pairs, taxonomy).await?
    } else if args.merge {
        TagRepo::update_tags(pool, &actor, &ctx.registry, object, &pairs, taxonomy).await?
    } else {
        TagRepo::add_tags(pool, &actor, &ctx.registry, object, &pairs, taxonomy).await?
    };
    print_json(&written)
}

async fn list(ctx: &Context, args: ListArgs) -> anyhow::Result<()> {
    let pool = &ctx.pool;
    let actor = actor_named(pool, &args.actor).await?;

    let mut view = presets::for_kind(&args.view, args.kind)?;
    for term in &args.terms {
        view = view.with_term_field(term)?;
    }

    let mut collections = Vec::new();
    if let Some(slug) = &args.project {
        collections.push(Collection::Project(project_by_slug(pool, &actor, slug).await?.id()));
    }
    if let Some(owner) = &args.owner {
        let user = UserRepo::find_by_username(pool, owner)
            .await?
            .ok_or_else(|| anyhow!("No user named \"{owner}\""))?;
        collections.push(Collection::OwnedBy(user.id));
    }
    if let Some(id) = args.object {
        collections.push(Collection::TagsOf(id));
    }
    if let Some(id) = args.key {
        collections.push(Collection::TagsWithKey(id));
    }
    if let Some(taxonomy) = args.taxonomy {
        collections.push(Collection::Taxonomy(taxonomy));
    }

    let mut params = RequestParams::new();
    for (key, value) in RequestParams::from_assignments(&args.params).iter() {
        params.push(format!("{}_{key}", args.view), value);
    }

    let page = DataViewRepo::bind(pool, &actor, &view, &collections, &params, &ctx.config).await?;
    print_json(&page)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The console itself, for lookups that act on nobody's behalf.
fn operator() -> Actor {
    Actor {
        user_id: 0,
        username: "operator".to_string(),
        is_staff: true,
    }
}

async fn actor_named(pool: &PgPool, username: &str) -> anyhow::Result<Actor> {
    let user = UserRepo::find_by_username(pool, username)
        .await?
        .ok_or_else(|| anyhow!("No user named \"{username}\""))?;
    Ok(user.actor())
}

async fn project_by_slug(pool: &PgPool, actor: &Actor, slug: &str) -> anyhow::Result<Project> {
    ProjectRepo::find_by_slug(pool, actor, slug)
        .await?
        .ok_or_else(|| anyhow!("No project with slug \"{slug}\""))
}

fn parse_date(raw: &str) -> anyhow::Result<Timestamp> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date \"{raw}\", expected YYYY-MM-DD"))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn parse_pairs(items: &[String]) -> anyhow::Result<Vec<TagPair>> {
    items
        .iter()
        .map(|item| {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected key=value, got \"{item}\""))?;
            Ok(TagPair::new(key, value))
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
