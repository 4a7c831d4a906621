//! lims-admin: operator console for the lab data catalog.
//!
//! Every subcommand prints its result as JSON on stdout; logs go to stderr.

mod commands;

use clap::{Args, Parser, Subcommand};
use lims_core::config::CatalogConfig;
use lims_core::kind::EntityKind;
use lims_core::permissions::Action;
use lims_core::plugins::PluginRegistry;
use lims_core::types::DbId;
use lims_db::DatabaseConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::Context;

#[derive(Parser)]
#[command(name = "lims-admin")]
#[command(about = "Operator console for the lab data catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Create a user
    CreateUser {
        username: String,
        /// Staff users bypass every permission check
        #[arg(long)]
        staff: bool,
    },

    /// Ensure the default and personal projects exist and grant the default actions
    BootstrapUser { username: String },

    /// Grant an action on one kind within a project
    Grant(GrantArgs),

    /// Revoke a previously granted action
    Revoke(GrantArgs),

    /// List the grants held by a user
    Permissions { username: String },

    /// Create a project
    CreateProject {
        #[arg(long = "as")]
        actor: String,
        name: String,
        #[arg(long)]
        slug: Option<String>,
        /// Slug of the parent project
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Create a sample in a project
    CreateSample {
        #[arg(long = "as")]
        actor: String,
        /// Project slug
        #[arg(long)]
        project: String,
        name: String,
        /// Collection date, YYYY-MM-DD
        #[arg(long)]
        collected: Option<String>,
        #[arg(long)]
        parent: Option<DbId>,
        /// WKT geometry
        #[arg(long)]
        geometry: Option<String>,
    },

    /// Create a term; without --project the term is global (staff only)
    CreateTerm {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        taxonomy: String,
        name: String,
        /// Plugin specs as JSON: {"validators": [...], "input_widget": ..., "output_widget": ...}
        #[arg(long)]
        spec: Option<String>,
    },

    /// Publish a record
    Publish {
        #[arg(long = "as")]
        actor: String,
        kind: EntityKind,
        id: DbId,
    },

    /// Delete records of one kind; all or nothing
    Delete {
        #[arg(long = "as")]
        actor: String,
        kind: EntityKind,
        #[arg(required = true)]
        ids: Vec<DbId>,
    },

    /// Add key=value tags to a record
    Tag(TagArgs),

    /// Print the tags of a record
    Tags {
        #[arg(long = "as")]
        actor: String,
        kind: EntityKind,
        id: DbId,
        #[arg(long)]
        taxonomy: Option<String>,
    },

    /// Run a list view and print one page
    List(ListArgs),

    /// Recompute the cached numeric value of every tag of a tag kind
    RecomputeNumeric { kind: EntityKind },
}

#[derive(Args)]
struct GrantArgs {
    username: String,
    /// Project slug
    project: String,
    kind: EntityKind,
    action: Action,
}

#[derive(Args)]
struct TagArgs {
    #[arg(long = "as")]
    actor: String,
    kind: EntityKind,
    id: DbId,
    /// key=value pairs
    #[arg(required = true)]
    pairs: Vec<String>,
    #[arg(long)]
    taxonomy: Option<String>,
    /// Replace every tag of the taxonomy instead of adding
    #[arg(long, conflicts_with = "merge")]
    replace: bool,
    /// Update the last tag of an existing key instead of adding another
    #[arg(long)]
    merge: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long = "as")]
    actor: String,
    kind: EntityKind,
    /// View name; request parameters are scoped by it
    #[arg(long, default_value = "list")]
    view: String,
    /// Add a column for a tag key (repeatable)
    #[arg(long = "term")]
    terms: Vec<String>,
    /// Only records of this project (slug)
    #[arg(long)]
    project: Option<String>,
    /// Only records owned by this user
    #[arg(long)]
    owner: Option<String>,
    /// Only tags of this object
    #[arg(long)]
    object: Option<DbId>,
    /// Only tags using this term id
    #[arg(long)]
    key: Option<DbId>,
    /// Only tags whose key is in this taxonomy
    #[arg(long)]
    taxonomy: Option<String>,
    /// Request parameters without the view prefix, e.g. q=soil order=-ph page=2
    params: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let db_config = DatabaseConfig::from_env()?;
    let config = CatalogConfig::from_env()?;
    tracing::debug!(?config, "Loaded catalog configuration");

    let pool = lims_db::create_pool(&db_config).await?;
    lims_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");

    let ctx = Context {
        pool,
        config,
        registry: PluginRegistry::with_builtins(),
    };
    commands::run(&ctx, cli.command).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lims_admin=info,lims_db=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
