//! SQL fragments shared by repositories: typed bind values, owner-chain
//! joins, permission scopes and visibility rules.
//!
//! Everything here produces plain strings with numbered placeholders so it
//! can be unit-tested without a database.

pub mod dataview;

use lims_core::kind::EntityKind;
use lims_core::permissions::ScopeFilter;
use lims_core::status::ObjectStatus;
use lims_core::term::PROJECT_TAXONOMY;
use lims_core::types::{DbId, Timestamp};

/// Typed bind value for dynamically-built queries.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    BigInt(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
    Bool(bool),
}

/// Bind values collected while building a query, numbered in push order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binds {
    values: Vec<BindValue>,
}

impl Binds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` and return its placeholder (`$n`).
    pub fn push(&mut self, value: BindValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[BindValue] {
        &self.values
    }
}

/// Bind a slice of `BindValue` to a sqlx `QueryAs`.
pub fn bind_values<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    values: &'q [BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for val in values {
        q = match val {
            BindValue::BigInt(v) => q.bind(*v),
            BindValue::Float(v) => q.bind(*v),
            BindValue::Text(v) => q.bind(v.as_str()),
            BindValue::Timestamp(v) => q.bind(*v),
            BindValue::Bool(v) => q.bind(*v),
        };
    }
    q
}

/// Bind a slice of `BindValue` to a sqlx `QueryScalar`.
pub fn bind_values_scalar<'q, O>(
    mut q: sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    values: &'q [BindValue],
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for val in values {
        q = match val {
            BindValue::BigInt(v) => q.bind(*v),
            BindValue::Float(v) => q.bind(*v),
            BindValue::Text(v) => q.bind(v.as_str()),
            BindValue::Timestamp(v) => q.bind(*v),
            BindValue::Bool(v) => q.bind(*v),
        };
    }
    q
}

/// Escape `%`, `_` and `\` for use inside a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Quote `value` as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ---------------------------------------------------------------------------
// Owner chain
// ---------------------------------------------------------------------------

/// Alias of the listed table in every generated query.
pub const BASE_ALIAS: &str = "t";

/// Joins from a row of `kind` (aliased `t`) up to its base object.
///
/// Tag kinds join one owner per hop (`o1`, `o2`, ...). The returned alias is
/// the base object's: `t` itself for base kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChain {
    pub joins: String,
    pub root_alias: String,
    pub root_kind: EntityKind,
}

pub fn owner_chain(kind: EntityKind) -> OwnerChain {
    let mut joins = String::new();
    let mut prev = BASE_ALIAS.to_string();
    for (idx, owner) in kind.owner_chain().into_iter().enumerate() {
        let alias = format!("o{}", idx + 1);
        joins.push_str(&format!(
            " JOIN {table} {alias} ON {alias}.id = {prev}.object_id",
            table = owner.table()
        ));
        prev = alias;
    }
    OwnerChain {
        joins,
        root_alias: prev,
        root_kind: kind.permission_kind(),
    }
}

impl OwnerChain {
    /// Expression for the owning project id.
    pub fn project_expr(&self) -> String {
        match self.root_kind {
            EntityKind::Project => format!("{}.id", self.root_alias),
            _ => format!("{}.project_id", self.root_alias),
        }
    }

    /// Expression for the taxonomy of the base Term, or a typed NULL.
    pub fn taxonomy_expr(&self) -> String {
        match self.root_kind {
            EntityKind::Term => format!("{}.taxonomy", self.root_alias),
            _ => "NULL::TEXT".to_string(),
        }
    }
}

/// Human-readable label of a row of `kind` aliased `alias`.
pub fn label_expr(kind: EntityKind, alias: &str) -> String {
    if kind.is_tag() {
        format!("{alias}.value")
    } else {
        format!("{alias}.slug")
    }
}

// ---------------------------------------------------------------------------
// Scope and visibility
// ---------------------------------------------------------------------------

/// Condition restricting rows to projects the scope's user holds a grant on.
///
/// `None` for an unrestricted scope.
pub fn scope_condition(scope: &ScopeFilter, chain: &OwnerChain, binds: &mut Binds) -> Option<String> {
    match scope {
        ScopeFilter::Unrestricted => None,
        ScopeFilter::Granted {
            user_id,
            permission_kind,
            action,
            exclude_project_vocabulary,
            ..
        } => {
            let user = binds.push(BindValue::BigInt(*user_id));
            let model = binds.push(BindValue::Text(permission_kind.name().to_string()));
            let act = binds.push(BindValue::Text(action.as_str().to_string()));
            let mut cond = format!(
                "EXISTS (SELECT 1 FROM project_permissions pp \
                 WHERE pp.user_id = {user} AND pp.model = {model} AND pp.action = {act} \
                 AND pp.project_id = {project})",
                project = chain.project_expr()
            );
            if *exclude_project_vocabulary {
                cond.push_str(&format!(
                    " AND {} <> {}",
                    chain.taxonomy_expr(),
                    quote_literal(PROJECT_TAXONOMY)
                ));
            }
            Some(cond)
        }
    }
}

/// Draft/published visibility on the base object.
///
/// Staff see everything except auto-drafts; everyone else sees published
/// rows plus their own drafts.
pub fn visibility_condition(
    chain: &OwnerChain,
    user_id: DbId,
    is_staff: bool,
    binds: &mut Binds,
) -> String {
    let root = &chain.root_alias;
    if is_staff {
        return format!("{root}.status_id <> {}", ObjectStatus::AutoDraft.id());
    }
    let user = binds.push(BindValue::BigInt(user_id));
    format!(
        "({root}.status_id = {published} OR ({root}.status_id = {draft} AND {root}.user_id = {user}))",
        published = ObjectStatus::Published.id(),
        draft = ObjectStatus::Draft.id(),
    )
}
