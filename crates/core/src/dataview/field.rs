//! DataView field definitions and the column catalog they resolve against.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CoreError;
use crate::kind::EntityKind;

/// How values of a field are parsed and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
    /// An object status, filtered by name or id.
    Status,
    /// A tag value: text with a cached numeric form.
    TagValue,
}

impl ValueType {
    pub fn default_operators(self) -> &'static [Operator] {
        use Operator::*;
        match self {
            ValueType::Integer | ValueType::Float => &[Exact, Gt, Lt, Gte, Lte, Range],
            ValueType::Text | ValueType::TagValue => &[
                Exact, IExact, Contains, IContains, Gt, Lt, Gte, Lte, Range, Regex, IRegex,
            ],
            ValueType::Timestamp => &[Exact, Gt, Lt, Gte, Lte, Range, Year, Month, Day],
            ValueType::Boolean | ValueType::Status => &[Exact],
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, ValueType::Text | ValueType::TagValue)
    }
}

/// A comparison exposed through `<field>__<operator>` request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Exact,
    IExact,
    Contains,
    IContains,
    Gt,
    Lt,
    Gte,
    Lte,
    Year,
    Month,
    Day,
    Range,
    Regex,
    IRegex,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Exact,
        Operator::IExact,
        Operator::Contains,
        Operator::IContains,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Year,
        Operator::Month,
        Operator::Day,
        Operator::Range,
        Operator::Regex,
        Operator::IRegex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Exact => "exact",
            Operator::IExact => "iexact",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Year => "year",
            Operator::Month => "month",
            Operator::Day => "day",
            Operator::Range => "range",
            Operator::Regex => "regex",
            Operator::IRegex => "iregex",
        }
    }

    /// Whether the operator compares magnitudes (numeric on tag values).
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte | Operator::Range
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("Unknown operator: \"{s}\""))
    }
}

// ---------------------------------------------------------------------------
// Column catalog
// ---------------------------------------------------------------------------

/// A stored column reachable from a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Name used in field paths.
    pub name: &'static str,
    /// Column name in SQL.
    pub sql: &'static str,
    pub value_type: ValueType,
}

const fn col(name: &'static str, sql: &'static str, value_type: ValueType) -> Column {
    Column {
        name,
        sql,
        value_type,
    }
}

const OBJECT_COLUMNS: &[Column] = &[
    col("id", "id", ValueType::Integer),
    col("name", "name", ValueType::Text),
    col("slug", "slug", ValueType::Text),
    col("description", "description", ValueType::Text),
    col("parent_id", "parent_id", ValueType::Integer),
    col("recursive_depth", "recursive_depth", ValueType::Integer),
    col("geometry", "geometry", ValueType::Text),
    col("xmin", "bbox_xmin", ValueType::Float),
    col("xmax", "bbox_xmax", ValueType::Float),
    col("ymin", "bbox_ymin", ValueType::Float),
    col("ymax", "bbox_ymax", ValueType::Float),
    col("user_id", "user_id", ValueType::Integer),
    col("status", "status_id", ValueType::Status),
    col("created", "created_at", ValueType::Timestamp),
    col("modified", "modified_at", ValueType::Timestamp),
];

const SAMPLE_COLUMNS: &[Column] = &[
    col("project_id", "project_id", ValueType::Integer),
    col("collected", "collected", ValueType::Timestamp),
];

const ATTACHMENT_COLUMNS: &[Column] = &[
    col("project_id", "project_id", ValueType::Integer),
    col("file_path", "file_path", ValueType::Text),
    col("file_hash", "file_hash", ValueType::Text),
];

const TERM_COLUMNS: &[Column] = &[
    col("project_id", "project_id", ValueType::Integer),
    col("taxonomy", "taxonomy", ValueType::Text),
    col("measured", "measured", ValueType::Boolean),
];

const TAG_COLUMNS: &[Column] = &[
    col("id", "id", ValueType::Integer),
    col("object_id", "object_id", ValueType::Integer),
    col("key_id", "key_id", ValueType::Integer),
    col("value", "value", ValueType::Text),
    col("comment", "comment", ValueType::Text),
    col("numeric_value", "numeric_value", ValueType::Float),
    col("user_id", "user_id", ValueType::Integer),
    col("created", "created_at", ValueType::Timestamp),
    col("modified", "modified_at", ValueType::Timestamp),
];

const USER_COLUMNS: &[Column] = &[
    col("username", "username", ValueType::Text),
    col("is_staff", "is_staff", ValueType::Boolean),
];

const LABEL_COLUMNS: &[Column] = &[
    col("slug", "slug", ValueType::Text),
    col("name", "name", ValueType::Text),
];

const TERM_LABEL_COLUMNS: &[Column] = &[
    col("slug", "slug", ValueType::Text),
    col("name", "name", ValueType::Text),
    col("taxonomy", "taxonomy", ValueType::Text),
];

const TAG_LABEL_COLUMNS: &[Column] = &[col("value", "value", ValueType::Text)];

/// Every column stored on `kind`'s table that a field path may name.
pub fn columns(kind: EntityKind) -> Vec<Column> {
    if kind.is_tag() {
        return TAG_COLUMNS.to_vec();
    }
    let extra: &[Column] = match kind {
        EntityKind::Sample => SAMPLE_COLUMNS,
        EntityKind::Attachment => ATTACHMENT_COLUMNS,
        EntityKind::Term => TERM_COLUMNS,
        _ => &[],
    };
    OBJECT_COLUMNS.iter().chain(extra).copied().collect()
}

pub fn column(kind: EntityKind, name: &str) -> Option<Column> {
    columns(kind).into_iter().find(|c| c.name == name)
}

/// A single hop from the listed row to a related record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// The owning user.
    User,
    /// The owning project (Sample, Attachment, Term).
    Project,
    /// The parent of the same kind.
    Parent,
    /// The Term keying a tag.
    Key,
    /// The object a tag hangs off.
    Object,
}

impl Relation {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "user" => Some(Relation::User),
            "project" => Some(Relation::Project),
            "parent" => Some(Relation::Parent),
            "key" => Some(Relation::Key),
            "object" => Some(Relation::Object),
            _ => None,
        }
    }

    /// Columns of the related record, default first; `None` when `kind` has
    /// no such relation.
    fn columns(self, kind: EntityKind) -> Option<&'static [Column]> {
        match self {
            Relation::User => Some(USER_COLUMNS),
            Relation::Project => kind.has_project_column().then_some(LABEL_COLUMNS),
            Relation::Parent => (!kind.is_tag()).then_some(LABEL_COLUMNS),
            Relation::Key => kind.is_tag().then_some(TERM_LABEL_COLUMNS),
            Relation::Object => match kind.owner() {
                Some(owner) if owner.is_tag() => Some(TAG_LABEL_COLUMNS),
                Some(_) => Some(LABEL_COLUMNS),
                None => None,
            },
        }
    }
}

/// What a field reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldTarget {
    Column(Column),
    Relation { relation: Relation, column: Column },
    /// The last value of the tag keyed by Term `term` within `taxonomy`.
    /// `slot` numbers the distinct tag targets of one view.
    Tag {
        slot: usize,
        term: String,
        taxonomy: String,
    },
}

impl FieldTarget {
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldTarget::Column(c) | FieldTarget::Relation { column: c, .. } => c.value_type,
            FieldTarget::Tag { .. } => ValueType::TagValue,
        }
    }
}

/// Resolve a dotted path against the columns of `kind`.
///
/// Accepted forms: `column`, `relation`, `relation.column` and `tags.<term>`.
/// Tag targets get `slot` 0; the view renumbers them.
pub fn resolve_path(kind: EntityKind, path: &str) -> Result<FieldTarget, String> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };

    if head == "tags" {
        let tag_kind = kind
            .tag_kind()
            .ok_or_else(|| format!("{kind} records cannot carry tags"))?;
        let term = rest
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "A tag path needs a Term slug: tags.<slug>".to_string())?;
        return Ok(FieldTarget::Tag {
            slot: 0,
            term: term.to_string(),
            taxonomy: tag_kind.default_taxonomy().to_string(),
        });
    }

    if rest.is_none() {
        if let Some(c) = column(kind, head) {
            return Ok(FieldTarget::Column(c));
        }
    }

    let relation =
        Relation::parse(head).ok_or_else(|| format!("{kind} has no field \"{path}\""))?;
    let available = relation
        .columns(kind)
        .ok_or_else(|| format!("{kind} has no relation \"{head}\""))?;
    let column = match rest {
        None => available[0],
        Some(name) => available
            .iter()
            .copied()
            .find(|c| c.name == name)
            .ok_or_else(|| format!("\"{head}\" has no column \"{name}\""))?,
    };
    Ok(FieldTarget::Relation { relation, column })
}

// ---------------------------------------------------------------------------
// Field definitions
// ---------------------------------------------------------------------------

/// An unresolved field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub slug: String,
    pub label: String,
    pub path: String,
    pub sortable: bool,
    /// `None` means "textual fields are searchable".
    pub searchable: Option<bool>,
    /// `None` means the defaults of the value type.
    pub operators: Option<Vec<Operator>>,
}

impl FieldSpec {
    /// A sortable field whose slug is its path.
    pub fn new(path: &str) -> Self {
        Self {
            slug: path.replace('.', "_"),
            label: path.to_string(),
            path: path.to_string(),
            sortable: true,
            searchable: None,
            operators: None,
        }
    }

    pub fn slug(mut self, slug: &str) -> Self {
        self.slug = slug.to_string();
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn unsortable(mut self) -> Self {
        self.sortable = false;
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = Some(searchable);
        self
    }

    pub fn operators(mut self, operators: &[Operator]) -> Self {
        self.operators = Some(operators.to_vec());
        self
    }

    pub(crate) fn resolve(&self, kind: EntityKind) -> Result<Field, CoreError> {
        let field_name = format!("fields.{}", self.slug);
        if self.slug.is_empty() || self.slug.contains("__") {
            return Err(CoreError::field(
                field_name,
                "Field slug must be non-empty and must not contain \"__\"",
            ));
        }
        let target = resolve_path(kind, &self.path).map_err(|msg| CoreError::field(field_name, msg))?;
        let value_type = target.value_type();
        Ok(Field {
            slug: self.slug.clone(),
            label: self.label.clone(),
            value_type,
            sortable: self.sortable,
            searchable: self.searchable.unwrap_or(value_type.is_textual()),
            operators: self
                .operators
                .clone()
                .unwrap_or_else(|| value_type.default_operators().to_vec()),
            target,
        })
    }
}

/// A field resolved against the view's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub slug: String,
    pub label: String,
    pub target: FieldTarget,
    pub value_type: ValueType,
    pub sortable: bool,
    pub searchable: bool,
    pub operators: Vec<Operator>,
}

impl Field {
    pub fn allows(&self, op: Operator) -> bool {
        self.operators.contains(&op)
    }
}
