//! A bound DataView: everything the store needs to run one list query.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use super::field::{Field, FieldTarget, Operator, ValueType};
use crate::error::CoreError;
use crate::kind::EntityKind;
use crate::status::ObjectStatus;
use crate::tag::parse_numeric;
use crate::types::DbId;

/// A parsed filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Range(Box<FilterValue>, Box<FilterValue>),
}

/// Parse `raw` as an operand of `op` on a field of `value_type`.
pub fn parse_value(value_type: ValueType, op: Operator, raw: &str) -> Result<FilterValue, String> {
    match op {
        Operator::Year => parse_int(raw).map(FilterValue::Integer),
        Operator::Month => parse_bounded(raw, 1, 12).map(FilterValue::Integer),
        Operator::Day => parse_bounded(raw, 1, 31).map(FilterValue::Integer),
        Operator::Range => {
            let (lo, hi) = raw
                .split_once(',')
                .ok_or_else(|| "A range needs two comma separated values".to_string())?;
            Ok(FilterValue::Range(
                Box::new(parse_scalar(value_type, op, lo)?),
                Box::new(parse_scalar(value_type, op, hi)?),
            ))
        }
        // Pattern syntax is checked by the database, whose dialect applies.
        Operator::Regex | Operator::IRegex => Ok(FilterValue::Text(raw.to_string())),
        _ => parse_scalar(value_type, op, raw),
    }
}

fn parse_scalar(value_type: ValueType, op: Operator, raw: &str) -> Result<FilterValue, String> {
    let trimmed = raw.trim();
    match value_type {
        ValueType::Integer => parse_int(trimmed).map(FilterValue::Integer),
        ValueType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FilterValue::Float)
            .ok_or_else(|| format!("\"{trimmed}\" is not a number")),
        ValueType::Text => Ok(FilterValue::Text(raw.to_string())),
        ValueType::TagValue => match (op.is_ordering(), parse_numeric(trimmed)) {
            (true, Some(n)) => Ok(FilterValue::Float(n)),
            _ => Ok(FilterValue::Text(raw.to_string())),
        },
        ValueType::Timestamp => parse_timestamp(trimmed).map(FilterValue::Timestamp),
        ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(FilterValue::Bool(true)),
            "false" | "0" | "no" => Ok(FilterValue::Bool(false)),
            _ => Err(format!("\"{trimmed}\" is not a boolean")),
        },
        ValueType::Status => match trimmed.parse::<ObjectStatus>() {
            Ok(status) => Ok(FilterValue::Integer(i64::from(status.id()))),
            Err(_) => trimmed
                .parse::<i16>()
                .ok()
                .and_then(ObjectStatus::from_id)
                .map(|s| FilterValue::Integer(i64::from(s.id())))
                .ok_or_else(|| format!("\"{trimmed}\" is not a status")),
        },
    }
}

fn parse_int(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("\"{}\" is not an integer", raw.trim()))
}

fn parse_bounded(raw: &str, lo: i64, hi: i64) -> Result<i64, String> {
    let n = parse_int(raw)?;
    if (lo..=hi).contains(&n) {
        Ok(n)
    } else {
        Err(format!("{n} is outside {lo}..={hi}"))
    }
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("\"{raw}\" is not a date or timestamp"))
}

/// One AND-ed filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// The request parameter it came from, view prefix included.
    pub param: String,
    pub target: FieldTarget,
    pub op: Operator,
    pub value: FilterValue,
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub target: FieldTarget,
    pub descending: bool,
}

/// Narrows a collection before permission and visibility rules apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    /// Records of one project (the project itself for Projects).
    Project(DbId),
    /// Records owned by one user.
    OwnedBy(DbId),
    /// Tags of one object.
    TagsOf(DbId),
    /// Tags keyed by one Term.
    TagsWithKey(DbId),
    /// Tags whose key belongs to a taxonomy.
    Taxonomy(String),
}

impl Collection {
    /// Reject narrowings that make no sense for `kind`.
    pub fn check(&self, kind: EntityKind) -> Result<(), CoreError> {
        let ok = match self {
            Collection::Project(_) | Collection::OwnedBy(_) => true,
            Collection::TagsOf(_) | Collection::TagsWithKey(_) | Collection::Taxonomy(_) => {
                kind.is_tag()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::field(
                "collection",
                format!("{self:?} does not apply to {kind} collections"),
            ))
        }
    }
}

/// Page and limit after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    /// Row offset, or `None` when the page can never hold rows.
    pub fn offset(&self) -> Option<i64> {
        if self.page < 1 {
            return None;
        }
        (self.page - 1).checked_mul(self.limit)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total_count: i64,
    pub current_page: i64,
    pub limit: i64,
    pub num_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    /// Out-of-range pages carry no rows and point nowhere.
    pub fn new(rows: Vec<T>, total_count: i64, pagination: Pagination) -> Self {
        let limit = pagination.limit.max(1);
        let num_pages = ((total_count + limit - 1) / limit).max(1);
        let current = pagination.page;
        let in_range = (1..=num_pages).contains(&current);
        Self {
            rows,
            total_count,
            current_page: current,
            limit,
            num_pages,
            has_next: in_range && current < num_pages,
            has_prev: in_range && current > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            rows: self.rows.into_iter().map(f).collect(),
            total_count: self.total_count,
            current_page: self.current_page,
            limit: self.limit,
            num_pages: self.num_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

/// The request-dependent part of a list query.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewPlan {
    pub kind: EntityKind,
    /// Fields whose values are returned with each row.
    pub fields: Vec<Field>,
    /// Free-text query and the targets it is matched against.
    pub search: Option<String>,
    pub search_targets: Vec<FieldTarget>,
    pub filters: Vec<Filter>,
    pub order: Vec<SortKey>,
    pub pagination: Pagination,
}

impl ViewPlan {
    /// Distinct tag targets referenced anywhere in the plan, by slot.
    pub fn tag_targets(&self) -> Vec<&FieldTarget> {
        let mut out: Vec<&FieldTarget> = Vec::new();
        let all = self
            .fields
            .iter()
            .map(|f| &f.target)
            .chain(self.filters.iter().map(|f| &f.target))
            .chain(self.order.iter().map(|s| &s.target));
        for target in all {
            if let FieldTarget::Tag { slot, .. } = target {
                let seen = out
                    .iter()
                    .any(|t| matches!(t, FieldTarget::Tag { slot: s, .. } if s == slot));
                if !seen {
                    out.push(target);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn timestamps_in_three_shapes() {
        let a = parse_timestamp("2020-01-01").unwrap();
        assert_eq!((a.year(), a.hour()), (2020, 0));
        let b = parse_timestamp("2020-01-01T10:30:00Z").unwrap();
        assert_eq!(b.hour(), 10);
        let c = parse_timestamp("2020-01-01 10:30:00").unwrap();
        assert_eq!(b, c);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn tag_ordering_operands_prefer_numbers() {
        assert_eq!(
            parse_value(ValueType::TagValue, Operator::Gt, "7.5"),
            Ok(FilterValue::Float(7.5))
        );
        assert_eq!(
            parse_value(ValueType::TagValue, Operator::Gt, "abc"),
            Ok(FilterValue::Text("abc".into()))
        );
        assert_eq!(
            parse_value(ValueType::TagValue, Operator::Exact, "7.5"),
            Ok(FilterValue::Text("7.5".into()))
        );
    }

    #[test]
    fn status_by_name_or_id() {
        assert_eq!(
            parse_value(ValueType::Status, Operator::Exact, "published"),
            Ok(FilterValue::Integer(3))
        );
        assert_eq!(
            parse_value(ValueType::Status, Operator::Exact, "2"),
            Ok(FilterValue::Integer(2))
        );
        assert!(parse_value(ValueType::Status, Operator::Exact, "9").is_err());
    }

    #[test]
    fn ranges_and_date_parts() {
        assert_eq!(
            parse_value(ValueType::Integer, Operator::Range, "1,5"),
            Ok(FilterValue::Range(
                Box::new(FilterValue::Integer(1)),
                Box::new(FilterValue::Integer(5))
            ))
        );
        assert!(parse_value(ValueType::Integer, Operator::Range, "1").is_err());
        assert!(parse_value(ValueType::Timestamp, Operator::Month, "13").is_err());
        assert_eq!(
            parse_value(ValueType::Timestamp, Operator::Year, "2020"),
            Ok(FilterValue::Integer(2020))
        );
        assert_eq!(
            parse_value(ValueType::Text, Operator::Regex, r"(l)\1"),
            Ok(FilterValue::Text(r"(l)\1".into()))
        );
    }

    #[test]
    fn page_math() {
        let p = Page::new(vec![1, 2], 12, Pagination { page: 2, limit: 5 });
        assert_eq!(p.num_pages, 3);
        assert!(p.has_next && p.has_prev);

        let last = Page::<i32>::new(vec![], 12, Pagination { page: 3, limit: 5 });
        assert!(!last.has_next && last.has_prev);

        let beyond = Page::<i32>::new(vec![], 12, Pagination { page: 99, limit: 5 });
        assert!(!beyond.has_next && !beyond.has_prev);

        let empty = Page::<i32>::new(vec![], 0, Pagination { page: 1, limit: 10 });
        assert_eq!(empty.num_pages, 1);
        assert!(!empty.has_next && !empty.has_prev);
    }

    #[test]
    fn offsets() {
        assert_eq!(Pagination { page: 1, limit: 10 }.offset(), Some(0));
        assert_eq!(Pagination { page: 3, limit: 10 }.offset(), Some(20));
        assert_eq!(Pagination { page: 0, limit: 10 }.offset(), None);
        assert_eq!(Pagination { page: -4, limit: 10 }.offset(), None);
        assert_eq!(Pagination { page: i64::MAX, limit: 10 }.offset(), None);
    }

    #[test]
    fn collections_checked_against_kind() {
        assert!(Collection::TagsOf(1).check(EntityKind::SampleTag).is_ok());
        assert!(Collection::TagsOf(1).check(EntityKind::Sample).is_err());
        assert!(Collection::Project(1).check(EntityKind::Project).is_ok());
    }
}
