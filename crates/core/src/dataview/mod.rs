//! Declarative, request-driven list views.
//!
//! A [`DataView`] names a set of fields over one [`EntityKind`]. Binding it to
//! request parameters yields a [`ViewPlan`] (search, filters, sort keys,
//! pagination) which the store compiles together with the permission scope
//! and the visibility rule.
//!
//! Every parameter is namespaced as `<view name>_<param>`:
//!
//! | Parameter             | Meaning                                          |
//! |-----------------------|--------------------------------------------------|
//! | `q`                   | case-insensitive search over searchable fields   |
//! | `<field>__<operator>` | filter, only when the field allows the operator  |
//! | `order`               | `slug` or `-slug`, repeatable or comma separated |
//! | `page`                | 1-based page number                              |
//! | `limit`               | page size, clamped to the configured maximum     |

pub mod field;
pub mod params;
pub mod plan;
pub mod presets;

use crate::config::CatalogConfig;
use crate::error::{CoreError, ValidationErrors};
use crate::kind::EntityKind;

pub use field::{Field, FieldSpec, FieldTarget, Operator, Relation, ValueType};
pub use params::RequestParams;
pub use plan::{Collection, Filter, FilterValue, Page, Pagination, SortKey, ViewPlan};

/// Legacy parameter names accepted alongside the short ones.
const ORDER_PARAMS: [&str; 2] = ["order", "order_variable"];
const PAGE_PARAMS: [&str; 2] = ["page", "page_number"];
const LIMIT_PARAMS: [&str; 2] = ["limit", "item_limit"];

#[derive(Debug, Clone, PartialEq)]
pub struct DataView {
    name: String,
    kind: EntityKind,
    fields: Vec<Field>,
    default_order: Vec<SortKey>,
    default_limit: Option<i64>,
    /// `(term, taxonomy)` per tag slot.
    tag_slots: Vec<(String, String)>,
}

impl DataView {
    /// Resolve `fields` against `kind`. The default order is `-modified`.
    pub fn new(name: &str, kind: EntityKind, fields: Vec<FieldSpec>) -> Result<Self, CoreError> {
        let mut errors = ValidationErrors::new();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            errors.add("name", "View name must be non-empty ASCII letters, digits or '_'");
        }

        let mut view = Self {
            name: name.to_string(),
            kind,
            fields: Vec::with_capacity(fields.len()),
            default_order: Vec::new(),
            default_limit: None,
            tag_slots: Vec::new(),
        };
        for spec in &fields {
            match view.push_field(spec) {
                Ok(()) => {}
                Err(CoreError::Validation(e)) => errors.extend(e),
                Err(other) => return Err(other),
            }
        }
        errors.into_result()?;

        view.default_order(&["-modified"])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, slug: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.slug == slug)
    }

    /// Add a field showing the value of the tag keyed by `term_slug`.
    pub fn with_term_field(mut self, term_slug: &str) -> Result<Self, CoreError> {
        let spec = FieldSpec::new(&format!("tags.{term_slug}"))
            .slug(term_slug)
            .label(term_slug);
        self.push_field(&spec)?;
        Ok(self)
    }

    /// Replace the fallback sort with `tokens` (`slug` or `-slug`).
    ///
    /// Tokens may name a field of the view or any column path of the kind.
    pub fn default_order(mut self, tokens: &[&str]) -> Result<Self, CoreError> {
        let mut keys = Vec::with_capacity(tokens.len());
        for token in tokens {
            let (descending, name) = split_direction(token);
            let target = match self.field(name).map(|f| f.target.clone()) {
                Some(target) => target,
                None => {
                    let mut target = field::resolve_path(self.kind, name)
                        .map_err(|msg| CoreError::field("default_order", msg))?;
                    self.assign_slot(&mut target);
                    target
                }
            };
            keys.push(SortKey { target, descending });
        }
        self.default_order = keys;
        Ok(self)
    }

    /// Page size used when the request names none; defaults to the configured one.
    pub fn default_limit(mut self, limit: i64) -> Self {
        self.default_limit = Some(limit.max(1));
        self
    }

    fn push_field(&mut self, spec: &FieldSpec) -> Result<(), CoreError> {
        if self.field(&spec.slug).is_some() {
            return Err(CoreError::field(
                format!("fields.{}", spec.slug),
                "Duplicate field slug",
            ));
        }
        let mut field = spec.resolve(self.kind)?;
        self.assign_slot(&mut field.target);
        self.fields.push(field);
        Ok(())
    }

    /// Give tag targets a slot shared by every target naming the same Term.
    fn assign_slot(&mut self, target: &mut FieldTarget) {
        if let FieldTarget::Tag {
            slot,
            term,
            taxonomy,
        } = target
        {
            let key = (term.clone(), taxonomy.clone());
            *slot = match self.tag_slots.iter().position(|k| *k == key) {
                Some(existing) => existing,
                None => {
                    self.tag_slots.push(key);
                    self.tag_slots.len() - 1
                }
            };
        }
    }

    /// Bind request parameters into a plan.
    ///
    /// Unknown parameters, unknown fields and disallowed operators are
    /// ignored. Unparseable `page`/`limit` fall back to defaults. Filter
    /// values that fail to parse are reported together.
    pub fn bind(&self, params: &RequestParams, config: &CatalogConfig) -> Result<ViewPlan, CoreError> {
        let scoped = params.strip_prefix(&format!("{}_", self.name));
        let mut errors = ValidationErrors::new();

        let search = scoped
            .get("q")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        let search_targets = if search.is_some() {
            self.fields
                .iter()
                .filter(|f| f.searchable)
                .map(|f| f.target.clone())
                .collect()
        } else {
            Vec::new()
        };

        let mut filters = Vec::new();
        for (key, raw) in scoped.iter() {
            let Some((slug, op_name)) = key.rsplit_once("__") else {
                continue;
            };
            let Some(field) = self.field(slug) else {
                tracing::debug!(view = %self.name, param = %key, "Ignoring filter on unknown field");
                continue;
            };
            let Ok(op) = op_name.parse::<Operator>() else {
                continue;
            };
            if !field.allows(op) {
                tracing::debug!(view = %self.name, param = %key, "Ignoring disallowed operator");
                continue;
            }
            if raw.is_empty() {
                continue;
            }
            let param = format!("{}_{key}", self.name);
            match plan::parse_value(field.value_type, op, raw) {
                Ok(value) => filters.push(Filter {
                    param,
                    target: field.target.clone(),
                    op,
                    value,
                }),
                Err(msg) => errors.add(param, msg),
            }
        }
        errors.into_result()?;

        let order = self.bind_order(&scoped);
        let pagination = self.bind_pagination(&scoped, config);

        Ok(ViewPlan {
            kind: self.kind,
            fields: self.fields.clone(),
            search,
            search_targets,
            filters,
            order,
            pagination,
        })
    }

    fn bind_order(&self, scoped: &RequestParams) -> Vec<SortKey> {
        let order: Vec<SortKey> = ORDER_PARAMS
            .iter()
            .flat_map(|p| scoped.get_all(p))
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|token| {
                let (descending, slug) = split_direction(token);
                self.field(slug)
                    .filter(|f| f.sortable)
                    .map(|f| SortKey {
                        target: f.target.clone(),
                        descending,
                    })
            })
            .collect();
        if order.is_empty() {
            self.default_order.clone()
        } else {
            order
        }
    }

    fn bind_pagination(&self, scoped: &RequestParams, config: &CatalogConfig) -> Pagination {
        let first = |names: [&str; 2]| names.iter().find_map(|n| scoped.get(n));
        let default_limit = self
            .default_limit
            .unwrap_or(config.default_page_limit)
            .min(config.max_page_limit);

        let page = first(PAGE_PARAMS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(1);
        let limit = first(LIMIT_PARAMS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .min(config.max_page_limit);

        Pagination { page, limit }
    }
}

fn split_direction(token: &str) -> (bool, &str) {
    match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn samples() -> DataView {
        DataView::new(
            "s",
            EntityKind::Sample,
            vec![
                FieldSpec::new("slug"),
                FieldSpec::new("name"),
                FieldSpec::new("collected"),
                FieldSpec::new("user").slug("user"),
                FieldSpec::new("description").unsortable().searchable(false),
            ],
        )
        .unwrap()
        .with_term_field("ph")
        .unwrap()
    }

    fn bind(view: &DataView, pairs: &[(&str, &str)]) -> Result<ViewPlan, CoreError> {
        view.bind(
            &RequestParams::from_pairs(pairs.iter().copied()),
            &CatalogConfig::default(),
        )
    }

    #[test]
    fn defaults_without_params() {
        let plan = bind(&samples(), &[]).unwrap();
        assert_eq!(plan.pagination, Pagination { page: 1, limit: 10 });
        assert!(plan.search.is_none());
        assert!(plan.filters.is_empty());
        assert_eq!(plan.order.len(), 1);
        assert!(plan.order[0].descending);
        assert_matches!(&plan.order[0].target, FieldTarget::Column(c) if c.sql == "modified_at");
    }

    #[test]
    fn params_outside_prefix_are_ignored() {
        let plan = bind(&samples(), &[("t_q", "x"), ("q", "y"), ("s_page", "2")]).unwrap();
        assert!(plan.search.is_none());
        assert_eq!(plan.pagination.page, 2);
    }

    #[test]
    fn search_uses_searchable_fields_only() {
        let plan = bind(&samples(), &[("s_q", " soil ")]).unwrap();
        assert_eq!(plan.search.as_deref(), Some("soil"));
        // slug, name, user, ph
        assert_eq!(plan.search_targets.len(), 4);
    }

    #[test]
    fn filters_are_whitelisted() {
        let plan = bind(
            &samples(),
            &[
                ("s_name__icontains", "a"),
                ("s_name__year", "2020"),
                ("s_password__exact", "x"),
                ("s_name__like", "x"),
                ("s_collected__year", "2020"),
                ("s_slug__exact", ""),
            ],
        )
        .unwrap();
        assert_eq!(plan.filters.len(), 2);
        assert_eq!(plan.filters[0].op, Operator::IContains);
        assert_eq!(plan.filters[1].value, FilterValue::Integer(2020));
    }

    #[test]
    fn malformed_filter_values_reported_together() {
        let err = bind(
            &samples(),
            &[("s_collected__year", "soon"), ("s_collected__gt", "tomorrow")],
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(ref e) if e.len() == 2);
    }

    #[test]
    fn order_tokens_validated() {
        let plan = bind(
            &samples(),
            &[("s_order", "-ph,bogus"), ("s_order", "name"), ("s_order", "description")],
        )
        .unwrap();
        assert_eq!(plan.order.len(), 2);
        assert!(plan.order[0].descending);
        assert_matches!(&plan.order[0].target, FieldTarget::Tag { term, .. } if term == "ph");
        assert!(!plan.order[1].descending);

        let plan = bind(&samples(), &[("s_order", "bogus")]).unwrap();
        assert_matches!(&plan.order[0].target, FieldTarget::Column(c) if c.name == "modified");
    }

    #[test]
    fn legacy_parameter_names() {
        let plan = bind(
            &samples(),
            &[("s_order_variable", "name"), ("s_page_number", "3"), ("s_item_limit", "25")],
        )
        .unwrap();
        assert_eq!(plan.pagination, Pagination { page: 3, limit: 25 });
        assert_eq!(plan.order.len(), 1);
    }

    #[test]
    fn pagination_falls_back_and_clamps() {
        let plan = bind(&samples(), &[("s_page", "two"), ("s_limit", "-5")]).unwrap();
        assert_eq!(plan.pagination, Pagination { page: 1, limit: 10 });
        let plan = bind(&samples(), &[("s_limit", "100000")]).unwrap();
        assert_eq!(plan.pagination.limit, 1000);
    }

    #[test]
    fn tag_fields_share_slots_per_term() {
        let view = samples().with_term_field("depth").unwrap();
        let slots: Vec<usize> = view
            .fields()
            .iter()
            .filter_map(|f| match f.target {
                FieldTarget::Tag { slot, .. } => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1]);
        let view = view.default_order(&["-ph"]).unwrap();
        assert_matches!(&view.default_order[0].target, FieldTarget::Tag { slot: 0, .. });
        assert!(samples().with_term_field("ph").is_err());
    }

    #[test]
    fn invalid_definitions_rejected() {
        let err = DataView::new(
            "bad name",
            EntityKind::Sample,
            vec![FieldSpec::new("nope"), FieldSpec::new("key")],
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(ref e) if e.len() == 3);
        assert!(DataView::new("t", EntityKind::TermTag, vec![])
            .unwrap()
            .with_term_field("x")
            .is_err());
    }
}
