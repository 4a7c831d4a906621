//! Compiles a bound [`ViewPlan`] into a count query and a page query.
//!
//! Conditions are applied in a fixed order: collection narrowing, permission
//! scope, visibility, free-text search, field filters. Every ORDER BY ends
//! with `t.id` so pages are deterministic.

use std::collections::BTreeSet;

use lims_core::dataview::{Collection, Filter, FieldTarget, FilterValue, Operator, Relation, ViewPlan};
use lims_core::permissions::{scope_collection, Action, Actor};

use super::{
    escape_like, owner_chain, quote_literal, scope_condition, visibility_condition, BindValue,
    Binds, OwnerChain,
};

/// SQL for one bound view.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledView {
    /// Select list: `t.id`, the row as JSON and the field values as JSON.
    pub select: String,
    /// `FROM ... WHERE ...`, shared by both queries.
    pub from_where: String,
    pub order_by: String,
    pub binds: Binds,
}

impl CompiledView {
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*)::BIGINT {}", self.from_where)
    }

    /// Page query. `LIMIT`/`OFFSET` are the two placeholders after the shared binds.
    pub fn page_sql(&self) -> String {
        let n = self.binds.len();
        format!(
            "SELECT {} {} ORDER BY {} LIMIT ${} OFFSET ${}",
            self.select,
            self.from_where,
            self.order_by,
            n + 1,
            n + 2
        )
    }
}

fn relation_alias(relation: Relation) -> &'static str {
    match relation {
        Relation::User => "u",
        Relation::Project => "p",
        Relation::Parent => "par",
        Relation::Key => "k",
        Relation::Object => "o1",
    }
}

fn tag_alias(slot: usize) -> String {
    format!("tf{slot}")
}

/// Expression reading `target`. Tag targets read the text value.
pub fn target_expr(target: &FieldTarget) -> String {
    match target {
        FieldTarget::Column(c) => format!("t.{}", c.sql),
        FieldTarget::Relation { relation, column } => {
            format!("{}.{}", relation_alias(*relation), column.sql)
        }
        FieldTarget::Tag { slot, .. } => format!("{}.value", tag_alias(*slot)),
    }
}

fn is_numeric_operand(value: &FilterValue) -> bool {
    match value {
        FilterValue::Float(_) => true,
        FilterValue::Range(lo, hi) => is_numeric_operand(lo) && is_numeric_operand(hi),
        _ => false,
    }
}

fn operand_text(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => s.clone(),
        FilterValue::Integer(n) => n.to_string(),
        FilterValue::Float(n) => n.to_string(),
        FilterValue::Timestamp(ts) => ts.to_rfc3339(),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Range(lo, hi) => format!("{},{}", operand_text(lo), operand_text(hi)),
    }
}

fn bind_operand(value: &FilterValue, binds: &mut Binds) -> String {
    let bind = match value {
        FilterValue::Text(s) => BindValue::Text(s.clone()),
        FilterValue::Integer(n) => BindValue::BigInt(*n),
        FilterValue::Float(n) => BindValue::Float(*n),
        FilterValue::Timestamp(ts) => BindValue::Timestamp(*ts),
        FilterValue::Bool(b) => BindValue::Bool(*b),
        FilterValue::Range(..) => BindValue::Text(operand_text(value)),
    };
    binds.push(bind)
}

fn filter_condition(filter: &Filter, binds: &mut Binds) -> String {
    let expr = match &filter.target {
        FieldTarget::Tag { slot, .. } if is_numeric_operand(&filter.value) => {
            format!("{}.numeric_value", tag_alias(*slot))
        }
        other => target_expr(other),
    };

    let compare = |sql_op: &str, binds: &mut Binds| {
        format!("{expr} {sql_op} {}", bind_operand(&filter.value, binds))
    };
    let pattern = |binds: &mut Binds| {
        binds.push(BindValue::Text(format!(
            "%{}%",
            escape_like(&operand_text(&filter.value))
        )))
    };
    let date_part = |part: &str, binds: &mut Binds| {
        format!(
            "EXTRACT({part} FROM {expr} AT TIME ZONE 'UTC') = {}",
            bind_operand(&filter.value, binds)
        )
    };

    match filter.op {
        Operator::Exact => compare("=", binds),
        Operator::IExact => format!(
            "UPPER({expr}::TEXT) = UPPER({})",
            binds.push(BindValue::Text(operand_text(&filter.value)))
        ),
        Operator::Contains => format!("{expr}::TEXT LIKE {} ESCAPE '\\'", pattern(binds)),
        Operator::IContains => format!("{expr}::TEXT ILIKE {} ESCAPE '\\'", pattern(binds)),
        Operator::Gt => compare(">", binds),
        Operator::Lt => compare("<", binds),
        Operator::Gte => compare(">=", binds),
        Operator::Lte => compare("<=", binds),
        Operator::Range => match &filter.value {
            FilterValue::Range(lo, hi) => format!(
                "{expr} BETWEEN {} AND {}",
                bind_operand(lo, binds),
                bind_operand(hi, binds)
            ),
            single => format!("{expr} = {}", bind_operand(single, binds)),
        },
        Operator::Regex => format!(
            "{expr}::TEXT ~ {}",
            binds.push(BindValue::Text(operand_text(&filter.value)))
        ),
        Operator::IRegex => format!(
            "{expr}::TEXT ~* {}",
            binds.push(BindValue::Text(operand_text(&filter.value)))
        ),
        Operator::Year => date_part("YEAR", binds),
        Operator::Month => date_part("MONTH", binds),
        Operator::Day => date_part("DAY", binds),
    }
}

fn collection_condition(collection: &Collection, chain: &OwnerChain, binds: &mut Binds) -> String {
    match collection {
        Collection::Project(id) => {
            format!("{} = {}", chain.project_expr(), binds.push(BindValue::BigInt(*id)))
        }
        Collection::OwnedBy(user_id) => {
            format!("t.user_id = {}", binds.push(BindValue::BigInt(*user_id)))
        }
        Collection::TagsOf(object_id) => {
            format!("t.object_id = {}", binds.push(BindValue::BigInt(*object_id)))
        }
        Collection::TagsWithKey(term_id) => {
            format!("t.key_id = {}", binds.push(BindValue::BigInt(*term_id)))
        }
        Collection::Taxonomy(taxonomy) => {
            format!("k.taxonomy = {}", binds.push(BindValue::Text(taxonomy.clone())))
        }
    }
}

/// Relations referenced anywhere in the plan, plus the key join the
/// taxonomy narrowing needs.
fn used_relations(plan: &ViewPlan, collections: &[Collection]) -> BTreeSet<&'static str> {
    let mut out = BTreeSet::new();
    let targets = plan
        .fields
        .iter()
        .map(|f| &f.target)
        .chain(plan.search_targets.iter())
        .chain(plan.filters.iter().map(|f| &f.target))
        .chain(plan.order.iter().map(|s| &s.target));
    for target in targets {
        if let FieldTarget::Relation { relation, .. } = target {
            if *relation != Relation::Object {
                out.insert(relation_alias(*relation));
            }
        }
    }
    if collections.iter().any(|c| matches!(c, Collection::Taxonomy(_))) {
        out.insert(relation_alias(Relation::Key));
    }
    out
}

fn relation_join(alias: &str, plan: &ViewPlan) -> String {
    match alias {
        "u" => " LEFT JOIN users u ON u.id = t.user_id".to_string(),
        "p" => " LEFT JOIN projects p ON p.id = t.project_id".to_string(),
        "par" => format!(" LEFT JOIN {} par ON par.id = t.parent_id", plan.kind.table()),
        "k" => " JOIN terms k ON k.id = t.key_id".to_string(),
        _ => String::new(),
    }
}

/// Compile `plan` for `actor`, narrowed by `collections`.
///
/// Collections must already have been checked against the plan's kind.
pub fn compile(plan: &ViewPlan, actor: &Actor, collections: &[Collection]) -> CompiledView {
    let mut binds = Binds::new();
    let chain = owner_chain(plan.kind);

    let mut from = format!("FROM {} t{}", plan.kind.table(), chain.joins);
    for alias in used_relations(plan, collections) {
        from.push_str(&relation_join(alias, plan));
    }
    if let Some(tag_kind) = plan.kind.tag_kind() {
        for target in plan.tag_targets() {
            if let FieldTarget::Tag {
                slot,
                term,
                taxonomy,
            } = target
            {
                let term = binds.push(BindValue::Text(term.clone()));
                let taxonomy = binds.push(BindValue::Text(taxonomy.clone()));
                from.push_str(&format!(
                    " LEFT JOIN LATERAL (SELECT tg.value, tg.numeric_value FROM {table} tg \
                     JOIN terms tk ON tk.id = tg.key_id \
                     WHERE tg.object_id = t.id AND tk.slug = {term} AND tk.taxonomy = {taxonomy} \
                     ORDER BY tg.id DESC LIMIT 1) {alias} ON TRUE",
                    table = tag_kind.table(),
                    alias = tag_alias(*slot),
                ));
            }
        }
    }

    let mut conditions: Vec<String> = collections
        .iter()
        .map(|c| collection_condition(c, &chain, &mut binds))
        .collect();

    let scope = scope_collection(plan.kind, actor, &Action::VIEW);
    if let Some(cond) = scope_condition(&scope, &chain, &mut binds) {
        conditions.push(cond);
    }
    conditions.push(visibility_condition(
        &chain,
        actor.user_id,
        actor.is_staff,
        &mut binds,
    ));

    if let Some(q) = &plan.search {
        if !plan.search_targets.is_empty() {
            let pattern = binds.push(BindValue::Text(format!("%{}%", escape_like(q))));
            let ors: Vec<String> = plan
                .search_targets
                .iter()
                .map(|t| format!("{}::TEXT ILIKE {pattern} ESCAPE '\\'", target_expr(t)))
                .collect();
            conditions.push(format!("({})", ors.join(" OR ")));
        }
    }

    for filter in &plan.filters {
        conditions.push(filter_condition(filter, &mut binds));
    }

    let from_where = format!("{from} WHERE {}", conditions.join(" AND "));

    let mut order: Vec<String> = Vec::new();
    for key in &plan.order {
        let dir = if key.descending { "DESC" } else { "ASC" };
        match &key.target {
            FieldTarget::Tag { slot, .. } => {
                let a = tag_alias(*slot);
                order.push(format!(
                    "{a}.value IS NULL, {a}.numeric_value IS NULL, {a}.numeric_value {dir}, {a}.value {dir}"
                ));
            }
            other => order.push(format!("{} {dir}", target_expr(other))),
        }
    }
    order.push("t.id ASC".to_string());

    let values: Vec<String> = plan
        .fields
        .iter()
        .map(|f| format!("{}, {}", quote_literal(&f.slug), target_expr(&f.target)))
        .collect();
    let select = format!(
        "t.id, to_jsonb(t) AS record, jsonb_build_object({}) AS fields",
        values.join(", ")
    );

    CompiledView {
        select,
        from_where,
        order_by: order.join(", "),
        binds,
    }
}

#[cfg(test)]
mod tests {
    use lims_core::config::CatalogConfig;
    use lims_core::dataview::{presets, RequestParams};
    use lims_core::kind::EntityKind;

    use super::*;

    fn actor(is_staff: bool) -> Actor {
        Actor {
            user_id: 3,
            username: "bob".into(),
            is_staff,
        }
    }

    fn plan(items: &[&str]) -> ViewPlan {
        presets::samples("s")
            .unwrap()
            .with_term_field("ph")
            .unwrap()
            .bind(&RequestParams::from_assignments(items), &CatalogConfig::default())
            .unwrap()
    }

    #[test]
    fn staff_query_has_visibility_but_no_scope() {
        let compiled = compile(&plan(&[]), &actor(true), &[]);
        assert!(!compiled.from_where.contains("project_permissions"));
        assert!(compiled.from_where.contains("t.status_id <> 1"));
        assert!(compiled.order_by.ends_with("t.id ASC"));
    }

    #[test]
    fn ordinary_user_is_scoped_and_sees_own_drafts() {
        let compiled = compile(&plan(&[]), &actor(false), &[]);
        assert!(compiled.from_where.contains("pp.project_id = t.project_id"));
        assert!(compiled.from_where.contains("t.status_id = 2 AND t.user_id ="));
    }

    #[test]
    fn tag_sort_puts_missing_then_non_numeric_last() {
        let compiled = compile(&plan(&["s_order=-ph"]), &actor(true), &[]);
        assert_eq!(
            compiled.order_by,
            "tf0.value IS NULL, tf0.numeric_value IS NULL, tf0.numeric_value DESC, tf0.value DESC, t.id ASC"
        );
        assert!(compiled.from_where.contains("LEFT JOIN LATERAL"));
        assert!(compiled.from_where.contains("FROM sample_tags tg"));
    }

    #[test]
    fn numeric_tag_filter_reads_cached_number() {
        let compiled = compile(&plan(&["s_ph__gte=7"]), &actor(true), &[]);
        assert!(compiled.from_where.contains("tf0.numeric_value >= $"));
        assert!(compiled.binds.values().contains(&BindValue::Float(7.0)));
    }

    #[test]
    fn search_ors_searchable_fields() {
        let compiled = compile(&plan(&["s_q=50%"]), &actor(true), &[]);
        assert!(compiled.from_where.contains("t.name::TEXT ILIKE"));
        assert!(compiled.from_where.contains("u.username::TEXT ILIKE"));
        assert!(compiled
            .binds
            .values()
            .contains(&BindValue::Text("%50\\%%".into())));
    }

    #[test]
    fn user_relation_is_joined_once() {
        let compiled = compile(&plan(&["s_user__icontains=al", "s_order=user"]), &actor(true), &[]);
        assert_eq!(compiled.from_where.matches("LEFT JOIN users u").count(), 1);
        assert!(compiled.order_by.starts_with("u.username ASC"));
    }

    #[test]
    fn collections_narrow_before_scope() {
        let compiled = compile(&plan(&[]), &actor(false), &[Collection::Project(9)]);
        // The tag column's lateral join and the scope subquery have WHERE
        // clauses of their own; the outer one follows the last join.
        let (_, where_clause) = compiled.from_where.rsplit_once(" ON TRUE WHERE ").unwrap();
        assert!(where_clause.starts_with("t.project_id = $3 AND "));
        let scope_at = where_clause
            .find("EXISTS (SELECT 1 FROM project_permissions")
            .unwrap();
        assert!(where_clause.find("t.project_id = $3").unwrap() < scope_at);
        assert_eq!(compiled.binds.values()[2], BindValue::BigInt(9));
    }

    #[test]
    fn taxonomy_collection_joins_key() {
        let view = presets::tags("t", EntityKind::SampleTag).unwrap();
        let plan = view
            .bind(&RequestParams::new(), &CatalogConfig::default())
            .unwrap();
        let compiled = compile(&plan, &actor(false), &[Collection::Taxonomy("Sample".into())]);
        assert_eq!(compiled.from_where.matches("JOIN terms k ON k.id = t.key_id").count(), 1);
        assert!(compiled.from_where.contains("JOIN samples o1 ON o1.id = t.object_id"));
        assert!(compiled.from_where.contains("o1.status_id = 3"));
    }

    #[test]
    fn page_placeholders_follow_shared_binds() {
        let compiled = compile(&plan(&[]), &actor(false), &[]);
        let n = compiled.binds.len();
        assert!(compiled
            .page_sql()
            .ends_with(&format!("LIMIT ${} OFFSET ${}", n + 1, n + 2)));
        assert!(compiled.count_sql().starts_with("SELECT COUNT(*)::BIGINT FROM samples t"));
    }

    #[test]
    fn date_parts_extract_in_utc() {
        let compiled = compile(&plan(&["s_collected__year=2020"]), &actor(true), &[]);
        assert!(compiled
            .from_where
            .contains("EXTRACT(YEAR FROM t.collected AT TIME ZONE 'UTC') = $"));
    }
}
