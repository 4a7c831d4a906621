//! Runs DataView plans against the database.

use lims_core::config::CatalogConfig;
use lims_core::dataview::{Collection, DataView, FilterValue, Operator, Page, RequestParams, ViewPlan};
use lims_core::error::ValidationErrors;
use lims_core::permissions::Actor;
use sqlx::PgPool;

use crate::error::{is_invalid_regex, StoreResult};
use crate::models::dataview::ViewRow;
use crate::sql::dataview::compile;
use crate::sql::{bind_values, bind_values_scalar, BindValue};

/// Executes bound DataViews.
pub struct DataViewRepo;

impl DataViewRepo {
    /// Bind request parameters to `view`, narrowed by `collections`, and
    /// fetch one page of rows visible to `actor`.
    ///
    /// The total is counted first; pages past the end come back empty.
    pub async fn bind(
        pool: &PgPool,
        actor: &Actor,
        view: &DataView,
        collections: &[Collection],
        params: &RequestParams,
        config: &CatalogConfig,
    ) -> StoreResult<Page<ViewRow>> {
        for collection in collections {
            collection.check(view.kind())?;
        }
        let plan = view.bind(params, config)?;
        Self::check_patterns(pool, &plan).await?;
        let compiled = compile(&plan, actor, collections);

        let count_sql = compiled.count_sql();
        let total: i64 =
            bind_values_scalar(sqlx::query_scalar(&count_sql), compiled.binds.values())
                .fetch_one(pool)
                .await?;

        let rows = match plan.pagination.offset() {
            Some(offset) if offset < total => {
                let page_sql = compiled.page_sql();
                let mut values = compiled.binds.values().to_vec();
                values.push(BindValue::BigInt(plan.pagination.limit));
                values.push(BindValue::BigInt(offset));
                bind_values(sqlx::query_as::<_, ViewRow>(&page_sql), &values)
                    .fetch_all(pool)
                    .await?
            }
            _ => Vec::new(),
        };

        tracing::debug!(
            view = %view.name(),
            user_id = actor.user_id,
            total,
            page = plan.pagination.page,
            rows = rows.len(),
            "Bound data view"
        );
        Ok(Page::new(rows, total, plan.pagination))
    }

    /// Compile every regex operand in Postgres, whose dialect the query runs
    /// with. Each bad pattern is reported against its request parameter.
    async fn check_patterns(pool: &PgPool, plan: &ViewPlan) -> StoreResult<()> {
        let mut errors = ValidationErrors::new();
        for filter in &plan.filters {
            let sql = match filter.op {
                Operator::Regex => "SELECT '' ~ $1",
                Operator::IRegex => "SELECT '' ~* $1",
                _ => continue,
            };
            let FilterValue::Text(pattern) = &filter.value else {
                continue;
            };
            match sqlx::query_scalar::<_, bool>(sql).bind(pattern).fetch_one(pool).await {
                Ok(_) => {}
                Err(err) if is_invalid_regex(&err) => {
                    let detail = err
                        .as_database_error()
                        .map(|e| e.message().trim_start_matches("invalid regular expression: ").to_string())
                        .unwrap_or_default();
                    errors.add(filter.param.clone(), format!("Invalid regular expression: {detail}"));
                }
                Err(err) => return Err(err.into()),
            }
        }
        errors.into_result()?;
        Ok(())
    }
}
