//! Query execution against a row store
//!
//! A [`RowStore`] runs rendered statements. [`execute`] drives one
//! [`QueryPlan`] through it: count, window, fetch, and for computed
//! orderings the capped in-memory sort.

pub mod duckdb;

pub use self::duckdb::DuckdbStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::QueryError;
use crate::filter::condition::{Expr, SqlType};
use crate::ordering::{Row, SORT_COLUMN_PREFIX, apply_cap, dedup_distinct, sort_rows};
use crate::pagination::{PageInfo, Window, assemble};
use crate::query::QueryPlan;
use crate::schema::FieldType;
use crate::sql::{SqlDialect, Statement};

/// How a projected column is turned back into JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    Plain,
    /// Text column holding a JSON document
    Json,
}

#[derive(Debug, Clone)]
pub struct OutputColumn {
    pub name: String,
    pub decode: Decode,
}

/// Rows of one page plus page metadata in page mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_info: Option<PageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl QueryResult {
    fn empty(page_info: Option<PageInfo>, total_count: Option<u64>) -> Self {
        Self {
            rows: Vec::new(),
            page_info,
            total_count,
        }
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    fn dialect(&self) -> &'static dyn SqlDialect;

    /// Run a `SELECT COUNT(*)` statement
    async fn count(&self, stmt: Statement) -> Result<u64, QueryError>;

    /// Run a select whose projection matches `columns` one to one
    async fn fetch(&self, stmt: Statement, columns: Vec<OutputColumn>)
    -> Result<Vec<Row>, QueryError>;
}

/// Execute a plan and return the requested page
pub async fn execute(store: &dyn RowStore, plan: &QueryPlan) -> Result<QueryResult, QueryError> {
    if plan.matches_nothing() {
        tracing::debug!(model = %plan.model, "Filter matches nothing, store skipped");
        let (_, page_info) = assemble(&plan.pagination, 0);
        let total = plan.pagination.needs_total().then_some(0);
        return Ok(QueryResult::empty(page_info, total));
    }

    if plan.sort.is_in_memory() {
        return execute_in_memory(store, plan).await;
    }

    let dialect = store.dialect();
    let total = if plan.pagination.needs_total() {
        Some(store.count(plan.count_statement(dialect)).await?)
    } else {
        None
    };
    let (window, page_info) = assemble(&plan.pagination, total.unwrap_or(0));
    if total == Some(0) {
        return Ok(QueryResult::empty(page_info, total));
    }

    let (projection, columns) = output_projection(plan, false);
    let stmt = plan.select_statement(dialect, &projection, Some(window));
    let rows = store.fetch(stmt, columns).await?;
    tracing::debug!(model = %plan.model, rows = rows.len(), total = ?total, "Query executed");

    Ok(QueryResult {
        rows,
        page_info,
        total_count: total,
    })
}

/// Fetch at most `cap + 1` candidates in store order, cap, sort, apply
/// `distinctOn`, then page
async fn execute_in_memory(
    store: &dyn RowStore,
    plan: &QueryPlan,
) -> Result<QueryResult, QueryError> {
    let Some(memory) = &plan.sort.memory else {
        return Ok(QueryResult::empty(None, None));
    };
    let dialect = store.dialect();
    let (projection, columns) = output_projection(plan, true);
    let fetch_limit = u64::try_from(memory.cap).unwrap_or(u64::MAX).saturating_add(1);
    let stmt = plan.select_statement(
        dialect,
        &projection,
        Some(Window {
            offset: 0,
            limit: fetch_limit,
        }),
    );
    let mut rows = store.fetch(stmt, columns).await?;

    apply_cap(&mut rows, memory.cap, memory.warn_on_cap, &plan.model);
    sort_rows(&mut rows, &memory.keys, &plan.model, &plan.properties);
    dedup_distinct(&mut rows, &memory.distinct_columns);

    // the total is capped as well, paging never reaches past the cap
    let total = rows.len() as u64;
    let (window, page_info) = assemble(&plan.pagination, total);
    let (start, end) = window.bounds(rows.len());
    let mut page: Vec<Row> = rows.drain(start..end).collect();
    for row in &mut page {
        row.retain(|name, _| !name.starts_with(SORT_COLUMN_PREFIX));
    }
    tracing::debug!(
        model = %plan.model,
        candidates = total,
        rows = page.len(),
        "Query executed with in-memory ordering"
    );

    Ok(QueryResult {
        rows: page,
        page_info,
        total_count: plan.pagination.needs_total().then_some(total),
    })
}

/// Model fields (plus hidden sort columns) with casts that keep every value
/// representable as JSON
pub fn output_projection(
    plan: &QueryPlan,
    with_sort_columns: bool,
) -> (Vec<(String, Expr)>, Vec<OutputColumn>) {
    let mut projection = Vec::new();
    let mut columns = Vec::new();

    let field_types = plan.descriptor.ordered_fields().map(|f| f.field_type);
    for ((name, expr), field_type) in plan.projection().into_iter().zip(field_types) {
        let (expr, decode) = match field_type {
            FieldType::Date | FieldType::Datetime | FieldType::Uuid => {
                (expr.cast(SqlType::Text), Decode::Plain)
            }
            FieldType::Json => (expr.cast(SqlType::Text), Decode::Json),
            FieldType::Array => (expr.cast(SqlType::Json).cast(SqlType::Text), Decode::Json),
            _ => (expr, Decode::Plain),
        };
        columns.push(OutputColumn {
            name: name.clone(),
            decode,
        });
        projection.push((name, expr));
    }

    if with_sort_columns {
        for (name, expr) in &plan.sort.sort_columns {
            columns.push(OutputColumn {
                name: name.clone(),
                decode: Decode::Plain,
            });
            projection.push((name.clone(), expr.clone()));
        }
    }

    (projection, columns)
}

/// Parse a decoded text column; unparsable documents are kept as text
pub(crate) fn decode_json(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) => serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
        other => other,
    }
}
