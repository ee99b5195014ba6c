//! Request pipeline
//!
//! resolve fragments -> validate -> compile filter -> compile ordering ->
//! check pagination. The result is a [`QueryPlan`]: a dialect-neutral
//! description of one bounded query, handed to a store executor.
//!
//! Security violations never leave this module. They are logged and the
//! filter becomes a predicate that matches nothing.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::config::EngineConfig;
use crate::descriptor::{Descriptor, DescriptorCache};
use crate::error::{FilterError, QueryError};
use crate::filter::ast::Value;
use crate::filter::compiler::{FilterCompiler, ROOT_ALIAS, typed_param};
use crate::filter::condition::{Condition, Expr, TableRef};
use crate::filter::validator::validate;
use crate::ordering::{OrderingCompiler, PropertyRegistry, SortPlan};
use crate::pagination::{PaginationRequest, Window};
use crate::resolver::{
    FilterSources, InMemorySavedFilters, OwnerOrShared, Resolver, SavedFilterAccess,
    SavedFilterRef, SavedFilterStore,
};
use crate::schema::{AllowedFields, FeatureFlags, Schema};
use crate::sql::{SelectParts, SqlDialect, Statement};

/// Client query request, as received over the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub model: String,
    #[serde(default, rename = "where")]
    pub filter: JsonValue,
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default)]
    pub saved_filter: Option<SavedFilterRef>,
    #[serde(default)]
    pub quick: Option<String>,
    /// Primary keys always returned, whatever the filter says
    #[serde(default)]
    pub include: Vec<JsonValue>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub distinct_on: Vec<String>,
    #[serde(default)]
    pub pagination: Option<PaginationRequest>,
}

impl QueryRequest {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }
}

/// Per-request caller context
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub viewer: Option<String>,
    /// Authorised field set; `None` allows every schema field
    pub allowed_fields: Option<AllowedFields>,
    /// Clock for relative date filters; wall clock (UTC) when unset
    pub now: Option<NaiveDateTime>,
}

impl RequestContext {
    pub fn viewer(mut self, viewer: &str) -> Self {
        self.viewer = Some(viewer.to_string());
        self
    }

    pub fn allowed_fields(mut self, allowed: AllowedFields) -> Self {
        self.allowed_fields = Some(allowed);
        self
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn clock(&self) -> NaiveDateTime {
        self.now.unwrap_or_else(|| Utc::now().naive_utc())
    }
}

/// One compiled, bounded query
#[derive(Clone)]
pub struct QueryPlan {
    pub model: String,
    pub descriptor: Arc<Descriptor>,
    pub filter: Condition,
    pub sort: SortPlan,
    pub pagination: PaginationRequest,
    pub properties: Arc<PropertyRegistry>,
}

impl std::fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan")
            .field("model", &self.model)
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

impl QueryPlan {
    pub fn from_table(&self) -> TableRef {
        TableRef {
            table: self.descriptor.table.clone(),
            alias: ROOT_ALIAS.to_string(),
        }
    }

    /// Every field of the model, in declaration order
    pub fn projection(&self) -> Vec<(String, Expr)> {
        self.descriptor
            .ordered_fields()
            .map(|f| (f.name.clone(), Expr::column(ROOT_ALIAS, &f.column)))
            .collect()
    }

    pub fn count_statement(&self, dialect: &dyn SqlDialect) -> Statement {
        let from = self.from_table();
        self.parts(&from).count(dialect)
    }

    pub fn select_statement(
        &self,
        dialect: &dyn SqlDialect,
        projection: &[(String, Expr)],
        window: Option<Window>,
    ) -> Statement {
        let from = self.from_table();
        self.parts(&from)
            .select(dialect, projection, window.map(|w| (w.limit, w.offset)))
    }

    /// Whether the filter can match nothing, so the store can be skipped
    pub fn matches_nothing(&self) -> bool {
        self.filter.is_never()
    }

    fn parts<'p>(&'p self, from: &'p TableRef) -> SelectParts<'p> {
        SelectParts {
            from,
            filter: &self.filter,
            distinct_on: &self.sort.distinct_on,
            order_by: &self.sort.terms,
        }
    }
}

/// Shared, per-schema query engine
pub struct QueryEngine {
    config: EngineConfig,
    schema: Arc<Schema>,
    features: FeatureFlags,
    descriptors: DescriptorCache,
    saved: Arc<dyn SavedFilterStore>,
    access: Arc<dyn SavedFilterAccess>,
    properties: Arc<PropertyRegistry>,
}

impl QueryEngine {
    pub fn new(schema: Arc<Schema>, config: EngineConfig) -> Self {
        // capability flags declared by the schema win over engine config
        let features = schema.features.unwrap_or(config.features);
        let descriptors = DescriptorCache::new(Arc::clone(&schema), config.cache.max_entries);
        tracing::debug!(
            schema = %schema.name,
            models = schema.models.len(),
            cache_entries = config.cache.max_entries,
            "Query engine created"
        );
        Self {
            config,
            schema,
            features,
            descriptors,
            saved: Arc::new(InMemorySavedFilters::new()),
            access: Arc::new(OwnerOrShared),
            properties: Arc::new(PropertyRegistry::new()),
        }
    }

    pub fn with_saved_filters(mut self, store: Arc<dyn SavedFilterStore>) -> Self {
        self.saved = store;
        self
    }

    pub fn with_access(mut self, access: Arc<dyn SavedFilterAccess>) -> Self {
        self.access = access;
        self
    }

    pub fn with_properties(mut self, properties: PropertyRegistry) -> Self {
        self.properties = Arc::new(properties);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    pub fn saved_filters(&self) -> &Arc<dyn SavedFilterStore> {
        &self.saved
    }

    /// Build the plan for one request
    pub async fn plan(
        &self,
        request: &QueryRequest,
        ctx: &RequestContext,
    ) -> Result<QueryPlan, QueryError> {
        let model = request.model.as_str();
        let descriptor = self.descriptors.get(model)?;

        let pagination = request
            .pagination
            .unwrap_or_else(|| PaginationRequest::default_page(&self.config.pagination));
        pagination.check(&self.config.pagination)?;

        let resolver = Resolver::new(
            &self.schema,
            self.features,
            self.saved.as_ref(),
            self.access.as_ref(),
        );
        let tree = resolver
            .resolve(
                model,
                FilterSources {
                    saved: request.saved_filter.as_ref(),
                    presets: &request.presets,
                    ad_hoc: &request.filter,
                    quick: request.quick.as_deref(),
                },
                ctx.viewer.as_deref(),
                ctx.allowed_fields.as_ref(),
            )
            .await?;

        let mut compiler = FilterCompiler::new(&self.descriptors, self.features, ctx.clock());

        let filter = match validate(&tree, &self.config.security) {
            Ok(()) => compiler.compile(model, &tree)?,
            Err(violations) => {
                for violation in &violations {
                    violation.log(model);
                }
                Condition::Never
            }
        };
        let filter = self.with_include(&descriptor, filter, &request.include)?;

        let sort = OrderingCompiler::new(&mut compiler, &self.properties, &self.config.ordering)
            .compile(&descriptor, ROOT_ALIAS, &request.order_by, &request.distinct_on)?;

        tracing::debug!(
            model,
            order_keys = sort.keys.len(),
            in_memory = sort.is_in_memory(),
            "Query planned"
        );

        Ok(QueryPlan {
            model: model.to_string(),
            descriptor,
            filter,
            sort,
            pagination,
            properties: Arc::clone(&self.properties),
        })
    }

    /// OR the explicit include list onto the primary key
    fn with_include(
        &self,
        descriptor: &Descriptor,
        filter: Condition,
        include: &[JsonValue],
    ) -> Result<Condition, QueryError> {
        if include.is_empty() {
            return Ok(filter);
        }
        let values = include
            .iter()
            .map(|id| match id {
                JsonValue::String(_) | JsonValue::Number(_) => Value::from_json(id)
                    .map(|value| typed_param(descriptor.primary_key_type, &value))
                    .ok_or_else(|| {
                        FilterError::operand(
                            descriptor.primary_key.as_str(),
                            "include",
                            "integer out of range",
                        )
                    }),
                _ => Err(FilterError::operand(
                    descriptor.primary_key.as_str(),
                    "include",
                    "ids must be strings or numbers",
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Condition::or(vec![
            filter,
            Condition::InList {
                expr: Expr::column(ROOT_ALIAS, &descriptor.primary_key),
                values,
                negated: false,
            },
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::DuckdbDialect;
    use serde_json::json;

    const SHOP: &str = r#"{
        "name": "shop",
        "models": [{
            "name": "product", "table": "products",
            "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"},
                {"name": "brand", "type": "string"},
                {"name": "price", "type": "numeric"}
            ],
            "presets": {"premium": {"price": {"gte": 100}}}
        }]
    }"#;

    fn engine() -> QueryEngine {
        QueryEngine::new(
            Arc::new(Schema::from_json_str(SHOP).unwrap()),
            EngineConfig::default(),
        )
    }

    fn request(value: JsonValue) -> QueryRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_plan_renders_filter_order_and_window() {
        let plan = engine()
            .plan(
                &request(json!({
                    "model": "product",
                    "where": {"price": {"between": [100, 500]}},
                    "presets": ["premium"],
                    "orderBy": ["-price"],
                    "pagination": {"page": 2, "perPage": 10}
                })),
                &RequestContext::default(),
            )
            .await
            .unwrap();
        let stmt = plan.select_statement(
            &DuckdbDialect,
            &plan.projection(),
            Some(Window {
                offset: 10,
                limit: 10,
            }),
        );
        assert_eq!(
            stmt.sql,
            "SELECT t0.\"id\" AS \"id\", t0.\"name\" AS \"name\", t0.\"brand\" AS \"brand\", \
             t0.\"price\" AS \"price\" FROM \"products\" AS t0 \
             WHERE (t0.\"price\" >= ? AND t0.\"price\" BETWEEN ? AND ?) \
             ORDER BY t0.\"price\" DESC NULLS LAST, t0.\"id\" ASC NULLS LAST LIMIT 10 OFFSET 10"
        );
        assert_eq!(
            stmt.params,
            vec![Value::Int(100), Value::Int(100), Value::Int(500)]
        );
    }

    #[tokio::test]
    async fn test_violation_yields_no_match_not_error() {
        let mut nested = json!({"price": {"gt": 1}});
        for _ in 0..12 {
            nested = json!({"AND": [nested]});
        }
        let plan = engine()
            .plan(
                &request(json!({"model": "product", "where": nested})),
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(plan.matches_nothing());
    }

    #[tokio::test]
    async fn test_include_survives_violation() {
        let plan = engine()
            .plan(
                &request(json!({
                    "model": "product",
                    "where": {"name": {"regex": "(a+)+$"}},
                    "include": ["p1"]
                })),
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(!plan.matches_nothing());
        let stmt = plan.count_statement(&DuckdbDialect);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"products\" AS t0 WHERE t0.\"id\" IN (?)"
        );
    }

    #[tokio::test]
    async fn test_client_errors_surface() {
        let engine = engine();
        let ctx = RequestContext::default();
        let err = engine
            .plan(&request(json!({"model": "order"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MODEL");

        let err = engine
            .plan(
                &request(json!({"model": "product", "where": {"colour": {"eq": "red"}}})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_FIELD");

        let err = engine
            .plan(
                &request(json!({"model": "product", "pagination": {"page": 1, "perPage": 0}})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PAGINATION");

        let err = engine
            .plan(
                &request(json!({"model": "product", "presets": ["missing"]})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_PRESET");
    }

    #[tokio::test]
    async fn test_default_pagination() {
        let plan = engine()
            .plan(&QueryRequest::new("product"), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(
            plan.pagination,
            PaginationRequest::Page {
                page: 1,
                per_page: 25
            }
        );
        assert_eq!(plan.filter, Condition::Always);
    }
}
