//! Shared fixtures for end-to-end tests against an in-memory DuckDB store

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use querygate_engine::core::EngineConfig;
use querygate_engine::ordering::PropertyRegistry;
use querygate_engine::resolver::InMemorySavedFilters;
use querygate_engine::store::{self, DuckdbStore, QueryResult};
use querygate_engine::{QueryEngine, QueryError, QueryRequest, RequestContext, Schema};

pub const SCHEMA: &str = r#"{
    "name": "shop",
    "features": {"enable_window_filters": true, "enable_subquery_filters": true},
    "models": [
        {
            "name": "product",
            "table": "products",
            "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"},
                {"name": "brand", "type": "string"},
                {"name": "price", "type": "numeric"},
                {"name": "cost", "type": "numeric"},
                {"name": "isActive", "type": "boolean", "column": "is_active"},
                {"name": "createdAt", "type": "datetime", "column": "created_at"},
                {"name": "tags", "type": "array"}
            ],
            "relations": [
                {"name": "category", "target": "category", "kind": "foreign_key", "column": "category_id"},
                {"name": "reviews", "target": "review", "kind": "reverse", "column": "product_id"}
            ],
            "properties": ["margin"],
            "presets": {
                "premium": {"price": {"gte": 100}},
                "active": {"isActive": {"eq": true}}
            },
            "quick_search": ["name", "brand"]
        },
        {
            "name": "category",
            "table": "categories",
            "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"}
            ],
            "relations": [
                {"name": "products", "target": "product", "kind": "reverse", "column": "category_id"}
            ]
        },
        {
            "name": "review",
            "table": "reviews",
            "fields": [
                {"name": "id", "type": "id"},
                {"name": "rating", "type": "numeric"}
            ],
            "relations": [
                {"name": "product", "target": "product", "kind": "foreign_key", "column": "product_id"}
            ]
        }
    ]
}"#;

const TABLES: &str = "
CREATE TABLE categories (id INTEGER PRIMARY KEY, name VARCHAR);
CREATE TABLE products (
    id INTEGER PRIMARY KEY,
    name VARCHAR,
    brand VARCHAR,
    price DOUBLE,
    cost DOUBLE,
    is_active BOOLEAN,
    created_at TIMESTAMP,
    tags VARCHAR[],
    category_id INTEGER
);
CREATE TABLE reviews (id INTEGER PRIMARY KEY, product_id INTEGER, rating INTEGER);
";

/// Ten products over three categories, six reviews on products 1, 3 and 5
pub const PRODUCTS: &str = "
INSERT INTO categories VALUES (1, 'Electronics'), (2, 'Office'), (3, 'Learning');
INSERT INTO products VALUES
    (1,  'Laptop',   'acme',  999.0,  700.0, true,  '2024-01-10 09:00:00', ['python', 'django', 'rust'], 1),
    (2,  'Mouse',    'acme',   25.0,   10.0, true,  '2024-02-01 10:00:00', ['hardware'], 1),
    (3,  'Keyboard', 'bolt',  100.0,   60.0, true,  '2024-02-15 11:00:00', ['hardware', 'python'], 1),
    (4,  'Monitor',  'bolt',  500.0,  350.0, false, '2024-03-01 12:00:00', [], 1),
    (5,  'Desk',     'cedar', 250.0,  100.0, true,  '2024-01-20 08:00:00', ['furniture'], 2),
    (6,  'Chair',    'cedar', 150.0,   90.0, false, '2024-02-20 08:30:00', ['furniture', 'django'], 2),
    (7,  'Lamp',     'cedar',  40.0,   15.0, true,  '2024-03-05 14:00:00', NULL, 2),
    (8,  'Course',   'dune',  499.99,  50.0, true,  '2024-03-10 16:00:00', ['python', 'django'], 3),
    (9,  'Book',     'dune',  501.0,   20.0, true,  '2024-01-05 07:00:00', ['python'], 3),
    (10, 'Poster',   'dune',   99.99,   5.0, true,  '2024-02-28 18:00:00', ['django', 'art'], 3);
INSERT INTO reviews VALUES (1, 1, 5), (2, 1, 4), (3, 1, 3), (4, 3, 5), (5, 3, 2), (6, 5, 1);
";

/// 47 active products priced 1..=47
pub const BULK_PRODUCTS: &str = "
INSERT INTO categories VALUES (1, 'Bulk');
INSERT INTO products
SELECT i, 'item ' || CAST(i AS VARCHAR), 'bulk', i * 1.0, 0.0, true,
       TIMESTAMP '2024-01-01 00:00:00' + to_hours(i), CAST([] AS VARCHAR[]), 1
FROM range(1, 48) t(i);
";

pub async fn store(fixture: &str) -> DuckdbStore {
    let store = DuckdbStore::in_memory().unwrap();
    store.execute_batch(TABLES).await.unwrap();
    store.execute_batch(fixture).await.unwrap();
    store
}

pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::from_json_str(SCHEMA).unwrap())
}

/// Price minus cost
pub fn properties() -> PropertyRegistry {
    PropertyRegistry::new().with("product", "margin", |row| {
        match (
            row.get("price").and_then(JsonValue::as_f64),
            row.get("cost").and_then(JsonValue::as_f64),
        ) {
            (Some(price), Some(cost)) => JsonValue::from(price - cost),
            _ => JsonValue::Null,
        }
    })
}

pub fn engine() -> QueryEngine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> QueryEngine {
    let saved = InMemorySavedFilters::from_json(&serde_json::json!([
        {"id": "sf-1", "name": "acmeOrBolt", "model": "product",
         "filterJson": {"brand": {"in": ["acme", "bolt"]}},
         "ownerId": "alice", "isShared": true},
        {"id": "sf-2", "name": "private", "model": "product",
         "filterJson": {"price": {"lt": 50}},
         "ownerId": "alice", "isShared": false}
    ]))
    .unwrap();
    QueryEngine::new(schema(), config)
        .with_saved_filters(Arc::new(saved))
        .with_properties(properties())
}

/// Fixed clock: 2024-03-15 12:00
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub async fn query(
    engine: &QueryEngine,
    store: &DuckdbStore,
    request: JsonValue,
) -> Result<QueryResult, QueryError> {
    query_as(engine, store, request, RequestContext::default().at(now())).await
}

pub async fn query_as(
    engine: &QueryEngine,
    store: &DuckdbStore,
    request: JsonValue,
    ctx: RequestContext,
) -> Result<QueryResult, QueryError> {
    let request: QueryRequest = serde_json::from_value(request).unwrap();
    let plan = engine.plan(&request, &ctx).await?;
    store::execute(store, &plan).await
}

pub fn ids(result: &QueryResult) -> Vec<i64> {
    result
        .rows
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}
