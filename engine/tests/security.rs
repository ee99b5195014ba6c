mod common;

use serde_json::{Value as JsonValue, json};

use querygate_engine::core::{EngineConfig, SecurityConfig};

use common::{PRODUCTS, engine, engine_with, ids, query, store};

fn nested_and(levels: usize) -> JsonValue {
    let mut node = json!({"price": {"gt": 0}});
    for _ in 0..levels {
        node = json!({"AND": [node]});
    }
    node
}

#[tokio::test]
async fn test_depth_limit_matches_nothing() {
    let store = store(PRODUCTS).await;
    let engine = engine();

    // a leaf under ten groups has depth 11
    let result = query(
        &engine,
        &store,
        json!({"model": "product", "where": nested_and(10)}),
    )
    .await
    .unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.total_count, Some(0));
    let info = result.page_info.unwrap();
    assert_eq!((info.current_page, info.page_count), (1, 0));

    let within = query(
        &engine,
        &store,
        json!({"model": "product", "where": nested_and(9)}),
    )
    .await
    .unwrap();
    assert_eq!(within.rows.len(), 10);
}

#[tokio::test]
async fn test_clause_limit_matches_nothing() {
    let store = store(PRODUCTS).await;
    let clauses: Vec<JsonValue> = (0..51).map(|i| json!({"price": {"gt": i}})).collect();
    let result = query(
        &engine(),
        &store,
        json!({"model": "product", "where": {"OR": clauses}}),
    )
    .await
    .unwrap();
    assert!(result.rows.is_empty());
}

#[tokio::test]
async fn test_unsafe_regex_rejected_anywhere_in_tree() {
    let store = store(PRODUCTS).await;
    let engine = engine();
    for filter in [
        json!({"name": {"regex": "(.*)+"}}),
        json!({"OR": [{"price": {"gt": 0}}, {"name": {"iregex": "(a+)*b"}}]}),
        json!({"reviews_some": {"product": {"name": {"regex": "(x|x)*"}}}}),
    ] {
        let result = query(&engine, &store, json!({"model": "product", "where": filter}))
            .await
            .unwrap();
        assert!(result.rows.is_empty(), "unsafe regex matched rows: {:?}", filter);
    }

    let safe = query(
        &engine,
        &store,
        json!({"model": "product", "where": {"name": {"regex": "^(Lap|Mou)"}}}),
    )
    .await
    .unwrap();
    assert_eq!(ids(&safe), vec![1, 2]);
}

#[tokio::test]
async fn test_unsafe_regex_allowed_when_check_disabled() {
    let store = store(PRODUCTS).await;
    let engine = engine_with(EngineConfig {
        security: SecurityConfig {
            reject_unsafe_regex: false,
            ..Default::default()
        },
        ..Default::default()
    });
    let result = query(
        &engine,
        &store,
        json!({"model": "product", "where": {"name": {"regex": "^(La.*)+$"}}}),
    )
    .await
    .unwrap();
    assert_eq!(ids(&result), vec![1, 7]);
}

#[tokio::test]
async fn test_oversized_regex_matches_nothing() {
    let store = store(PRODUCTS).await;
    let pattern = "a".repeat(501);
    let result = query(
        &engine(),
        &store,
        json!({"model": "product", "where": {"name": {"regex": pattern}}}),
    )
    .await
    .unwrap();
    assert!(result.rows.is_empty());
}

#[tokio::test]
async fn test_include_ids_survive_rejected_filter() {
    let store = store(PRODUCTS).await;
    let result = query(
        &engine(),
        &store,
        json!({"model": "product", "where": nested_and(20), "include": [4, 9]}),
    )
    .await
    .unwrap();
    assert_eq!(ids(&result), vec![4, 9]);
}
