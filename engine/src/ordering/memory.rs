//! In-memory ordering for computed properties
//!
//! Computed keys have no store column, so the store materialises at most
//! `max_property_ordering_results` candidate rows (already in store order)
//! and they are sorted here. Persisted keys that share the ordering travel
//! along as hidden `__sortN` columns so the full key sequence is honoured.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

/// A row as returned by the store, keyed by field name
pub type Row = Map<String, JsonValue>;

/// Computes a property value from a row
pub type PropertyFn = Arc<dyn Fn(&Row) -> JsonValue + Send + Sync>;

/// Rust implementations of the computed properties declared in the schema
#[derive(Clone, Default)]
pub struct PropertyRegistry {
    properties: HashMap<(String, String), PropertyFn>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, model: &str, name: &str, f: F)
    where
        F: Fn(&Row) -> JsonValue + Send + Sync + 'static,
    {
        self.properties
            .insert((model.to_string(), name.to_string()), Arc::new(f));
    }

    pub fn with<F>(mut self, model: &str, name: &str, f: F) -> Self
    where
        F: Fn(&Row) -> JsonValue + Send + Sync + 'static,
    {
        self.register(model, name, f);
        self
    }

    pub fn get(&self, model: &str, name: &str) -> Option<&PropertyFn> {
        self.properties.get(&(model.to_string(), name.to_string()))
    }

    pub fn contains(&self, model: &str, name: &str) -> bool {
        self.get(model, name).is_some()
    }
}

impl std::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.properties.keys().collect();
        keys.sort();
        f.debug_struct("PropertyRegistry")
            .field("properties", &keys)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryKey {
    /// Hidden projected column carrying a persisted sort value
    Column { name: String, descending: bool },
    Property { name: String, descending: bool },
}

/// Sort rows by `keys`. Nulls sort last in both directions and the sort is
/// stable, so ties keep the store order.
pub fn sort_rows(rows: &mut Vec<Row>, keys: &[MemoryKey], model: &str, registry: &PropertyRegistry) {
    let mut decorated: Vec<(Vec<JsonValue>, Row)> = rows
        .drain(..)
        .map(|row| {
            let values = keys
                .iter()
                .map(|key| match key {
                    MemoryKey::Column { name, .. } => row.get(name).cloned().unwrap_or(JsonValue::Null),
                    MemoryKey::Property { name, .. } => registry
                        .get(model, name)
                        .map(|f| f(&row))
                        .unwrap_or(JsonValue::Null),
                })
                .collect();
            (values, row)
        })
        .collect();

    decorated.sort_by(|(a, _), (b, _)| {
        for (i, key) in keys.iter().enumerate() {
            let descending = match key {
                MemoryKey::Column { descending, .. } | MemoryKey::Property { descending, .. } => {
                    *descending
                }
            };
            let ord = compare_nulls_last(&a[i], &b[i], descending);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    rows.extend(decorated.into_iter().map(|(_, row)| row));
}

/// Drop rows beyond `cap`. Returns whether anything was dropped.
pub fn apply_cap(rows: &mut Vec<Row>, cap: usize, warn_on_cap: bool, model: &str) -> bool {
    if rows.len() <= cap {
        return false;
    }
    rows.truncate(cap);
    if warn_on_cap {
        tracing::warn!(model, cap, "Property ordering capped, sorting only the first rows");
    } else {
        tracing::debug!(model, cap, "Property ordering capped");
    }
    true
}

/// Keep the first row of each run sharing `columns`. Rows must already be
/// sorted with those columns leading.
pub fn dedup_distinct(rows: &mut Vec<Row>, columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    rows.dedup_by(|later, kept| columns.iter().all(|name| later.get(name) == kept.get(name)));
}

fn compare_nulls_last(a: &JsonValue, b: &JsonValue, descending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_values(a, b);
            if descending { ord.reverse() } else { ord }
        }
    }
}

/// Total order over non-null JSON scalars; mixed types order by kind
fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[JsonValue]) -> Vec<Row> {
        values
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn names(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
    }

    fn registry() -> PropertyRegistry {
        PropertyRegistry::new().with("product", "margin", |row| {
            match (row.get("price").and_then(JsonValue::as_f64), row.get("cost").and_then(JsonValue::as_f64)) {
                (Some(p), Some(c)) => json!(p - c),
                _ => JsonValue::Null,
            }
        })
    }

    #[test]
    fn test_sort_by_property_desc_nulls_last() {
        let mut data = rows(&[
            json!({"name": "a", "price": 10.0, "cost": 8.0}),
            json!({"name": "b", "price": 10.0, "cost": null}),
            json!({"name": "c", "price": 20.0, "cost": 5.0}),
        ]);
        let keys = vec![MemoryKey::Property {
            name: "margin".to_string(),
            descending: true,
        }];
        sort_rows(&mut data, &keys, "product", &registry());
        assert_eq!(names(&data), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_column_key_then_property_is_stable() {
        let mut data = rows(&[
            json!({"name": "a", "__sort0": "x", "price": 1.0, "cost": 0.0}),
            json!({"name": "b", "__sort0": "w", "price": 1.0, "cost": 0.0}),
            json!({"name": "c", "__sort0": "x", "price": 5.0, "cost": 0.0}),
            json!({"name": "d", "__sort0": "x", "price": 1.0, "cost": 0.0}),
        ]);
        let keys = vec![
            MemoryKey::Column {
                name: "__sort0".to_string(),
                descending: false,
            },
            MemoryKey::Property {
                name: "margin".to_string(),
                descending: true,
            },
        ];
        sort_rows(&mut data, &keys, "product", &registry());
        assert_eq!(names(&data), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_apply_cap() {
        let mut data = rows(&[json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})]);
        assert!(!apply_cap(&mut data, 3, true, "product"));
        assert!(apply_cap(&mut data, 2, true, "product"));
        assert_eq!(names(&data), vec!["a", "b"]);
    }

    #[test]
    fn test_dedup_distinct_keeps_first_of_each_group() {
        let mut data = rows(&[
            json!({"name": "a", "__sort0": "x"}),
            json!({"name": "b", "__sort0": "x"}),
            json!({"name": "c", "__sort0": null}),
            json!({"name": "d", "__sort0": null}),
            json!({"name": "e", "__sort0": "y"}),
        ]);
        dedup_distinct(&mut data, &["__sort0".to_string()]);
        assert_eq!(names(&data), vec!["a", "c", "e"]);

        let mut untouched = rows(&[json!({"name": "a"}), json!({"name": "b"})]);
        dedup_distinct(&mut untouched, &[]);
        assert_eq!(names(&untouched), vec!["a", "b"]);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert!(registry.contains("product", "margin"));
        assert!(!registry.contains("review", "margin"));
        assert!(format!("{:?}", registry).contains("margin"));
    }
}
