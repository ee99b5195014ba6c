//! Per-model shape descriptors
//!
//! A [`Descriptor`] is the compiled, immutable view of one model: field to
//! column/operator map and relation shapes. Descriptors are built once per
//! (schema, model) and shared through the [`DescriptorCache`]. Relation
//! shapes name their target model; the target's descriptor is fetched from
//! the same cache, so cyclic schemas need no special handling.

mod cache;

pub use cache::DescriptorCache;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, QueryError};
use crate::filter::ast::FieldPath;
use crate::filter::operators::{Operator, operators_for};
use crate::schema::{FieldType, RelationKind, Schema};

#[derive(Debug, Clone)]
pub struct FieldShape {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub operators: &'static [Operator],
}

#[derive(Debug, Clone)]
pub struct RelationShape {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
}

impl RelationShape {
    pub fn is_to_many(&self) -> bool {
        self.kind.is_to_many()
    }
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub model: String,
    pub table: String,
    pub primary_key: String,
    pub primary_key_type: FieldType,
    pub fields: HashMap<String, FieldShape>,
    /// Declaration order, used for select lists
    pub field_order: Vec<String>,
    pub relations: HashMap<String, RelationShape>,
    pub properties: Vec<String>,
    pub quick_search: Vec<FieldPath>,
}

/// Descriptor build failure (fatal for the request)
#[derive(Debug, Clone)]
pub struct DescriptorError {
    pub model: String,
    pub reason: String,
}

impl std::fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.model, self.reason)
    }
}

impl std::error::Error for DescriptorError {}

impl From<DescriptorError> for EngineError {
    fn from(err: DescriptorError) -> Self {
        EngineError::DescriptorBuild {
            model: err.model,
            reason: err.reason,
        }
    }
}

impl Descriptor {
    pub fn build(schema: &Schema, model_name: &str) -> Result<Self, DescriptorError> {
        let fail = |reason: String| DescriptorError {
            model: model_name.to_string(),
            reason,
        };

        let model = schema
            .model(model_name)
            .map_err(|_| fail("model is not declared in the schema".to_string()))?;

        let mut fields = HashMap::with_capacity(model.fields.len());
        let mut field_order = Vec::with_capacity(model.fields.len());
        for field in &model.fields {
            let shape = FieldShape {
                name: field.name.clone(),
                column: field.column().to_string(),
                field_type: field.field_type,
                operators: operators_for(field.field_type),
            };
            if fields.insert(field.name.clone(), shape).is_some() {
                return Err(fail(format!("duplicate field '{}'", field.name)));
            }
            field_order.push(field.name.clone());
        }

        let mut relations = HashMap::with_capacity(model.relations.len());
        for relation in &model.relations {
            if fields.contains_key(&relation.name) {
                return Err(fail(format!(
                    "relation '{}' collides with a field of the same name",
                    relation.name
                )));
            }
            if schema.model(&relation.target).is_err() {
                return Err(fail(format!(
                    "relation '{}' targets unknown model '{}'",
                    relation.name, relation.target
                )));
            }
            let shape = RelationShape {
                name: relation.name.clone(),
                target: relation.target.clone(),
                kind: relation.kind.clone(),
            };
            if relations.insert(relation.name.clone(), shape).is_some() {
                return Err(fail(format!("duplicate relation '{}'", relation.name)));
            }
        }

        for property in &model.properties {
            if fields.contains_key(property) {
                return Err(fail(format!(
                    "property '{}' collides with a persisted field",
                    property
                )));
            }
        }

        let mut quick_search = Vec::with_capacity(model.quick_search.len());
        for dotted in &model.quick_search {
            let path = FieldPath::parse(dotted);
            match resolve_field_type(schema, model_name, &path) {
                Some(FieldType::String) => quick_search.push(path),
                _ => {
                    return Err(fail(format!(
                        "quick search path '{}' is not a string field",
                        dotted
                    )));
                }
            }
        }

        let primary_key_type = model
            .primary_key_field()
            .map(|f| f.field_type)
            .unwrap_or(FieldType::Id);

        tracing::trace!(
            model = model_name,
            fields = fields.len(),
            relations = relations.len(),
            "Descriptor built"
        );

        Ok(Self {
            model: model.name.clone(),
            table: model.table.clone(),
            primary_key: model.primary_key.clone(),
            primary_key_type,
            fields,
            field_order,
            relations,
            properties: model.properties.clone(),
            quick_search,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldShape> {
        self.fields.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationShape> {
        self.relations.get(name)
    }

    /// Allowed operators for a field of this model
    pub fn field_operators(&self, name: &str) -> Option<&'static [Operator]> {
        self.fields.get(name).map(|f| f.operators)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    /// Fields in declaration order
    pub fn ordered_fields(&self) -> impl Iterator<Item = &FieldShape> {
        self.field_order.iter().filter_map(|name| self.fields.get(name))
    }
}

/// Walk a dotted path through the schema and return the leaf field type
fn resolve_field_type(schema: &Schema, model: &str, path: &FieldPath) -> Option<FieldType> {
    let mut current = schema.model(model).ok()?;
    for hop in path.hops() {
        let relation = current.relation(hop)?;
        current = schema.model(&relation.target).ok()?;
    }
    current.field(path.leaf()).map(|f| f.field_type)
}

/// Source of descriptors for the compilers
pub trait DescriptorSource: Send + Sync {
    fn descriptor(&self, model: &str) -> Result<Arc<Descriptor>, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(json: &str) -> Schema {
        Schema::from_json_str(json).unwrap()
    }

    const SHOP: &str = r#"{
        "name": "shop",
        "models": [
            {"name": "product", "table": "products",
             "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"},
                {"name": "price", "type": "numeric"}
             ],
             "relations": [{"name": "category", "target": "category", "kind": "foreign_key", "column": "category_id"}],
             "properties": ["margin"],
             "quick_search": ["name", "category.name"]},
            {"name": "category", "table": "categories",
             "fields": [{"name": "id", "type": "id"}, {"name": "name", "type": "string"}],
             "relations": [{"name": "products", "target": "product", "kind": "reverse", "column": "category_id"}]}
        ]
    }"#;

    #[test]
    fn test_build_descriptor() {
        let d = Descriptor::build(&schema(SHOP), "product").unwrap();
        assert_eq!(d.table, "products");
        assert_eq!(d.primary_key, "id");
        assert_eq!(d.primary_key_type, FieldType::Id);
        assert!(d.field_operators("price").unwrap().contains(&Operator::Between));
        assert!(!d.field_operators("name").unwrap().contains(&Operator::Between));
        assert!(!d.relation("category").unwrap().is_to_many());
        assert!(d.has_property("margin"));
        assert_eq!(d.quick_search.len(), 2);
        let names: Vec<&str> = d.ordered_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "price"]);
    }

    #[test]
    fn test_cyclic_relations_build() {
        let s = schema(SHOP);
        let category = Descriptor::build(&s, "category").unwrap();
        assert!(category.relation("products").unwrap().is_to_many());
    }

    #[test]
    fn test_unknown_relation_target() {
        let s = schema(
            r#"{"name": "s", "models": [{"name": "a", "table": "a",
                "fields": [{"name": "id", "type": "id"}],
                "relations": [{"name": "b", "target": "missing", "kind": "foreign_key", "column": "b_id"}]}]}"#,
        );
        let err = Descriptor::build(&s, "a").unwrap_err();
        assert!(err.reason.contains("unknown model 'missing'"));
        let engine: EngineError = err.into();
        assert!(matches!(engine, EngineError::DescriptorBuild { .. }));
    }

    #[test]
    fn test_quick_search_must_be_string() {
        let s = schema(
            r#"{"name": "s", "models": [{"name": "a", "table": "a",
                "fields": [{"name": "id", "type": "id"}, {"name": "n", "type": "numeric"}],
                "quick_search": ["n"]}]}"#,
        );
        assert!(Descriptor::build(&s, "a").is_err());
    }

    #[test]
    fn test_duplicate_field() {
        let s = schema(
            r#"{"name": "s", "models": [{"name": "a", "table": "a",
                "fields": [{"name": "id", "type": "id"}, {"name": "id", "type": "string"}]}]}"#,
        );
        assert!(Descriptor::build(&s, "a").unwrap_err().reason.contains("duplicate field"));
    }
}
