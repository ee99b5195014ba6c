//! Model metadata
//!
//! Declarative, immutable description of the data model: models, their
//! fields and relations, presets, quick-search paths and computed properties.
//! Loaded once at startup and shared behind an `Arc`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EngineError, FilterError};

/// Primary key column used when a model does not declare one
pub const DEFAULT_PRIMARY_KEY: &str = "id";

// =============================================================================
// Fields and relations
// =============================================================================

/// Semantic field type, which decides the allowed operator set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Numeric,
    Boolean,
    Date,
    Datetime,
    Json,
    Id,
    Uuid,
    Array,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Json => "json",
            Self::Id => "id",
            Self::Uuid => "uuid",
            Self::Array => "array",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Datetime)
    }

    /// Types whose values have a meaningful total order in the store
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Numeric | Self::Date | Self::Datetime | Self::Id | Self::Boolean
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    /// Store column, defaults to the field name
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldMeta {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: None,
            field_type,
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// How a relation joins to its target model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// To-one: `source.column = target.pk`
    ForeignKey { column: String },
    /// To-many: `target.column = source.pk`
    Reverse { column: String },
    /// To-many through a join table
    ManyToMany {
        through: String,
        source_column: String,
        target_column: String,
    },
}

impl RelationKind {
    pub fn is_to_many(&self) -> bool {
        !matches!(self, Self::ForeignKey { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMeta {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

// =============================================================================
// Models
// =============================================================================

/// Per-model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMeta {
    pub name: String,
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub relations: Vec<RelationMeta>,
    /// Computed sort keys, implemented in a `PropertyRegistry`
    #[serde(default)]
    pub properties: Vec<String>,
    /// Named filter fragments, immutable once defined
    #[serde(default)]
    pub presets: BTreeMap<String, JsonValue>,
    /// Dotted string paths searched by the `quick` request term
    #[serde(default)]
    pub quick_search: Vec<String>,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl ModelMeta {
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    pub fn preset(&self, name: &str) -> Option<&JsonValue> {
        self.presets.get(name)
    }

    /// Field whose column is the primary key, if declared
    pub fn primary_key_field(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.column() == self.primary_key)
    }
}

// =============================================================================
// Capability flags
// =============================================================================

/// Capability toggles for optional filter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    WindowFilters,
    SubqueryFilters,
    ConditionalAggregation,
    ArrayFilters,
    FieldComparison,
    DistinctCount,
    DateTruncFilters,
    ExtractDateFilters,
}

impl Feature {
    pub fn flag_name(&self) -> &'static str {
        match self {
            Self::WindowFilters => "enable_window_filters",
            Self::SubqueryFilters => "enable_subquery_filters",
            Self::ConditionalAggregation => "enable_conditional_aggregation",
            Self::ArrayFilters => "enable_array_filters",
            Self::FieldComparison => "enable_field_comparison",
            Self::DistinctCount => "enable_distinct_count",
            Self::DateTruncFilters => "enable_date_trunc_filters",
            Self::ExtractDateFilters => "enable_extract_date_filters",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_window_filters: bool,
    pub enable_subquery_filters: bool,
    pub enable_conditional_aggregation: bool,
    pub enable_array_filters: bool,
    pub enable_field_comparison: bool,
    pub enable_distinct_count: bool,
    pub enable_date_trunc_filters: bool,
    pub enable_extract_date_filters: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_window_filters: false,
            enable_subquery_filters: false,
            enable_conditional_aggregation: true,
            enable_array_filters: true,
            enable_field_comparison: true,
            enable_distinct_count: true,
            enable_date_trunc_filters: true,
            enable_extract_date_filters: true,
        }
    }
}

impl FeatureFlags {
    /// Every capability enabled
    pub fn all() -> Self {
        Self {
            enable_window_filters: true,
            enable_subquery_filters: true,
            enable_conditional_aggregation: true,
            enable_array_filters: true,
            enable_field_comparison: true,
            enable_distinct_count: true,
            enable_date_trunc_filters: true,
            enable_extract_date_filters: true,
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::WindowFilters => self.enable_window_filters,
            Feature::SubqueryFilters => self.enable_subquery_filters,
            Feature::ConditionalAggregation => self.enable_conditional_aggregation,
            Feature::ArrayFilters => self.enable_array_filters,
            Feature::FieldComparison => self.enable_field_comparison,
            Feature::DistinctCount => self.enable_distinct_count,
            Feature::DateTruncFilters => self.enable_date_trunc_filters,
            Feature::ExtractDateFilters => self.enable_extract_date_filters,
        }
    }

    pub fn require(&self, feature: Feature) -> Result<(), FilterError> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(FilterError::FeatureNotEnabled(feature))
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub models: Vec<ModelMeta>,
    /// Per-schema capability flags; the engine config applies when absent
    #[serde(default)]
    pub features: Option<FeatureFlags>,
}

impl Schema {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Invalid schema JSON: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        tracing::debug!(path = %path.display(), "Loading schema file");
        let content = fs::read_to_string(path)?;
        let schema = Self::from_json_str(&content)?;
        tracing::debug!(
            schema = %schema.name,
            models = schema.models.len(),
            "Schema loaded"
        );
        Ok(schema)
    }

    pub fn model(&self, name: &str) -> Result<&ModelMeta, FilterError> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| FilterError::UnknownModel(name.to_string()))
    }
}

// =============================================================================
// Allowed fields
// =============================================================================

/// Field set the caller is authorised to filter on.
///
/// Patterns are dotted paths (`category.name`), relation wildcards
/// (`category.*`) or `*` for everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedFields {
    patterns: HashSet<String>,
}

impl AllowedFields {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(["*"])
    }

    pub fn allows(&self, path: &str) -> bool {
        if self.patterns.contains("*") || self.patterns.contains(path) {
            return true;
        }
        self.patterns.iter().any(|p| {
            p.strip_suffix(".*")
                .is_some_and(|prefix| path.starts_with(prefix) && path[prefix.len()..].starts_with('.'))
        })
    }

    /// A relation is reachable when it or anything below it is allowed
    pub fn allows_relation(&self, path: &str) -> bool {
        if self.allows(path) {
            return true;
        }
        let prefix = format!("{}.", path);
        self.patterns.iter().any(|p| p.starts_with(&prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "name": "shop",
        "models": [
            {
                "name": "product",
                "table": "products",
                "fields": [
                    {"name": "id", "type": "id"},
                    {"name": "createdAt", "column": "created_at", "type": "datetime"}
                ],
                "relations": [
                    {"name": "category", "target": "category", "kind": "foreign_key", "column": "category_id"},
                    {"name": "tags", "target": "tag", "kind": "many_to_many",
                     "through": "product_tags", "source_column": "product_id", "target_column": "tag_id"}
                ],
                "presets": {"recent": {"createdAt": {"thisMonth": true}}}
            }
        ]
    }"#;

    #[test]
    fn test_schema_parse() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let product = schema.model("product").unwrap();
        assert_eq!(product.primary_key, "id");
        assert_eq!(product.field("createdAt").unwrap().column(), "created_at");
        assert_eq!(
            product.relation("category").unwrap().kind,
            RelationKind::ForeignKey {
                column: "category_id".to_string()
            }
        );
        assert!(product.relation("tags").unwrap().kind.is_to_many());
        assert!(product.preset("recent").is_some());
        assert!(schema.features.is_none());
    }

    #[test]
    fn test_unknown_model() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert_eq!(
            schema.model("order").unwrap_err(),
            FilterError::UnknownModel("order".to_string())
        );
    }

    #[test]
    fn test_invalid_schema_json() {
        let err = Schema::from_json_str("{").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_feature_defaults() {
        let flags = FeatureFlags::default();
        assert!(!flags.is_enabled(Feature::WindowFilters));
        assert!(!flags.is_enabled(Feature::SubqueryFilters));
        assert!(flags.is_enabled(Feature::ArrayFilters));
        assert!(flags.require(Feature::DistinctCount).is_ok());
        assert_eq!(
            flags.require(Feature::WindowFilters),
            Err(FilterError::FeatureNotEnabled(Feature::WindowFilters))
        );
    }

    #[test]
    fn test_feature_flags_partial_json() {
        let flags: FeatureFlags = serde_json::from_str(r#"{"enable_window_filters": true}"#).unwrap();
        assert!(flags.enable_window_filters);
        assert!(!flags.enable_subquery_filters);
        assert!(flags.enable_field_comparison);
    }

    #[test]
    fn test_allowed_fields() {
        let allowed = AllowedFields::new(["price", "category.*"]);
        assert!(allowed.allows("price"));
        assert!(allowed.allows("category.name"));
        assert!(!allowed.allows("categoryName"));
        assert!(!allowed.allows("name"));
        assert!(allowed.allows_relation("category"));
        assert!(!allowed.allows_relation("reviews"));
    }

    #[test]
    fn test_allowed_fields_nested_pattern() {
        let allowed = AllowedFields::new(["reviews.rating"]);
        assert!(allowed.allows_relation("reviews"));
        assert!(allowed.allows("reviews.rating"));
        assert!(!allowed.allows("reviews.body"));
        assert!(AllowedFields::all().allows("anything.at.all"));
    }
}
