//! Preset and saved-filter resolution
//!
//! Every fragment of a request (saved filter, presets, ad-hoc `where`,
//! quick search) is parsed and merged into one conjunctive tree before
//! validation. No fragment overrides another.

mod presets;
mod saved;

pub use presets::{load_preset, load_presets};
pub use saved::{
    InMemorySavedFilters, OwnerOrShared, SavedFilter, SavedFilterAccess, SavedFilterRef,
    SavedFilterStore,
};

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{FilterError, QueryError};
use crate::filter::ast::{FieldFilter, FieldPath, FilterNode, Value};
use crate::filter::operators::Operator;
use crate::filter::parser::FilterParser;
use crate::schema::{AllowedFields, FeatureFlags, ModelMeta, Schema};

/// Filter fragments named by one request
#[derive(Debug, Clone, Copy)]
pub struct FilterSources<'r> {
    pub saved: Option<&'r SavedFilterRef>,
    pub presets: &'r [String],
    pub ad_hoc: &'r JsonValue,
    pub quick: Option<&'r str>,
}

pub struct Resolver<'a> {
    schema: &'a Schema,
    features: FeatureFlags,
    saved: &'a dyn SavedFilterStore,
    access: &'a dyn SavedFilterAccess,
}

impl<'a> Resolver<'a> {
    pub fn new(
        schema: &'a Schema,
        features: FeatureFlags,
        saved: &'a dyn SavedFilterStore,
        access: &'a dyn SavedFilterAccess,
    ) -> Self {
        Self {
            schema,
            features,
            saved,
            access,
        }
    }

    /// Resolve and merge all fragments for `model`
    ///
    /// Order of the merged children: saved filter, presets, ad-hoc, quick
    /// search. User-authored fragments honour `allowed`; presets and
    /// quick-search paths come from the schema and do not.
    pub async fn resolve(
        &self,
        model: &str,
        sources: FilterSources<'_>,
        viewer: Option<&str>,
        allowed: Option<&AllowedFields>,
    ) -> Result<FilterNode, QueryError> {
        let meta = self.schema.model(model)?;
        let parser = match allowed {
            Some(allowed) => FilterParser::new(self.schema, self.features).with_allowed_fields(allowed),
            None => FilterParser::new(self.schema, self.features),
        };

        let mut fragments = Vec::new();

        if let Some(reference) = sources.saved {
            let saved = self.saved_filter(model, reference, viewer).await?;
            fragments.push(parser.parse(model, &saved.filter_json)?);
        }

        fragments.extend(load_presets(
            self.schema,
            self.features,
            model,
            sources.presets,
        )?);

        fragments.push(parser.parse(model, sources.ad_hoc)?);

        if let Some(term) = sources.quick
            && let Some(node) = quick_search(meta, term)
        {
            fragments.push(node);
        }

        let merged = merge(fragments);
        tracing::debug!(
            model,
            presets = sources.presets.len(),
            saved = sources.saved.is_some(),
            "Filter fragments resolved"
        );
        Ok(merged)
    }

    async fn saved_filter(
        &self,
        model: &str,
        reference: &SavedFilterRef,
        viewer: Option<&str>,
    ) -> Result<Arc<SavedFilter>, QueryError> {
        let not_found = || FilterError::SavedFilterNotFound(reference.to_string());
        match reference {
            SavedFilterRef::Id(id) => {
                let filter = self
                    .saved
                    .get(id)
                    .await?
                    .filter(|f| f.model == model)
                    .ok_or_else(not_found)?;
                if !self.access.can_view(&filter, viewer) {
                    return Err(FilterError::SavedFilterForbidden(reference.to_string()).into());
                }
                Ok(filter)
            }
            SavedFilterRef::Name(name) => {
                let candidates = self.saved.find_by_name(model, name).await?;
                if candidates.is_empty() {
                    return Err(not_found().into());
                }
                // the viewer's own filter wins over someone else's shared one
                let owned = candidates
                    .iter()
                    .find(|f| viewer.is_some_and(|v| v == f.owner_id));
                owned
                    .or_else(|| candidates.iter().find(|f| self.access.can_view(f, viewer)))
                    .cloned()
                    .ok_or_else(|| FilterError::SavedFilterForbidden(reference.to_string()).into())
            }
        }
    }
}

/// Conjunction of non-empty fragments, unwrapped when only one remains
pub fn merge(fragments: Vec<FilterNode>) -> FilterNode {
    let mut kept: Vec<FilterNode> = fragments.into_iter().filter(|f| !f.is_empty()).collect();
    match kept.len() {
        0 => FilterNode::empty(),
        1 => kept.remove(0),
        _ => FilterNode::and(kept),
    }
}

/// `icontains` over the model's quick-search paths, OR'd
pub fn quick_search(model: &ModelMeta, term: &str) -> Option<FilterNode> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    if model.quick_search.is_empty() {
        tracing::debug!(model = %model.name, "Quick search requested but no paths configured");
        return None;
    }
    let mut terms: Vec<FilterNode> = model
        .quick_search
        .iter()
        .map(|dotted| {
            FilterNode::Field(FieldFilter {
                path: FieldPath::parse(dotted),
                operator: Operator::IContains,
                operand: Value::from(term),
            })
        })
        .collect();
    Some(if terms.len() == 1 {
        terms.remove(0)
    } else {
        FilterNode::or(terms)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_json_str(
            r#"{"name": "shop", "models": [{
                "name": "product", "table": "products",
                "fields": [{"name": "id", "type": "id"}, {"name": "name", "type": "string"},
                           {"name": "sku", "type": "string"},
                           {"name": "price", "type": "numeric"},
                           {"name": "isActive", "column": "is_active", "type": "boolean"}],
                "presets": {"active": {"isActive": {"eq": true}}},
                "quick_search": ["name", "sku"]
            }]}"#,
        )
        .unwrap()
    }

    fn sources<'r>(
        saved: Option<&'r SavedFilterRef>,
        presets: &'r [String],
        ad_hoc: &'r JsonValue,
    ) -> FilterSources<'r> {
        FilterSources {
            saved,
            presets,
            ad_hoc,
            quick: None,
        }
    }

    #[tokio::test]
    async fn test_merge_order_saved_presets_ad_hoc() {
        let schema = schema();
        let store = InMemorySavedFilters::new();
        let saved = SavedFilter::new("cheap", "product", json!({"price": {"lt": 10}}), "u1");
        let id = saved.id.clone();
        store.put(saved).await.unwrap();

        let resolver = Resolver::new(&schema, FeatureFlags::default(), &store, &OwnerOrShared);
        let reference = SavedFilterRef::Id(id);
        let presets = vec!["active".to_string()];
        let ad_hoc = json!({"name": {"eq": "lamp"}});
        let node = resolver
            .resolve(
                "product",
                sources(Some(&reference), &presets, &ad_hoc),
                Some("u1"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            node,
            FilterNode::and(vec![
                FilterNode::field("price", Operator::Lt, 10i64),
                FilterNode::field("isActive", Operator::Eq, true),
                FilterNode::field("name", Operator::Eq, "lamp"),
            ])
        );
    }

    #[tokio::test]
    async fn test_single_fragment_is_not_wrapped() {
        let schema = schema();
        let store = InMemorySavedFilters::new();
        let resolver = Resolver::new(&schema, FeatureFlags::default(), &store, &OwnerOrShared);
        let ad_hoc = json!({"name": {"eq": "lamp"}});
        let node = resolver
            .resolve("product", sources(None, &[], &ad_hoc), None, None)
            .await
            .unwrap();
        assert_eq!(node, FilterNode::field("name", Operator::Eq, "lamp"));

        let node = resolver
            .resolve("product", sources(None, &[], &JsonValue::Null), None, None)
            .await
            .unwrap();
        assert!(node.is_empty());
    }

    #[tokio::test]
    async fn test_saved_filter_visibility() {
        let schema = schema();
        let store = InMemorySavedFilters::new();
        let private = SavedFilter::new("cheap", "product", json!({"price": {"lt": 10}}), "alice");
        let id = private.id.clone();
        store.put(private).await.unwrap();
        let resolver = Resolver::new(&schema, FeatureFlags::default(), &store, &OwnerOrShared);

        let by_id = SavedFilterRef::Id(id);
        let err = resolver
            .resolve("product", sources(Some(&by_id), &[], &JsonValue::Null), Some("bob"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAVED_FILTER_FORBIDDEN");

        let missing = SavedFilterRef::Name("nope".to_string());
        let err = resolver
            .resolve("product", sources(Some(&missing), &[], &JsonValue::Null), Some("alice"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAVED_FILTER_NOT_FOUND");

        let by_name = SavedFilterRef::Name("cheap".to_string());
        assert!(
            resolver
                .resolve("product", sources(Some(&by_name), &[], &JsonValue::Null), Some("alice"), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_saved_filter_respects_allowed_fields() {
        let schema = schema();
        let store = InMemorySavedFilters::new();
        let saved = SavedFilter::new("cheap", "product", json!({"price": {"lt": 10}}), "u1");
        let id = saved.id.clone();
        store.put(saved).await.unwrap();
        let resolver = Resolver::new(&schema, FeatureFlags::default(), &store, &OwnerOrShared);

        let allowed = AllowedFields::new(["name", "isActive"]);
        let reference = SavedFilterRef::Id(id);
        let presets = vec!["active".to_string()];
        let err = resolver
            .resolve(
                "product",
                sources(Some(&reference), &presets, &JsonValue::Null),
                Some("u1"),
                Some(&allowed),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_FIELD");
    }

    #[tokio::test]
    async fn test_quick_search_appended_last() {
        let schema = schema();
        let store = InMemorySavedFilters::new();
        let resolver = Resolver::new(&schema, FeatureFlags::default(), &store, &OwnerOrShared);
        let ad_hoc = json!({"price": {"gt": 1}});
        let node = resolver
            .resolve(
                "product",
                FilterSources {
                    saved: None,
                    presets: &[],
                    ad_hoc: &ad_hoc,
                    quick: Some("  lamp "),
                },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            node,
            FilterNode::and(vec![
                FilterNode::field("price", Operator::Gt, 1i64),
                FilterNode::or(vec![
                    FilterNode::field("name", Operator::IContains, "lamp"),
                    FilterNode::field("sku", Operator::IContains, "lamp"),
                ]),
            ])
        );
    }

    #[test]
    fn test_merge_drops_empty_fragments() {
        let leaf = FilterNode::field("price", Operator::Gt, 1i64);
        assert_eq!(
            merge(vec![FilterNode::empty(), leaf.clone(), FilterNode::empty()]),
            leaf
        );
        assert!(merge(vec![]).is_empty());
    }
}
