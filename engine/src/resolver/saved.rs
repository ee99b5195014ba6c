//! Saved filters
//!
//! User-created filter fragments. Persistence is a collaborator behind
//! [`SavedFilterStore`]; the in-memory store here backs the CLI and tests.
//! Saved filters are never mutated in place: `put` replaces the whole
//! record under its id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFilter {
    pub id: String,
    pub name: String,
    pub model: String,
    pub filter_json: JsonValue,
    pub owner_id: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SavedFilter {
    /// New private filter with a random id
    pub fn new(name: &str, model: &str, filter_json: JsonValue, owner_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            model: model.to_string(),
            filter_json,
            owner_id: owner_id.to_string(),
            is_shared: false,
            created_at: Utc::now(),
        }
    }

    pub fn shared(mut self) -> Self {
        self.is_shared = true;
        self
    }
}

/// How a request names its saved filter: `{"id": ".."}` or `{"name": ".."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavedFilterRef {
    Id(String),
    Name(String),
}

impl std::fmt::Display for SavedFilterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {}", id),
            Self::Name(name) => write!(f, "name {}", name),
        }
    }
}

/// Saved filter persistence
#[async_trait]
pub trait SavedFilterStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Arc<SavedFilter>>, EngineError>;

    /// All filters of `model` called `name`, regardless of owner
    async fn find_by_name(
        &self,
        model: &str,
        name: &str,
    ) -> Result<Vec<Arc<SavedFilter>>, EngineError>;

    /// Insert or replace by id
    async fn put(&self, filter: SavedFilter) -> Result<(), EngineError>;

    /// Returns `true` if the filter existed
    async fn delete(&self, id: &str) -> Result<bool, EngineError>;
}

/// Visibility decision for a saved filter
pub trait SavedFilterAccess: Send + Sync {
    fn can_view(&self, filter: &SavedFilter, viewer: Option<&str>) -> bool;
}

/// Owner, or anyone when shared
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOrShared;

impl SavedFilterAccess for OwnerOrShared {
    fn can_view(&self, filter: &SavedFilter, viewer: Option<&str>) -> bool {
        filter.is_shared || viewer.is_some_and(|v| v == filter.owner_id)
    }
}

#[derive(Default)]
pub struct InMemorySavedFilters {
    filters: DashMap<String, Arc<SavedFilter>>,
}

impl InMemorySavedFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON list of saved filters
    pub fn from_json(value: &JsonValue) -> Result<Self, EngineError> {
        let filters: Vec<SavedFilter> = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Config(format!("invalid saved filters: {}", e)))?;
        let store = Self::new();
        for filter in filters {
            store.filters.insert(filter.id.clone(), Arc::new(filter));
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[async_trait]
impl SavedFilterStore for InMemorySavedFilters {
    async fn get(&self, id: &str) -> Result<Option<Arc<SavedFilter>>, EngineError> {
        Ok(self.filters.get(id).map(|f| Arc::clone(f.value())))
    }

    async fn find_by_name(
        &self,
        model: &str,
        name: &str,
    ) -> Result<Vec<Arc<SavedFilter>>, EngineError> {
        let mut found: Vec<Arc<SavedFilter>> = self
            .filters
            .iter()
            .filter(|f| f.model == model && f.name == name)
            .map(|f| Arc::clone(f.value()))
            .collect();
        // dashmap iteration order is arbitrary
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn put(&self, filter: SavedFilter) -> Result<(), EngineError> {
        tracing::debug!(id = %filter.id, model = %filter.model, name = %filter.name, "Saved filter stored");
        self.filters.insert(filter.id.clone(), Arc::new(filter));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.filters.remove(id).is_some())
    }
}
