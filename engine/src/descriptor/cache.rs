//! Bounded descriptor cache
//!
//! One cache per schema, keyed by model name. Population goes through
//! moka's `try_get_with`, so concurrent misses on the same key build the
//! descriptor once and readers only ever see a published `Arc`.

use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use super::{Descriptor, DescriptorError, DescriptorSource};
use crate::error::{EngineError, QueryError};
use crate::schema::Schema;

pub struct DescriptorCache {
    schema: Arc<Schema>,
    cache: Cache<String, Arc<Descriptor>>,
}

impl DescriptorCache {
    pub fn new(schema: Arc<Schema>, max_entries: u64) -> Self {
        let schema_name = schema.name.clone();
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |model: Arc<String>, _, cause| {
                tracing::trace!(schema = %schema_name, model = %model, ?cause, "Descriptor evicted");
            })
            .build();
        Self { schema, cache }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Get or build the descriptor for `model`
    pub fn get(&self, model: &str) -> Result<Arc<Descriptor>, QueryError> {
        // Unknown models are client errors, not build failures
        self.schema.model(model)?;

        self.cache
            .try_get_with(model.to_string(), || {
                tracing::debug!(schema = %self.schema.name, model, "Building descriptor");
                Descriptor::build(&self.schema, model).map(Arc::new)
            })
            .map_err(|e: Arc<DescriptorError>| {
                QueryError::Internal(EngineError::from(DescriptorError::clone(&e)))
            })
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl DescriptorSource for DescriptorCache {
    fn descriptor(&self, model: &str) -> Result<Arc<Descriptor>, QueryError> {
        self.get(model)
    }
}
