use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_MAX_FILTER_CLAUSES,
    DEFAULT_MAX_FILTER_DEPTH, DEFAULT_MAX_PER_PAGE, DEFAULT_MAX_PROPERTY_ORDERING_RESULTS,
    DEFAULT_MAX_REGEX_LENGTH, DEFAULT_PER_PAGE,
};
use crate::schema::FeatureFlags;
use crate::sql::Backend;

// =============================================================================
// File Configuration Sections
// =============================================================================

/// Security limits section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SecurityFileConfig {
    pub max_filter_depth: Option<usize>,
    pub max_filter_clauses: Option<usize>,
    pub max_regex_length: Option<usize>,
    pub reject_unsafe_regex: Option<bool>,
}

/// Capability toggles section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FeaturesFileConfig {
    pub enable_window_filters: Option<bool>,
    pub enable_subquery_filters: Option<bool>,
    pub enable_conditional_aggregation: Option<bool>,
    pub enable_array_filters: Option<bool>,
    pub enable_field_comparison: Option<bool>,
    pub enable_distinct_count: Option<bool>,
    pub enable_date_trunc_filters: Option<bool>,
    pub enable_extract_date_filters: Option<bool>,
}

/// Property ordering section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct OrderingFileConfig {
    pub max_property_ordering_results: Option<usize>,
    pub property_ordering_warn_on_cap: Option<bool>,
}

/// Pagination section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PaginationFileConfig {
    pub default_per_page: Option<u64>,
    pub max_per_page: Option<u64>,
}

/// Descriptor cache section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub max_entries: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub security: Option<SecurityFileConfig>,
    pub features: Option<FeaturesFileConfig>,
    pub ordering: Option<OrderingFileConfig>,
    pub pagination: Option<PaginationFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub dialect: Option<Backend>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Structural limits checked before compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub max_filter_depth: usize,
    pub max_filter_clauses: usize,
    pub max_regex_length: usize,
    pub reject_unsafe_regex: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_filter_clauses: DEFAULT_MAX_FILTER_CLAUSES,
            max_regex_length: DEFAULT_MAX_REGEX_LENGTH,
            reject_unsafe_regex: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingConfig {
    pub max_property_ordering_results: usize,
    pub property_ordering_warn_on_cap: bool,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            max_property_ordering_results: DEFAULT_MAX_PROPERTY_ORDERING_RESULTS,
            property_ordering_warn_on_cap: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationConfig {
    pub default_per_page: u64,
    pub max_per_page: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: DEFAULT_MAX_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

/// Final merged engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub security: SecurityConfig,
    pub features: FeatureFlags,
    pub ordering: OrderingConfig,
    pub pagination: PaginationConfig,
    pub cache: CacheConfig,
    pub dialect: Backend,
}

impl EngineConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Local directory config OR CLI-specified config path
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading engine configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        let file_config = match path {
            Some(path) => {
                let config = FileConfig::load_from_file(&path)?;
                config.warn_unknown_fields();
                tracing::debug!(config = %path.display(), "Config file loaded");
                config
            }
            None => FileConfig::default(),
        };

        let config = Self::layer(file_config, cli);
        config.validate()?;
        tracing::debug!(config = ?config, "Engine configuration resolved");
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn layer(file: FileConfig, cli: &CliConfig) -> Self {
        let file_security = file.security.unwrap_or_default();
        let file_features = file.features.unwrap_or_default();
        let file_ordering = file.ordering.unwrap_or_default();
        let file_pagination = file.pagination.unwrap_or_default();
        let file_cache = file.cache.unwrap_or_default();

        let security_defaults = SecurityConfig::default();
        let security = SecurityConfig {
            max_filter_depth: cli
                .max_filter_depth
                .or(file_security.max_filter_depth)
                .unwrap_or(security_defaults.max_filter_depth),
            max_filter_clauses: cli
                .max_filter_clauses
                .or(file_security.max_filter_clauses)
                .unwrap_or(security_defaults.max_filter_clauses),
            max_regex_length: cli
                .max_regex_length
                .or(file_security.max_regex_length)
                .unwrap_or(security_defaults.max_regex_length),
            reject_unsafe_regex: cli
                .reject_unsafe_regex
                .or(file_security.reject_unsafe_regex)
                .unwrap_or(security_defaults.reject_unsafe_regex),
        };

        let defaults = FeatureFlags::default();
        let features = FeatureFlags {
            enable_window_filters: cli
                .enable_window_filters
                .or(file_features.enable_window_filters)
                .unwrap_or(defaults.enable_window_filters),
            enable_subquery_filters: cli
                .enable_subquery_filters
                .or(file_features.enable_subquery_filters)
                .unwrap_or(defaults.enable_subquery_filters),
            enable_conditional_aggregation: file_features
                .enable_conditional_aggregation
                .unwrap_or(defaults.enable_conditional_aggregation),
            enable_array_filters: file_features
                .enable_array_filters
                .unwrap_or(defaults.enable_array_filters),
            enable_field_comparison: file_features
                .enable_field_comparison
                .unwrap_or(defaults.enable_field_comparison),
            enable_distinct_count: file_features
                .enable_distinct_count
                .unwrap_or(defaults.enable_distinct_count),
            enable_date_trunc_filters: file_features
                .enable_date_trunc_filters
                .unwrap_or(defaults.enable_date_trunc_filters),
            enable_extract_date_filters: file_features
                .enable_extract_date_filters
                .unwrap_or(defaults.enable_extract_date_filters),
        };

        let ordering = OrderingConfig {
            max_property_ordering_results: cli
                .max_property_ordering_results
                .or(file_ordering.max_property_ordering_results)
                .unwrap_or(DEFAULT_MAX_PROPERTY_ORDERING_RESULTS),
            property_ordering_warn_on_cap: file_ordering
                .property_ordering_warn_on_cap
                .unwrap_or(true),
        };

        let pagination = PaginationConfig {
            default_per_page: file_pagination
                .default_per_page
                .unwrap_or(DEFAULT_PER_PAGE),
            max_per_page: cli
                .max_per_page
                .or(file_pagination.max_per_page)
                .unwrap_or(DEFAULT_MAX_PER_PAGE),
        };

        let cache = CacheConfig {
            max_entries: cli
                .cache_max_entries
                .or(file_cache.max_entries)
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        };

        let dialect = cli.dialect.or(file.dialect).unwrap_or_default();

        Self {
            security,
            features,
            ordering,
            pagination,
            cache,
            dialect,
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.security.max_filter_depth == 0 {
            anyhow::bail!("Configuration error: security.max_filter_depth must be greater than 0");
        }
        if self.security.max_filter_clauses == 0 {
            anyhow::bail!(
                "Configuration error: security.max_filter_clauses must be greater than 0"
            );
        }
        if self.security.max_regex_length == 0 {
            anyhow::bail!("Configuration error: security.max_regex_length must be greater than 0");
        }
        if self.ordering.max_property_ordering_results == 0 {
            anyhow::bail!(
                "Configuration error: ordering.max_property_ordering_results must be greater than 0"
            );
        }
        if self.pagination.max_per_page == 0 {
            anyhow::bail!("Configuration error: pagination.max_per_page must be greater than 0");
        }
        if self.pagination.default_per_page == 0
            || self.pagination.default_per_page > self.pagination.max_per_page
        {
            anyhow::bail!(
                "Configuration error: pagination.default_per_page ({}) must be between 1 and max_per_page ({})",
                self.pagination.default_per_page,
                self.pagination.max_per_page
            );
        }
        if self.cache.max_entries == 0 {
            anyhow::bail!("Configuration error: cache.max_entries must be greater than 0");
        }
        Ok(())
    }
}
