// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "querygate";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name, looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "querygate.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "QUERYGATE_CONFIG";

// =============================================================================
// Environment Variables - Logging
// =============================================================================

/// Environment variable for the log filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "QUERYGATE_LOG";

/// Default log filter
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable selecting the log format (`json` or compact text)
pub const ENV_LOG_FORMAT: &str = "QUERYGATE_LOG_FORMAT";

// =============================================================================
// Environment Variables - Security
// =============================================================================

pub const ENV_MAX_FILTER_DEPTH: &str = "QUERYGATE_MAX_FILTER_DEPTH";
pub const ENV_MAX_FILTER_CLAUSES: &str = "QUERYGATE_MAX_FILTER_CLAUSES";
pub const ENV_MAX_REGEX_LENGTH: &str = "QUERYGATE_MAX_REGEX_LENGTH";
pub const ENV_REJECT_UNSAFE_REGEX: &str = "QUERYGATE_REJECT_UNSAFE_REGEX";

// =============================================================================
// Environment Variables - Features
// =============================================================================

pub const ENV_ENABLE_WINDOW_FILTERS: &str = "QUERYGATE_ENABLE_WINDOW_FILTERS";
pub const ENV_ENABLE_SUBQUERY_FILTERS: &str = "QUERYGATE_ENABLE_SUBQUERY_FILTERS";

// =============================================================================
// Environment Variables - Ordering, Pagination, Cache, Dialect
// =============================================================================

pub const ENV_MAX_PROPERTY_ORDERING_RESULTS: &str = "QUERYGATE_MAX_PROPERTY_ORDERING_RESULTS";
pub const ENV_MAX_PER_PAGE: &str = "QUERYGATE_MAX_PER_PAGE";
pub const ENV_CACHE_MAX_ENTRIES: &str = "QUERYGATE_CACHE_MAX_ENTRIES";
pub const ENV_DIALECT: &str = "QUERYGATE_DIALECT";

// =============================================================================
// Security Defaults
// =============================================================================

pub const DEFAULT_MAX_FILTER_DEPTH: usize = 10;
pub const DEFAULT_MAX_FILTER_CLAUSES: usize = 50;
pub const DEFAULT_MAX_REGEX_LENGTH: usize = 500;

// =============================================================================
// Ordering Defaults
// =============================================================================

/// Rows materialised for in-memory (computed property) ordering
pub const DEFAULT_MAX_PROPERTY_ORDERING_RESULTS: usize = 2000;

// =============================================================================
// Pagination Defaults
// =============================================================================

pub const DEFAULT_PER_PAGE: u64 = 25;
pub const DEFAULT_MAX_PER_PAGE: u64 = 500;

// =============================================================================
// Descriptor Cache Defaults
// =============================================================================

/// Descriptor cache capacity per schema
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100;

// =============================================================================
// Store
// =============================================================================

/// Per-statement timeout for store queries
pub const STORE_QUERY_TIMEOUT_SECS: u64 = 30;
