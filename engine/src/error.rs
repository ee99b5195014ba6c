//! Error types
//!
//! Three disjoint classes:
//! - [`FilterError`]: client input errors, safe to show to the caller
//! - [`Violation`]: security limit violations, logged and turned into a no-match predicate
//! - [`EngineError`]: fatal configuration/store errors for the current request

use thiserror::Error;

use crate::schema::Feature;

// =============================================================================
// Client errors
// =============================================================================

/// Client input error. Only reveals the public schema shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    #[error("Operator '{operator}' is not supported for {field_type} field '{field}'")]
    UnknownOperator {
        field: String,
        operator: String,
        field_type: String,
    },

    #[error("Invalid operand for '{field}' ({operator}): {reason}")]
    InvalidOperand {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("Unknown preset '{name}' for model '{model}'")]
    UnknownPreset { model: String, name: String },

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Saved filter not found: {0}")]
    SavedFilterNotFound(String),

    #[error("Saved filter '{0}' is not visible to the current user")]
    SavedFilterForbidden(String),

    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(Feature),

    #[error("Invalid ordering key '{key}': {reason}")]
    InvalidOrdering { key: String, reason: String },

    #[error("distinctOn {distinct_on:?} must be a prefix of orderBy {order_by:?}")]
    DistinctOnNotPrefix {
        distinct_on: Vec<String>,
        order_by: Vec<String>,
    },

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Invalid filter JSON: {0}")]
    InvalidFilterJson(String),
}

impl FilterError {
    /// Stable upper-snake error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownField { .. } => "UNKNOWN_FIELD",
            Self::UnknownOperator { .. } => "UNKNOWN_OPERATOR",
            Self::InvalidOperand { .. } => "INVALID_OPERAND",
            Self::UnknownPreset { .. } => "UNKNOWN_PRESET",
            Self::UnknownModel(_) => "UNKNOWN_MODEL",
            Self::SavedFilterNotFound(_) => "SAVED_FILTER_NOT_FOUND",
            Self::SavedFilterForbidden(_) => "SAVED_FILTER_FORBIDDEN",
            Self::FeatureNotEnabled(_) => "FEATURE_NOT_ENABLED",
            Self::InvalidOrdering { .. } => "INVALID_ORDERING",
            Self::DistinctOnNotPrefix { .. } => "DISTINCT_ON_NOT_PREFIX",
            Self::InvalidPagination(_) => "INVALID_PAGINATION",
            Self::InvalidFilterJson(_) => "INVALID_FILTER_JSON",
        }
    }

    pub(crate) fn operand(
        field: impl Into<String>,
        operator: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOperand {
            field: field.into(),
            operator: operator.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Security violations
// =============================================================================

/// Security limit violation found by the validator.
///
/// Never returned to the caller. The query engine logs each violation and
/// replaces the predicate with one that matches nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("filter depth {actual} exceeds limit {limit}")]
    DepthExceeded { limit: usize, actual: usize },

    #[error("filter clause count {actual} exceeds limit {limit}")]
    TooManyClauses { limit: usize, actual: usize },

    #[error("regex length {actual} exceeds limit {limit}")]
    RegexTooLong { limit: usize, actual: usize },

    #[error("regex syntax invalid: {reason}")]
    RegexInvalid { reason: String },

    #[error("regex has a catastrophic backtracking shape")]
    RegexUnsafe,
}

impl Violation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::TooManyClauses { .. } => "too_many_clauses",
            Self::RegexTooLong { .. } => "regex_too_long",
            Self::RegexInvalid { .. } => "regex_invalid",
            Self::RegexUnsafe => "regex_unsafe",
        }
    }

    /// Log at warning level with the offending limit
    pub fn log(&self, model: &str) {
        match self {
            Self::DepthExceeded { limit, actual }
            | Self::TooManyClauses { limit, actual }
            | Self::RegexTooLong { limit, actual } => {
                tracing::warn!(
                    model,
                    kind = self.kind(),
                    limit,
                    actual,
                    "Filter rejected by security limits"
                );
            }
            Self::RegexInvalid { reason } => {
                tracing::warn!(model, kind = self.kind(), reason = %reason, "Filter rejected by security limits");
            }
            Self::RegexUnsafe => {
                tracing::warn!(model, kind = self.kind(), "Filter rejected by security limits");
            }
        }
    }
}

// =============================================================================
// Fatal errors
// =============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to build descriptor for model '{model}': {reason}")]
    DescriptorBuild { model: String, reason: String },

    #[error("Descriptor cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(#[from] duckdb::Error),

    #[error("Store query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by the query pipeline
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Client(#[from] FilterError),

    #[error(transparent)]
    Internal(#[from] EngineError),
}

impl QueryError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Client(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<duckdb::Error> for QueryError {
    fn from(err: duckdb::Error) -> Self {
        Self::Internal(EngineError::Store(err))
    }
}
