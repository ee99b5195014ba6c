//! SQL abstraction layer for multi-database support
//!
//! The compilers emit a dialect-neutral [`Condition`](crate::filter::condition::Condition)
//! tree; this module renders it to parameterised SQL for DuckDB or PostgreSQL.

mod dialect;
mod duckdb_dialect;
mod postgres_dialect;
mod render;
mod statement;

pub use dialect::SqlDialect;
pub use duckdb_dialect::DuckdbDialect;
pub use postgres_dialect::PostgresDialect;
pub use render::SqlRenderer;
pub use statement::{SelectParts, Statement};

use serde::{Deserialize, Serialize};

/// Database backend identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Duckdb,
    Postgres,
}

impl Backend {
    /// Get the SQL dialect for this backend
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Backend::Duckdb => &DuckdbDialect,
            Backend::Postgres => &PostgresDialect,
        }
    }

    /// Get the backend name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Duckdb => "duckdb",
            Backend::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
