//! querygate engine
//!
//! Compiles nested client filter trees, ordering and pagination directives
//! into bounded, parameterised store queries. Security limits (depth, clause
//! count, regex safety) are enforced before compilation and never surfaced to
//! the caller.

pub mod app;
pub mod core;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod ordering;
pub mod pagination;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod sql;
pub mod store;
pub mod utils;

pub use error::{EngineError, FilterError, QueryError, Violation};
pub use query::{QueryEngine, QueryPlan, QueryRequest, RequestContext};
pub use schema::{AllowedFields, Schema};
