//! Filter trees: parsing, validation and compilation
//!
//! The pipeline per request is parse (JSON to [`FilterNode`]), validate
//! (security limits, violations are never surfaced), then compile
//! ([`FilterNode`] to a [`Condition`] over aliased tables).

pub mod ast;
pub mod compiler;
pub mod condition;
pub mod dates;
pub mod operators;
pub mod parser;
pub mod regex_safety;
pub mod validator;

pub use ast::{FieldPath, FilterNode, SortKey, Value};
pub use compiler::{FilterCompiler, ROOT_ALIAS};
pub use condition::Condition;
pub use operators::Operator;
pub use parser::FilterParser;
pub use validator::validate;
