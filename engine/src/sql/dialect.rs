//! SQL dialect trait for multi-database support
//!
//! This trait defines the interface for generating database-specific SQL syntax.

use crate::filter::ast::DatePart;
use crate::filter::condition::{ArrayOp, SqlType};

/// SQL dialect trait for generating database-specific SQL
///
/// Different databases have different syntax for:
/// - Parameter placeholders (? vs $1)
/// - Array (list) operators and literals
/// - Regex matching
/// - Date part extraction
/// - Type names in casts
///
/// Every method receives already-rendered SQL fragments. Column arguments
/// never carry parameters, so positional placeholders stay in text order.
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Generate a parameter placeholder for the given index (1-based)
    ///
    /// - DuckDB: Always returns "?"
    /// - PostgreSQL: Returns "$1", "$2", etc.
    fn placeholder(&self, index: usize) -> String;

    /// Quote an identifier from the schema
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Type name used in `CAST(x AS <type>)`
    fn type_name(&self, ty: SqlType) -> &'static str;

    /// Array literal from rendered elements
    ///
    /// - DuckDB: `[a, b]`
    /// - PostgreSQL: `ARRAY[a, b]`
    fn array_literal(&self, elements: &[String]) -> String;

    /// Superset/subset/intersection test between an array column and a literal
    ///
    /// - DuckDB: `list_has_all(col, arr)`, `list_has_all(arr, col)`, `list_has_any(col, arr)`
    /// - PostgreSQL: `col @> arr`, `col <@ arr`, `col && arr`
    fn array_predicate(&self, op: ArrayOp, column: &str, array: &str) -> String;

    /// Number of elements in an array column
    ///
    /// - DuckDB: `len(col)`
    /// - PostgreSQL: `cardinality(col)`
    fn array_length(&self, column: &str) -> String;

    /// Regular expression match
    ///
    /// - DuckDB: `regexp_matches(col, ?)` / `regexp_matches(col, ?, 'i')`
    /// - PostgreSQL: `col ~ $1` / `col ~* $1`
    fn regex_match(&self, column: &str, pattern: &str, case_insensitive: bool) -> String;

    /// LIKE with backslash escape
    fn like(&self, column: &str, pattern: &str, case_insensitive: bool) -> String {
        let op = if case_insensitive { "ILIKE" } else { "LIKE" };
        format!("{} {} {} ESCAPE '\\'", column, op, pattern)
    }

    /// Top-level key presence on a JSON column
    ///
    /// - DuckDB: `list_contains(json_keys(col), ?)`
    /// - PostgreSQL: `jsonb_exists(col, $1)`
    fn json_has_key(&self, column: &str, key: &str) -> String;

    /// Date/time component extraction
    ///
    /// - DuckDB: `date_part('isodow', col)`
    /// - PostgreSQL: `EXTRACT(ISODOW FROM col)`
    fn extract(&self, part: DatePart, expr: &str) -> String;

    /// Generate LIMIT/OFFSET clause
    ///
    /// Most databases use `LIMIT x OFFSET y`, but syntax may vary.
    fn limit_offset(&self, limit: u64, offset: u64) -> String {
        format!("LIMIT {} OFFSET {}", limit, offset)
    }

    /// Generate ORDER BY term with NULL handling
    fn order_by_with_nulls(&self, col: &str, desc: bool, nulls_last: bool) -> String {
        let dir = if desc { "DESC" } else { "ASC" };
        let nulls = if nulls_last {
            "NULLS LAST"
        } else {
            "NULLS FIRST"
        };
        format!("{} {} {}", col, dir, nulls)
    }
}

/// Date part keyword shared by DuckDB `date_part` and PostgreSQL `EXTRACT`
pub(super) fn date_part_keyword(part: DatePart) -> &'static str {
    match part {
        DatePart::Year => "year",
        DatePart::Month => "month",
        DatePart::Day => "day",
        DatePart::Quarter => "quarter",
        DatePart::Week => "week",
        DatePart::DayOfWeek => "dow",
        DatePart::DayOfYear => "doy",
        DatePart::IsoWeekDay => "isodow",
        DatePart::IsoYear => "isoyear",
        DatePart::Hour => "hour",
        DatePart::Minute => "minute",
        DatePart::Second => "second",
    }
}
