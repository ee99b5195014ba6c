//! DuckDB SQL dialect implementation

use super::SqlDialect;
use super::dialect::date_part_keyword;
use crate::filter::ast::DatePart;
use crate::filter::condition::{ArrayOp, SqlType};

/// DuckDB SQL dialect
pub struct DuckdbDialect;

impl SqlDialect for DuckdbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
            SqlType::Text => "VARCHAR",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
        }
    }

    fn array_literal(&self, elements: &[String]) -> String {
        format!("[{}]", elements.join(", "))
    }

    fn array_predicate(&self, op: ArrayOp, column: &str, array: &str) -> String {
        match op {
            ArrayOp::Contains => format!("list_has_all({}, {})", column, array),
            ArrayOp::ContainedBy => format!("list_has_all({}, {})", array, column),
            ArrayOp::Overlaps => format!("list_has_any({}, {})", column, array),
        }
    }

    fn array_length(&self, column: &str) -> String {
        format!("len({})", column)
    }

    fn regex_match(&self, column: &str, pattern: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("regexp_matches({}, {}, 'i')", column, pattern)
        } else {
            format!("regexp_matches({}, {})", column, pattern)
        }
    }

    fn json_has_key(&self, column: &str, key: &str) -> String {
        format!("list_contains(json_keys({}), {})", column, key)
    }

    fn extract(&self, part: DatePart, expr: &str) -> String {
        format!("date_part('{}', {})", date_part_keyword(part), expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let dialect = DuckdbDialect;
        assert_eq!(dialect.placeholder(1), "?");
        assert_eq!(dialect.placeholder(5), "?");
    }

    #[test]
    fn test_array_predicates() {
        let dialect = DuckdbDialect;
        let arr = dialect.array_literal(&["?".to_string(), "?".to_string()]);
        assert_eq!(arr, "[?, ?]");
        assert_eq!(
            dialect.array_predicate(ArrayOp::Contains, "t0.tags", &arr),
            "list_has_all(t0.tags, [?, ?])"
        );
        assert_eq!(
            dialect.array_predicate(ArrayOp::ContainedBy, "t0.tags", &arr),
            "list_has_all([?, ?], t0.tags)"
        );
        assert_eq!(
            dialect.array_predicate(ArrayOp::Overlaps, "t0.tags", &arr),
            "list_has_any(t0.tags, [?, ?])"
        );
    }

    #[test]
    fn test_regex_match() {
        let dialect = DuckdbDialect;
        assert_eq!(dialect.regex_match("name", "?", false), "regexp_matches(name, ?)");
        assert_eq!(
            dialect.regex_match("name", "?", true),
            "regexp_matches(name, ?, 'i')"
        );
    }

    #[test]
    fn test_extract() {
        let dialect = DuckdbDialect;
        assert_eq!(
            dialect.extract(DatePart::IsoWeekDay, "t0.created_at"),
            "date_part('isodow', t0.created_at)"
        );
    }

    #[test]
    fn test_order_by_with_nulls() {
        let dialect = DuckdbDialect;
        assert_eq!(
            dialect.order_by_with_nulls("t0.price", true, true),
            "t0.price DESC NULLS LAST"
        );
        assert_eq!(
            dialect.order_by_with_nulls("name", false, false),
            "name ASC NULLS FIRST"
        );
    }

    #[test]
    fn test_like_escape() {
        let dialect = DuckdbDialect;
        assert_eq!(dialect.like("name", "?", true), "name ILIKE ? ESCAPE '\\'");
    }
}
