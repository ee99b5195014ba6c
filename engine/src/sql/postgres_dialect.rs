//! PostgreSQL SQL dialect implementation

use super::SqlDialect;
use super::dialect::date_part_keyword;
use crate::filter::ast::DatePart;
use crate::filter::condition::{ArrayOp, SqlType};

/// PostgreSQL SQL dialect
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSONB",
            SqlType::Text => "TEXT",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
        }
    }

    fn array_literal(&self, elements: &[String]) -> String {
        format!("ARRAY[{}]", elements.join(", "))
    }

    fn array_predicate(&self, op: ArrayOp, column: &str, array: &str) -> String {
        let op = match op {
            ArrayOp::Contains => "@>",
            ArrayOp::ContainedBy => "<@",
            ArrayOp::Overlaps => "&&",
        };
        format!("{} {} {}", column, op, array)
    }

    fn array_length(&self, column: &str) -> String {
        format!("cardinality({})", column)
    }

    fn regex_match(&self, column: &str, pattern: &str, case_insensitive: bool) -> String {
        let op = if case_insensitive { "~*" } else { "~" };
        format!("{} {} {}", column, op, pattern)
    }

    fn json_has_key(&self, column: &str, key: &str) -> String {
        format!("jsonb_exists({}, {})", column, key)
    }

    fn extract(&self, part: DatePart, expr: &str) -> String {
        format!(
            "EXTRACT({} FROM {})",
            date_part_keyword(part).to_uppercase(),
            expr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.placeholder(1), "$1");
        assert_eq!(dialect.placeholder(5), "$5");
    }

    #[test]
    fn test_array_predicates() {
        let dialect = PostgresDialect;
        let arr = dialect.array_literal(&["$1".to_string()]);
        assert_eq!(arr, "ARRAY[$1]");
        assert_eq!(
            dialect.array_predicate(ArrayOp::Overlaps, "t0.tags", &arr),
            "t0.tags && ARRAY[$1]"
        );
        assert_eq!(dialect.array_length("t0.tags"), "cardinality(t0.tags)");
    }

    #[test]
    fn test_regex_and_json() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.regex_match("name", "$1", true), "name ~* $1");
        assert_eq!(dialect.json_has_key("meta", "$2"), "jsonb_exists(meta, $2)");
    }

    #[test]
    fn test_extract() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.extract(DatePart::DayOfYear, "created_at"),
            "EXTRACT(DOY FROM created_at)"
        );
        assert_eq!(dialect.type_name(SqlType::Double), "DOUBLE PRECISION");
    }
}
