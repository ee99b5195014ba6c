//! Backing-store operation tree
//!
//! Output of the filter and ordering compilers. Dialect-neutral: the
//! `sql` module renders it to parameterised SQL.

use super::ast::{AggregateFn, DatePart, Value, WindowFunction};

/// Column of a table alias
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

/// Store type used for explicit parameter casts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Date,
    Timestamp,
    Uuid,
    Json,
    Text,
    BigInt,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Param(Value),
    Cast(Box<Expr>, SqlType),
    Arith(Box<Expr>, ArithOp, Box<Expr>),
    Extract(DatePart, Box<Expr>),
    ArrayLength(Box<Expr>),
    /// `None` argument means `COUNT(*)`
    Aggregate(AggregateFn, Option<Box<Expr>>),
    /// Scalar subquery, must project exactly one column
    Scalar(Box<Subquery>),
}

impl Expr {
    pub fn column(alias: &str, column: &str) -> Self {
        Self::Column(ColumnRef {
            alias: alias.to_string(),
            column: column.to_string(),
        })
    }

    pub fn param(value: impl Into<Value>) -> Self {
        Self::Param(value.into())
    }

    pub fn cast(self, ty: SqlType) -> Self {
        Self::Cast(Box::new(self), ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    Contains,
    ContainedBy,
    Overlaps,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub on: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: Expr,
    pub descending: bool,
}

/// Correlated subquery over a related table
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filter: Condition,
    /// `None` selects a constant (for EXISTS)
    pub projection: Option<Expr>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
}

/// Ranking computed over the whole table, filtered on the rank value.
///
/// Sibling predicates of the same request do not narrow the ranked set: the
/// window filter is an independent predicate ANDed with the rest, so
/// `price < 900 AND rank = 1` keeps only rank-1 rows that also pass the price
/// check. Partitions whose leader fails a sibling predicate yield no row.
///
/// Renders as `key IN (SELECT w.__key FROM (SELECT pk AS __key,
/// FN() OVER (...) AS __rank FROM table) w WHERE <rank_filter>)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowQuery {
    pub from: TableRef,
    pub key: Expr,
    pub function: WindowFunction,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderTerm>,
    /// Alias of the derived table; `rank_filter` refers to `<alias>.__rank`
    pub alias: String,
    pub rank_filter: Condition,
}

/// Column names produced by a [`WindowQuery`]
pub const WINDOW_KEY_COLUMN: &str = "__key";
pub const WINDOW_RANK_COLUMN: &str = "__rank";

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches every row
    Always,
    /// Matches nothing
    Never,
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// `(c) IS NOT TRUE`: false or unknown
    NotTrue(Box<Condition>),
    Compare(Expr, CmpOp, Expr),
    Between(Expr, Expr, Expr),
    InList {
        expr: Expr,
        values: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        case_insensitive: bool,
    },
    Regex {
        expr: Expr,
        pattern: Expr,
        case_insensitive: bool,
    },
    JsonHasKey(Expr, Expr),
    JsonHasKeys {
        expr: Expr,
        keys: Vec<Expr>,
        any: bool,
    },
    Array {
        expr: Expr,
        op: ArrayOp,
        values: Vec<Expr>,
    },
    Exists {
        subquery: Box<Subquery>,
        negated: bool,
    },
    InWindow {
        expr: Expr,
        query: Box<WindowQuery>,
    },
}

impl Condition {
    /// Conjunction with constant folding and flattening
    pub fn and(children: Vec<Condition>) -> Condition {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Condition::Always => {}
                Condition::Never => return Condition::Never,
                Condition::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Condition::Always,
            1 => out.pop().unwrap_or(Condition::Always),
            _ => Condition::And(out),
        }
    }

    /// Disjunction with constant folding and flattening
    pub fn or(children: Vec<Condition>) -> Condition {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Condition::Never => {}
                Condition::Always => return Condition::Always,
                Condition::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Condition::Never,
            1 => out.pop().unwrap_or(Condition::Never),
            _ => Condition::Or(out),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Condition) -> Condition {
        match child {
            Condition::Always => Condition::Never,
            Condition::Never => Condition::Always,
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }

    pub fn not_true(child: Condition) -> Condition {
        match child {
            Condition::Always => Condition::Never,
            Condition::Never => Condition::Always,
            other => Condition::NotTrue(Box::new(other)),
        }
    }

    pub fn exists(subquery: Subquery, negated: bool) -> Condition {
        if subquery.filter == Condition::Never {
            return if negated {
                Condition::Always
            } else {
                Condition::Never
            };
        }
        Condition::Exists {
            subquery: Box::new(subquery),
            negated,
        }
    }

    pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Condition {
        Condition::Compare(left, op, right)
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Condition::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: i64) -> Condition {
        Condition::compare(Expr::column("t0", "price"), CmpOp::Gt, Expr::param(n))
    }

    #[test]
    fn test_and_folding() {
        assert_eq!(Condition::and(vec![]), Condition::Always);
        assert_eq!(Condition::and(vec![Condition::Always, leaf(1)]), leaf(1));
        assert_eq!(Condition::and(vec![leaf(1), Condition::Never]), Condition::Never);
        assert_eq!(
            Condition::and(vec![Condition::and(vec![leaf(1), leaf(2)]), leaf(3)]),
            Condition::And(vec![leaf(1), leaf(2), leaf(3)])
        );
    }

    #[test]
    fn test_or_folding() {
        assert_eq!(Condition::or(vec![]), Condition::Never);
        assert_eq!(Condition::or(vec![Condition::Never, leaf(1)]), leaf(1));
        assert_eq!(Condition::or(vec![leaf(1), Condition::Always]), Condition::Always);
    }

    #[test]
    fn test_not_folding() {
        assert_eq!(Condition::not(Condition::Always), Condition::Never);
        assert_eq!(Condition::not(Condition::not(leaf(1))), leaf(1));
        assert_eq!(Condition::not_true(Condition::Never), Condition::Always);
    }

    #[test]
    fn test_exists_of_never() {
        let sub = Subquery {
            from: TableRef {
                table: "reviews".to_string(),
                alias: "t1".to_string(),
            },
            joins: vec![],
            filter: Condition::Never,
            projection: None,
            order_by: vec![],
            limit: None,
        };
        assert_eq!(Condition::exists(sub.clone(), false), Condition::Never);
        assert_eq!(Condition::exists(sub, true), Condition::Always);
    }
}
