//! Condition tree to SQL text
//!
//! Rendering is strictly left to right and parameters are appended in the
//! order their placeholders appear, so `?` dialects bind correctly.

use super::SqlDialect;
use crate::filter::ast::{AggregateFn, Value};
use crate::filter::condition::{
    ArithOp, ColumnRef, Condition, Expr, Join, OrderTerm, Subquery, TableRef,
    WINDOW_KEY_COLUMN, WINDOW_RANK_COLUMN, WindowQuery,
};

pub struct SqlRenderer<'d> {
    dialect: &'d dyn SqlDialect,
    params: Vec<Value>,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn SqlDialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &'d dyn SqlDialect {
        self.dialect
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    /// Bind a value and return its placeholder
    pub fn param(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        self.dialect.placeholder(self.params.len())
    }

    pub fn ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    pub fn table(&self, table: &TableRef) -> String {
        format!("{} AS {}", self.ident(&table.table), table.alias)
    }

    pub fn column(&self, column: &ColumnRef) -> String {
        format!("{}.{}", column.alias, self.ident(&column.column))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Column(c) => self.column(c),
            Expr::Param(v) => self.param(v),
            Expr::Cast(inner, ty) => {
                let inner = self.expr(inner);
                format!("CAST({} AS {})", inner, self.dialect.type_name(*ty))
            }
            Expr::Arith(left, op, right) => {
                let left = self.expr(left);
                let right = self.expr(right);
                let op = match op {
                    ArithOp::Add => "+",
                    ArithOp::Mul => "*",
                };
                format!("({} {} {})", left, op, right)
            }
            Expr::Extract(part, inner) => {
                let inner = self.expr(inner);
                self.dialect.extract(*part, &inner)
            }
            Expr::ArrayLength(inner) => {
                let inner = self.expr(inner);
                self.dialect.array_length(&inner)
            }
            Expr::Aggregate(agg, arg) => {
                let arg = arg.as_deref().map(|a| self.expr(a));
                match (agg, arg) {
                    (AggregateFn::Count, None) => "COUNT(*)".to_string(),
                    (AggregateFn::CountDistinct, Some(a)) => format!("COUNT(DISTINCT {})", a),
                    (AggregateFn::CountDistinct, None) => "COUNT(*)".to_string(),
                    (agg, Some(a)) => format!("{}({})", aggregate_name(*agg), a),
                    (agg, None) => format!("{}(*)", aggregate_name(*agg)),
                }
            }
            Expr::Scalar(sub) => format!("({})", self.subquery(sub)),
        }
    }

    pub fn order_term(&mut self, term: &OrderTerm) -> String {
        let expr = self.expr(&term.expr);
        self.dialect.order_by_with_nulls(&expr, term.descending, true)
    }

    pub fn order_terms(&mut self, terms: &[OrderTerm]) -> String {
        terms
            .iter()
            .map(|t| self.order_term(t))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    pub fn condition(&mut self, cond: &Condition) -> String {
        match cond {
            Condition::Always => "1=1".to_string(),
            Condition::Never => "1=0".to_string(),
            Condition::And(children) => self.junction(children, " AND ", "1=1"),
            Condition::Or(children) => self.junction(children, " OR ", "1=0"),
            Condition::Not(inner) => format!("NOT ({})", self.condition(inner)),
            Condition::NotTrue(inner) => format!("({}) IS NOT TRUE", self.condition(inner)),
            Condition::Compare(left, op, right) => {
                let left = self.expr(left);
                let right = self.expr(right);
                format!("{} {} {}", left, op.sql(), right)
            }
            Condition::Between(expr, low, high) => {
                let expr = self.expr(expr);
                let low = self.expr(low);
                let high = self.expr(high);
                format!("{} BETWEEN {} AND {}", expr, low, high)
            }
            Condition::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1=1" } else { "1=0" }.to_string();
                }
                let expr = self.expr(expr);
                let values: Vec<String> = values.iter().map(|v| self.expr(v)).collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", expr, op, values.join(", "))
            }
            Condition::IsNull { expr, negated } => {
                let expr = self.expr(expr);
                if *negated {
                    format!("{} IS NOT NULL", expr)
                } else {
                    format!("{} IS NULL", expr)
                }
            }
            Condition::Like {
                expr,
                pattern,
                case_insensitive,
            } => {
                let expr = self.expr(expr);
                let pattern = self.expr(pattern);
                self.dialect.like(&expr, &pattern, *case_insensitive)
            }
            Condition::Regex {
                expr,
                pattern,
                case_insensitive,
            } => {
                let expr = self.expr(expr);
                let pattern = self.expr(pattern);
                self.dialect.regex_match(&expr, &pattern, *case_insensitive)
            }
            Condition::JsonHasKey(expr, key) => {
                let expr = self.expr(expr);
                let key = self.expr(key);
                self.dialect.json_has_key(&expr, &key)
            }
            Condition::JsonHasKeys { expr, keys, any } => {
                if keys.is_empty() {
                    return if *any { "1=0" } else { "1=1" }.to_string();
                }
                let column = self.expr(expr);
                let parts: Vec<String> = keys
                    .iter()
                    .map(|k| {
                        let key = self.expr(k);
                        self.dialect.json_has_key(&column, &key)
                    })
                    .collect();
                let sep = if *any { " OR " } else { " AND " };
                format!("({})", parts.join(sep))
            }
            Condition::Array { expr, op, values } => {
                let column = self.expr(expr);
                let elements: Vec<String> = values.iter().map(|v| self.expr(v)).collect();
                let array = self.dialect.array_literal(&elements);
                self.dialect.array_predicate(*op, &column, &array)
            }
            Condition::Exists { subquery, negated } => {
                let sub = self.subquery(subquery);
                if *negated {
                    format!("NOT EXISTS ({})", sub)
                } else {
                    format!("EXISTS ({})", sub)
                }
            }
            Condition::InWindow { expr, query } => {
                let expr = self.expr(expr);
                let window = self.window(query);
                format!("{} IN ({})", expr, window)
            }
        }
    }

    fn junction(&mut self, children: &[Condition], sep: &str, empty: &str) -> String {
        if children.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = children.iter().map(|c| self.condition(c)).collect();
        format!("({})", parts.join(sep))
    }

    // =========================================================================
    // Subqueries
    // =========================================================================

    pub fn subquery(&mut self, sub: &Subquery) -> String {
        let projection = match &sub.projection {
            Some(expr) => self.expr(expr),
            None => "1".to_string(),
        };
        let mut sql = format!("SELECT {} FROM {}", projection, self.table(&sub.from));
        for join in &sub.joins {
            sql.push_str(&self.join(join));
        }
        if sub.filter != Condition::Always {
            sql.push_str(" WHERE ");
            let filter = self.condition(&sub.filter);
            sql.push_str(&filter);
        }
        if !sub.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order = self.order_terms(&sub.order_by);
            sql.push_str(&order);
        }
        if let Some(limit) = sub.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    fn join(&mut self, join: &Join) -> String {
        let table = self.table(&join.table);
        let on = self.condition(&join.on);
        format!(" JOIN {} ON {}", table, on)
    }

    fn window(&mut self, query: &WindowQuery) -> String {
        let key = self.expr(&query.key);
        let mut over = Vec::new();
        if !query.partition_by.is_empty() {
            let parts: Vec<String> = query.partition_by.iter().map(|p| self.expr(p)).collect();
            over.push(format!("PARTITION BY {}", parts.join(", ")));
        }
        if !query.order_by.is_empty() {
            over.push(format!("ORDER BY {}", self.order_terms(&query.order_by)));
        }
        let inner = format!(
            "SELECT {} AS {}, {}() OVER ({}) AS {} FROM {}",
            key,
            WINDOW_KEY_COLUMN,
            query.function.sql_name(),
            over.join(" "),
            WINDOW_RANK_COLUMN,
            self.table(&query.from)
        );
        let filter = self.condition(&query.rank_filter);
        format!(
            "SELECT {}.{} FROM ({}) AS {} WHERE {}",
            query.alias, WINDOW_KEY_COLUMN, inner, query.alias, filter
        )
    }
}

fn aggregate_name(agg: AggregateFn) -> &'static str {
    match agg {
        AggregateFn::Sum => "SUM",
        AggregateFn::Avg => "AVG",
        AggregateFn::Min => "MIN",
        AggregateFn::Max => "MAX",
        AggregateFn::Count | AggregateFn::CountDistinct => "COUNT",
    }
}
