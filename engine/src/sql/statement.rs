//! Top-level SELECT and COUNT statements

use super::{SqlDialect, SqlRenderer};
use crate::filter::ast::Value;
use crate::filter::condition::{Condition, Expr, OrderTerm, TableRef};

/// Rendered SQL with parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Parts of a row query over one aliased table
#[derive(Debug, Clone, Copy)]
pub struct SelectParts<'p> {
    pub from: &'p TableRef,
    pub filter: &'p Condition,
    pub distinct_on: &'p [Expr],
    pub order_by: &'p [OrderTerm],
}

impl SelectParts<'_> {
    /// `SELECT [DISTINCT ON (..)] <projection> FROM .. WHERE .. ORDER BY .. [LIMIT ..]`
    pub fn select(
        &self,
        dialect: &dyn SqlDialect,
        projection: &[(String, Expr)],
        limit_offset: Option<(u64, u64)>,
    ) -> Statement {
        let mut r = SqlRenderer::new(dialect);
        let mut sql = String::from("SELECT ");
        if !self.distinct_on.is_empty() {
            let keys: Vec<String> = self.distinct_on.iter().map(|e| r.expr(e)).collect();
            sql.push_str(&format!("DISTINCT ON ({}) ", keys.join(", ")));
        }
        let columns: Vec<String> = projection
            .iter()
            .map(|(name, expr)| {
                let expr = r.expr(expr);
                format!("{} AS {}", expr, r.ident(name))
            })
            .collect();
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&r.table(self.from));
        self.push_where(&mut r, &mut sql);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order = r.order_terms(self.order_by);
            sql.push_str(&order);
        }
        if let Some((limit, offset)) = limit_offset {
            sql.push(' ');
            sql.push_str(&dialect.limit_offset(limit, offset));
        }
        Statement {
            sql,
            params: r.into_params(),
        }
    }

    /// Number of rows the select would return without a limit
    pub fn count(&self, dialect: &dyn SqlDialect) -> Statement {
        let mut r = SqlRenderer::new(dialect);
        let sql = if self.distinct_on.is_empty() {
            let mut sql = format!("SELECT COUNT(*) FROM {}", r.table(self.from));
            self.push_where(&mut r, &mut sql);
            sql
        } else {
            let keys: Vec<String> = self.distinct_on.iter().map(|e| r.expr(e)).collect();
            let mut inner = format!("SELECT DISTINCT {} FROM {}", keys.join(", "), r.table(self.from));
            self.push_where(&mut r, &mut inner);
            format!("SELECT COUNT(*) FROM ({}) AS d", inner)
        };
        Statement {
            sql,
            params: r.into_params(),
        }
    }

    fn push_where(&self, r: &mut SqlRenderer<'_>, sql: &mut String) {
        if *self.filter != Condition::Always {
            sql.push_str(" WHERE ");
            let filter = r.condition(self.filter);
            sql.push_str(&filter);
        }
    }
}
