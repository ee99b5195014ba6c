//! Ordering compiler
//!
//! Sort keys arrive as strings (`"-createdAt"`, `"category.name"`,
//! `"reviews_count"`, `"margin"`). Persisted and count keys lower to store
//! ORDER BY terms; computed property keys switch the plan to a capped
//! in-memory sort. A primary key tiebreaker keeps every ordering total.

pub mod memory;

pub use memory::{
    MemoryKey, PropertyFn, PropertyRegistry, Row, apply_cap, dedup_distinct, sort_rows,
};

use crate::core::config::OrderingConfig;
use crate::descriptor::Descriptor;
use crate::error::{EngineError, FilterError, QueryError};
use crate::filter::ast::{Direction, FieldPath, SortKey, SortTarget};
use crate::filter::compiler::FilterCompiler;
use crate::filter::condition::{Expr, OrderTerm};

/// Suffix that turns a relation name into a relation-count sort key
pub const COUNT_SUFFIX: &str = "_count";

/// Prefix of the hidden columns carrying persisted sort values
pub const SORT_COLUMN_PREFIX: &str = "__sort";

#[derive(Debug, Clone, PartialEq)]
pub struct MemorySort {
    pub keys: Vec<MemoryKey>,
    /// Hidden columns of the `distinctOn` keys, deduplicated after sorting
    pub distinct_columns: Vec<String>,
    pub cap: usize,
    pub warn_on_cap: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortPlan {
    pub keys: Vec<SortKey>,
    /// Store ORDER BY, tiebreaker included
    pub terms: Vec<OrderTerm>,
    /// Store DISTINCT ON; empty when the sort happens in memory
    pub distinct_on: Vec<Expr>,
    /// Hidden projections used by the in-memory sort
    pub sort_columns: Vec<(String, Expr)>,
    pub memory: Option<MemorySort>,
}

impl SortPlan {
    pub fn is_in_memory(&self) -> bool {
        self.memory.is_some()
    }
}

pub struct OrderingCompiler<'c, 'a> {
    compiler: &'c mut FilterCompiler<'a>,
    properties: &'c PropertyRegistry,
    config: &'c OrderingConfig,
}

impl<'c, 'a> OrderingCompiler<'c, 'a> {
    pub fn new(
        compiler: &'c mut FilterCompiler<'a>,
        properties: &'c PropertyRegistry,
        config: &'c OrderingConfig,
    ) -> Self {
        Self {
            compiler,
            properties,
            config,
        }
    }

    pub fn compile(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        order_by: &[String],
        distinct_on: &[String],
    ) -> Result<SortPlan, QueryError> {
        check_distinct_prefix(distinct_on, order_by)?;

        let keys = order_by
            .iter()
            .map(|raw| parse_sort_key(desc, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut terms = Vec::with_capacity(keys.len() + 1);
        let mut memory_keys = Vec::new();
        let mut sort_columns = Vec::new();
        let mut key_columns = Vec::with_capacity(keys.len());
        let mut has_computed = false;
        let mut pk_ordered = false;

        for (raw, key) in order_by.iter().zip(&keys) {
            let descending = key.is_descending();
            let expr = match &key.target {
                SortTarget::Computed(name) => {
                    if !self.properties.contains(&desc.model, name) {
                        return Err(EngineError::Config(format!(
                            "property '{}' of model '{}' has no implementation",
                            name, desc.model
                        ))
                        .into());
                    }
                    has_computed = true;
                    memory_keys.push(MemoryKey::Property {
                        name: name.clone(),
                        descending,
                    });
                    key_columns.push(None);
                    continue;
                }
                SortTarget::Field(path) => {
                    let (expr, field_type) = self
                        .compiler
                        .field_expr(desc, alias, path)
                        .map_err(|e| invalid_key(raw, e))?;
                    if !field_type.is_orderable() {
                        return Err(FilterError::InvalidOrdering {
                            key: raw.clone(),
                            reason: format!("{} fields are not orderable", field_type),
                        }
                        .into());
                    }
                    if path.len() == 1 && path.leaf() == desc.primary_key {
                        pk_ordered = true;
                    }
                    expr
                }
                SortTarget::Count(relation) => self
                    .compiler
                    .relation_count(desc, alias, relation.leaf())
                    .map_err(|e| invalid_key(raw, e))?,
            };

            let column = format!("{}{}", SORT_COLUMN_PREFIX, sort_columns.len());
            memory_keys.push(MemoryKey::Column {
                name: column.clone(),
                descending,
            });
            key_columns.push(Some(column.clone()));
            sort_columns.push((column, expr.clone()));
            terms.push(OrderTerm { expr, descending });
        }

        if !pk_ordered {
            terms.push(OrderTerm {
                expr: Expr::column(alias, &desc.primary_key),
                descending: false,
            });
        }

        // distinct keys lead the ordering, so they are the leading terms
        if let Some((raw, _)) = distinct_on
            .iter()
            .zip(&keys)
            .find(|(_, k)| matches!(k.target, SortTarget::Computed(_)))
        {
            return Err(FilterError::InvalidOrdering {
                key: raw.clone(),
                reason: "computed properties cannot be used in distinctOn".to_string(),
            }
            .into());
        }
        // a store DISTINCT ON would pick each group's row before the computed
        // keys are known, so the in-memory path deduplicates after sorting
        let (distinct_on, distinct_columns) = if has_computed {
            let columns: Vec<String> = key_columns
                .iter()
                .take(distinct_on.len())
                .flatten()
                .cloned()
                .collect();
            (Vec::new(), columns)
        } else {
            let exprs: Vec<Expr> = terms
                .iter()
                .take(distinct_on.len())
                .map(|term| term.expr.clone())
                .collect();
            (exprs, Vec::new())
        };

        let memory = has_computed.then(|| MemorySort {
            keys: memory_keys,
            distinct_columns,
            cap: self.config.max_property_ordering_results,
            warn_on_cap: self.config.property_ordering_warn_on_cap,
        });
        if memory.is_some() {
            tracing::debug!(
                model = %desc.model,
                cap = self.config.max_property_ordering_results,
                "Ordering uses computed properties, sorting in memory"
            );
        }

        Ok(SortPlan {
            keys,
            terms,
            distinct_on,
            sort_columns: if has_computed { sort_columns } else { Vec::new() },
            memory,
        })
    }
}

/// Parse `[-]key` against a model
pub fn parse_sort_key(desc: &Descriptor, raw: &str) -> Result<SortKey, FilterError> {
    let (direction, name) = split_direction(raw);
    if name.is_empty() {
        return Err(FilterError::InvalidOrdering {
            key: raw.to_string(),
            reason: "empty key".to_string(),
        });
    }

    let target = if desc.has_property(name) {
        SortTarget::Computed(name.to_string())
    } else if let Some(relation) = name.strip_suffix(COUNT_SUFFIX)
        && desc.relation(relation).is_some()
    {
        if !desc.relation(relation).is_some_and(|r| r.is_to_many()) {
            return Err(FilterError::InvalidOrdering {
                key: raw.to_string(),
                reason: "only to-many relations can be counted".to_string(),
            });
        }
        SortTarget::Count(FieldPath::parse(relation))
    } else {
        SortTarget::Field(FieldPath::parse(name))
    };
    Ok(SortKey { target, direction })
}

fn split_direction(raw: &str) -> (Direction, &str) {
    match raw.strip_prefix('-') {
        Some(rest) => (Direction::Desc, rest.trim()),
        None => (Direction::Asc, raw.trim_start_matches('+').trim()),
    }
}

/// `distinctOn` keys must match the leading `orderBy` keys (direction aside)
pub fn check_distinct_prefix(distinct_on: &[String], order_by: &[String]) -> Result<(), FilterError> {
    if distinct_on.is_empty() {
        return Ok(());
    }
    let is_prefix = distinct_on.len() <= order_by.len()
        && distinct_on
            .iter()
            .zip(order_by)
            .all(|(d, o)| split_direction(d).1 == split_direction(o).1);
    if is_prefix {
        Ok(())
    } else {
        Err(FilterError::DistinctOnNotPrefix {
            distinct_on: distinct_on.to_vec(),
            order_by: order_by.to_vec(),
        })
    }
}

fn invalid_key(raw: &str, err: QueryError) -> QueryError {
    match err {
        QueryError::Client(e) => FilterError::InvalidOrdering {
            key: raw.to_string(),
            reason: e.to_string(),
        }
        .into(),
        internal => internal,
    }
}
