//! Filter tree to store operation
//!
//! Relation paths lower to correlated subqueries against the related table,
//! so a filter never multiplies the rows of the filtered model:
//! - foreign key: `t.pk = parent.column`
//! - reverse: `t.column = parent.pk`
//! - many-to-many: join table correlated on `source_column`, target joined
//!   on `target_column`
//!
//! The root model is always aliased `t0`. Date conveniences lower to
//! half-open `[start, end)` ranges computed from the compiler's clock.

use std::sync::Arc;

use chrono::NaiveDateTime;

use super::ast::{
    AggregateFn, ArrayFilter, BoolKind, Comparator, CompareOp, DatePart, DateTruncFilter,
    DatePrecision, ExistsFilter, ExtractDateFilter, FieldCompareFilter, FieldFilter, FieldPath,
    FilterNode, Quantifier, RelationQuantifier, SortKey, SortTarget, SubqueryFilter, Value,
    WindowFilter,
};
use super::condition::{
    ArithOp, ArrayOp, CmpOp, Condition, Expr, Join, OrderTerm, SqlType, Subquery, TableRef,
    WINDOW_RANK_COLUMN, WindowQuery,
};
use super::dates::{
    DateRange, format_date, format_timestamp, iso_week_range, month_range, parse_datetime,
    period_containing, previous_period, quarter_range, relative_period, year_range,
};
use super::operators::Operator;
use crate::descriptor::{Descriptor, DescriptorSource, RelationShape};
use crate::error::{FilterError, QueryError};
use crate::schema::{Feature, FeatureFlags, FieldType, RelationKind};
use crate::utils::sql::{LikeAnchor, like_pattern};

/// Alias of the filtered model's table
pub const ROOT_ALIAS: &str = "t0";

type Compiled = Result<Condition, QueryError>;

/// Related table reached from a parent alias
struct Hop {
    from: TableRef,
    joins: Vec<Join>,
    correlation: Condition,
    target: Arc<Descriptor>,
    alias: String,
}

impl Hop {
    fn subquery(self, filter: Condition, projection: Option<Expr>) -> Subquery {
        Subquery {
            from: self.from,
            joins: self.joins,
            filter: Condition::and(vec![self.correlation, filter]),
            projection,
            order_by: Vec::new(),
            limit: None,
        }
    }
}

pub struct FilterCompiler<'a> {
    descriptors: &'a dyn DescriptorSource,
    features: FeatureFlags,
    now: NaiveDateTime,
    next_alias: usize,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(
        descriptors: &'a dyn DescriptorSource,
        features: FeatureFlags,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            descriptors,
            features,
            now,
            next_alias: 1,
        }
    }

    /// Compile a tree rooted at `model`, aliased [`ROOT_ALIAS`]
    pub fn compile(&mut self, model: &str, node: &FilterNode) -> Compiled {
        let desc = self.descriptors.descriptor(model)?;
        self.node(&desc, ROOT_ALIAS, node)
    }

    /// Compile a tree against an already-aliased table
    pub fn compile_at(&mut self, desc: &Descriptor, alias: &str, node: &FilterNode) -> Compiled {
        self.node(desc, alias, node)
    }

    fn fresh_alias(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn node(&mut self, desc: &Descriptor, alias: &str, node: &FilterNode) -> Compiled {
        match node {
            FilterNode::Field(f) => self.field_filter(desc, alias, f),
            FilterNode::Group(g) => {
                let children = g
                    .children
                    .iter()
                    .map(|c| self.node(desc, alias, c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match g.kind {
                    BoolKind::And => Condition::and(children),
                    BoolKind::Or => Condition::or(children),
                    // unknown counts as "not matching", so NULLs pass a negation
                    BoolKind::Not => Condition::not_true(Condition::and(children)),
                })
            }
            FilterNode::Quantifier(q) => self.quantifier(desc, alias, q),
            FilterNode::Aggregation(a) => {
                self.aggregation(desc, alias, &a.relation, a.field.as_deref(), a.agg, None, &a.comparator)
            }
            FilterNode::ConditionalAggregation(a) => {
                self.features.require(Feature::ConditionalAggregation)?;
                self.aggregation(
                    desc,
                    alias,
                    &a.relation,
                    a.field.as_deref(),
                    a.agg,
                    Some(&a.condition),
                    &a.comparator,
                )
            }
            FilterNode::Window(w) => self.window(desc, alias, w),
            FilterNode::Subquery(s) => self.subquery(desc, alias, s),
            FilterNode::Exists(e) => self.exists(desc, alias, e),
            FilterNode::Array(a) => self.array(desc, alias, a),
            FilterNode::Compare(c) => self.compare(desc, alias, c),
            FilterNode::DateTrunc(t) => self.date_trunc(desc, alias, t),
            FilterNode::ExtractDate(e) => self.extract(desc, alias, e),
        }
    }

    // =========================================================================
    // Relation traversal
    // =========================================================================

    fn hop(&mut self, desc: &Descriptor, alias: &str, name: &str) -> Result<Hop, QueryError> {
        let relation = desc.relation(name).ok_or_else(|| FilterError::UnknownField {
            model: desc.model.clone(),
            field: name.to_string(),
        })?;
        let target = self.descriptors.descriptor(&relation.target)?;

        let hop = match &relation.kind {
            RelationKind::ForeignKey { column } => {
                let t = self.fresh_alias("t");
                Hop {
                    from: TableRef {
                        table: target.table.clone(),
                        alias: t.clone(),
                    },
                    joins: Vec::new(),
                    correlation: Condition::compare(
                        Expr::column(&t, &target.primary_key),
                        CmpOp::Eq,
                        Expr::column(alias, column),
                    ),
                    alias: t,
                    target,
                }
            }
            RelationKind::Reverse { column } => {
                let t = self.fresh_alias("t");
                Hop {
                    from: TableRef {
                        table: target.table.clone(),
                        alias: t.clone(),
                    },
                    joins: Vec::new(),
                    correlation: Condition::compare(
                        Expr::column(&t, column),
                        CmpOp::Eq,
                        Expr::column(alias, &desc.primary_key),
                    ),
                    alias: t,
                    target,
                }
            }
            RelationKind::ManyToMany {
                through,
                source_column,
                target_column,
            } => {
                let j = self.fresh_alias("t");
                let t = self.fresh_alias("t");
                Hop {
                    from: TableRef {
                        table: through.clone(),
                        alias: j.clone(),
                    },
                    joins: vec![Join {
                        table: TableRef {
                            table: target.table.clone(),
                            alias: t.clone(),
                        },
                        on: Condition::compare(
                            Expr::column(&t, &target.primary_key),
                            CmpOp::Eq,
                            Expr::column(&j, target_column),
                        ),
                    }],
                    correlation: Condition::compare(
                        Expr::column(&j, source_column),
                        CmpOp::Eq,
                        Expr::column(alias, &desc.primary_key),
                    ),
                    alias: t,
                    target,
                }
            }
        };
        Ok(hop)
    }

    /// Existential walk over `hops`, building the innermost predicate with `build`
    fn through<F>(&mut self, desc: &Descriptor, alias: &str, hops: &[String], build: F) -> Compiled
    where
        F: FnOnce(&mut Self, &Descriptor, &str) -> Compiled,
    {
        match hops.split_first() {
            None => build(self, desc, alias),
            Some((first, rest)) => {
                let hop = self.hop(desc, alias, first)?;
                let target = Arc::clone(&hop.target);
                let inner_alias = hop.alias.clone();
                let inner = self.through(&target, &inner_alias, rest, build)?;
                Ok(Condition::exists(hop.subquery(inner, None), false))
            }
        }
    }

    /// Walk to the parent of `relation`'s last segment and hand its hop to `build`
    fn relation_hop<F>(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        relation: &FieldPath,
        build: F,
    ) -> Compiled
    where
        F: FnOnce(&mut Self, Hop) -> Compiled,
    {
        self.through(desc, alias, relation.hops(), |s, d, a| {
            let hop = s.hop(d, a, relation.leaf())?;
            build(s, hop)
        })
    }

    /// Scalar expression for a field reached through to-one relations
    pub fn field_expr(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        path: &FieldPath,
    ) -> Result<(Expr, FieldType), QueryError> {
        self.to_one_expr(desc, alias, path.segments(), false)
    }

    /// Scalar `COUNT(*)` of rows related to `alias` through `relation`
    pub fn relation_count(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        relation: &str,
    ) -> Result<Expr, QueryError> {
        let hop = self.hop(desc, alias, relation)?;
        Ok(Expr::Scalar(Box::new(hop.subquery(
            Condition::Always,
            Some(Expr::Aggregate(AggregateFn::Count, None)),
        ))))
    }

    fn to_one_expr(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        segments: &[String],
        allow_foreign_key: bool,
    ) -> Result<(Expr, FieldType), QueryError> {
        match segments {
            [] => Err(FilterError::UnknownField {
                model: desc.model.clone(),
                field: String::new(),
            }
            .into()),
            [leaf] => {
                if let Some(field) = desc.field(leaf) {
                    return Ok((Expr::column(alias, &field.column), field.field_type));
                }
                if allow_foreign_key
                    && let Some(RelationShape {
                        kind: RelationKind::ForeignKey { column },
                        ..
                    }) = desc.relation(leaf)
                {
                    return Ok((Expr::column(alias, column), FieldType::Id));
                }
                Err(FilterError::UnknownField {
                    model: desc.model.clone(),
                    field: leaf.clone(),
                }
                .into())
            }
            [hop, rest @ ..] => {
                if desc.relation(hop).is_some_and(RelationShape::is_to_many) {
                    return Err(FilterError::operand(
                        segments.join("."),
                        hop.as_str(),
                        "only to-one relations can be traversed here",
                    )
                    .into());
                }
                let h = self.hop(desc, alias, hop)?;
                let target = Arc::clone(&h.target);
                let inner_alias = h.alias.clone();
                let (inner, ty) = self.to_one_expr(&target, &inner_alias, rest, allow_foreign_key)?;
                Ok((
                    Expr::Scalar(Box::new(h.subquery(Condition::Always, Some(inner)))),
                    ty,
                ))
            }
        }
    }

    /// ORDER BY terms for a nested query, with a primary key tiebreaker
    fn order_terms(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        keys: &[SortKey],
    ) -> Result<Vec<OrderTerm>, QueryError> {
        let mut terms = Vec::with_capacity(keys.len() + 1);
        for key in keys {
            let SortTarget::Field(path) = &key.target else {
                return Err(FilterError::InvalidOrdering {
                    key: format!("{:?}", key.target),
                    reason: "only field keys are allowed inside a filter".to_string(),
                }
                .into());
            };
            let (expr, _) = self.field_expr(desc, alias, path)?;
            terms.push(OrderTerm {
                expr,
                descending: key.is_descending(),
            });
        }
        terms.push(OrderTerm {
            expr: Expr::column(alias, &desc.primary_key),
            descending: false,
        });
        Ok(terms)
    }

    // =========================================================================
    // Field filters
    // =========================================================================

    fn field_filter(&mut self, desc: &Descriptor, alias: &str, f: &FieldFilter) -> Compiled {
        let hops = f.path.hops();
        let label = f.path.to_string();
        let leaf = f.path.leaf();

        // a missing related row is as null as a null column, so operators
        // that keep nulls keep it too
        if !hops.is_empty() && keeps_null(f.operator, &f.operand) {
            let missing = Condition::not(self.through(desc, alias, hops, |_, _, _| Ok(Condition::Always))?);
            let null = self.through(desc, alias, hops, |s, d, a| {
                s.leaf(d, a, leaf, &label, f.operator, &f.operand)
            })?;
            return Ok(Condition::or(vec![missing, null]));
        }

        self.through(desc, alias, hops, |s, d, a| {
            s.leaf(d, a, leaf, &label, f.operator, &f.operand)
        })
    }

    fn leaf(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        name: &str,
        label: &str,
        op: Operator,
        operand: &Value,
    ) -> Compiled {
        let field = desc.field(name).ok_or_else(|| FilterError::UnknownField {
            model: desc.model.clone(),
            field: name.to_string(),
        })?;
        if !field.operators.contains(&op) {
            return Err(FilterError::UnknownOperator {
                field: label.to_string(),
                operator: op.name().to_string(),
                field_type: field.field_type.to_string(),
            }
            .into());
        }
        let ty = field.field_type;
        let col = Expr::column(alias, &field.column);
        let err = |reason: &str| -> QueryError { FilterError::operand(label, op.name(), reason).into() };

        if ty == FieldType::Array {
            return match op {
                Operator::Contains | Operator::ContainedBy | Operator::Overlaps => {
                    let items = operand.as_list().ok_or_else(|| err("expected a list"))?;
                    let array_op = match op {
                        Operator::Contains => ArrayOp::Contains,
                        Operator::ContainedBy => ArrayOp::ContainedBy,
                        _ => ArrayOp::Overlaps,
                    };
                    Ok(array_condition(col, array_op, items))
                }
                Operator::Length => Ok(compare_op(
                    Expr::ArrayLength(Box::new(col)),
                    Operator::Eq,
                    operand,
                    label,
                    &plain_param,
                )?),
                _ => compare_op(col, op, operand, label, &plain_param),
            };
        }

        let wrap = |v: &Value| typed_param(ty, v);
        match op {
            Operator::Eq
            | Operator::Neq
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte
            | Operator::In
            | Operator::NotIn
            | Operator::Between
            | Operator::IsNull => compare_op(col, op, operand, label, &wrap),
            Operator::Contains
            | Operator::IContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith => {
                let text = operand.as_str().ok_or_else(|| err("expected a string"))?;
                let anchor = match op {
                    Operator::StartsWith | Operator::IStartsWith => LikeAnchor::Start,
                    Operator::EndsWith | Operator::IEndsWith => LikeAnchor::End,
                    _ => LikeAnchor::Anywhere,
                };
                Ok(Condition::Like {
                    expr: col,
                    pattern: Expr::param(like_pattern(text, anchor)),
                    case_insensitive: matches!(
                        op,
                        Operator::IContains | Operator::IStartsWith | Operator::IEndsWith
                    ),
                })
            }
            Operator::Regex | Operator::IRegex => {
                let pattern = operand.as_str().ok_or_else(|| err("expected a pattern"))?;
                Ok(Condition::Regex {
                    expr: col,
                    pattern: Expr::param(pattern),
                    case_insensitive: op.is_regex_ci(),
                })
            }
            Operator::Year
            | Operator::Month
            | Operator::Day
            | Operator::WeekDay
            | Operator::Hour
            | Operator::Minute => {
                let n = operand.as_i64().ok_or_else(|| err("expected an integer"))?;
                let part = match op {
                    Operator::Year => DatePart::Year,
                    Operator::Month => DatePart::Month,
                    Operator::Day => DatePart::Day,
                    Operator::WeekDay => DatePart::IsoWeekDay,
                    Operator::Hour => DatePart::Hour,
                    _ => DatePart::Minute,
                };
                Ok(Condition::compare(
                    Expr::Extract(part, Box::new(col)),
                    CmpOp::Eq,
                    Expr::param(n),
                ))
            }
            Operator::Date => {
                let day = operand.as_str().ok_or_else(|| err("expected a date"))?;
                Ok(Condition::compare(
                    col.cast(SqlType::Date),
                    CmpOp::Eq,
                    Expr::param(day).cast(SqlType::Date),
                ))
            }
            Operator::HasKey => {
                let key = operand.as_str().ok_or_else(|| err("expected a key"))?;
                Ok(Condition::JsonHasKey(col, Expr::param(key)))
            }
            Operator::HasKeys | Operator::HasAnyKeys => {
                let keys = operand.as_list().ok_or_else(|| err("expected a list of keys"))?;
                let any = op == Operator::HasAnyKeys;
                if keys.is_empty() {
                    return Ok(if any { Condition::Never } else { Condition::Always });
                }
                Ok(Condition::JsonHasKeys {
                    expr: col,
                    keys: keys.iter().map(|k| Expr::Param(k.clone())).collect(),
                    any,
                })
            }
            op if op.is_relative_period() => {
                let wanted = operand.as_bool().ok_or_else(|| err("expected a boolean"))?;
                let range = relative_period(op, self.now)
                    .ok_or_else(|| err("period is outside the supported date range"))?;
                let within = range_condition(col, ty, range);
                Ok(if wanted {
                    within
                } else {
                    Condition::not_true(within)
                })
            }
            _ => Err(err("operator is not supported for this field")),
        }
    }

    // =========================================================================
    // Relation filters
    // =========================================================================

    fn quantifier(&mut self, desc: &Descriptor, alias: &str, q: &RelationQuantifier) -> Compiled {
        let label = q.relation.to_string();
        self.relation_hop(desc, alias, &q.relation, |s, hop| {
            let target = Arc::clone(&hop.target);
            let inner_alias = hop.alias.clone();
            match &q.quantifier {
                Quantifier::Some(inner) => {
                    let cond = s.node(&target, &inner_alias, inner)?;
                    Ok(Condition::exists(hop.subquery(cond, None), false))
                }
                Quantifier::None(inner) => {
                    let cond = s.node(&target, &inner_alias, inner)?;
                    Ok(Condition::exists(hop.subquery(cond, None), true))
                }
                Quantifier::Every(inner) => {
                    // no related row for which the inner filter is not true
                    let cond = s.node(&target, &inner_alias, inner)?;
                    Ok(Condition::exists(
                        hop.subquery(Condition::not_true(cond), None),
                        true,
                    ))
                }
                Quantifier::Count(comparator) => {
                    let count = Expr::Scalar(Box::new(hop.subquery(
                        Condition::Always,
                        Some(Expr::Aggregate(AggregateFn::Count, None)),
                    )));
                    compile_comparator(count, comparator, &label, &plain_param)
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregation(
        &mut self,
        desc: &Descriptor,
        alias: &str,
        relation: &FieldPath,
        field: Option<&str>,
        agg: AggregateFn,
        condition: Option<&FilterNode>,
        comparator: &Comparator,
    ) -> Compiled {
        if agg == AggregateFn::CountDistinct {
            self.features.require(Feature::DistinctCount)?;
        }
        let label = relation.to_string();
        self.relation_hop(desc, alias, relation, |s, hop| {
            let target = Arc::clone(&hop.target);
            let inner_alias = hop.alias.clone();

            let (arg, ty) = match field {
                Some(name) => {
                    let f = target.field(name).ok_or_else(|| FilterError::UnknownField {
                        model: target.model.clone(),
                        field: name.to_string(),
                    })?;
                    (
                        Some(Box::new(Expr::column(&inner_alias, &f.column))),
                        f.field_type,
                    )
                }
                None if agg == AggregateFn::Count => (None, FieldType::Numeric),
                None => {
                    return Err(FilterError::operand(
                        label.as_str(),
                        agg.name(),
                        "aggregation requires a field",
                    )
                    .into());
                }
            };

            let filter = match condition {
                Some(cond) => s.node(&target, &inner_alias, cond)?,
                None => Condition::Always,
            };
            let value = Expr::Scalar(Box::new(
                hop.subquery(filter, Some(Expr::Aggregate(agg, arg))),
            ));
            let typed = matches!(agg, AggregateFn::Min | AggregateFn::Max);
            let wrap = move |v: &Value| {
                if typed {
                    typed_param(ty, v)
                } else {
                    plain_param(v)
                }
            };
            compile_comparator(value, comparator, &label, &wrap)
        })
    }

    fn subquery(&mut self, desc: &Descriptor, alias: &str, sq: &SubqueryFilter) -> Compiled {
        self.features.require(Feature::SubqueryFilters)?;
        let label = sq.relation.child(&sq.field).to_string();
        self.relation_hop(desc, alias, &sq.relation, |s, hop| {
            let target = Arc::clone(&hop.target);
            let inner_alias = hop.alias.clone();
            let field = target.field(&sq.field).ok_or_else(|| FilterError::UnknownField {
                model: target.model.clone(),
                field: sq.field.clone(),
            })?;
            let ty = field.field_type;
            let projection = Expr::column(&inner_alias, &field.column);

            let filter = match &sq.inner_filter {
                Some(inner) => s.node(&target, &inner_alias, inner)?,
                None => Condition::Always,
            };
            let order_by = s.order_terms(&target, &inner_alias, &sq.order_by)?;

            let mut first = hop.subquery(filter, Some(projection));
            first.order_by = order_by;
            first.limit = Some(1);
            compile_comparator(
                Expr::Scalar(Box::new(first)),
                &sq.comparator,
                &label,
                &|v: &Value| typed_param(ty, v),
            )
        })
    }

    fn exists(&mut self, desc: &Descriptor, alias: &str, e: &ExistsFilter) -> Compiled {
        self.features.require(Feature::SubqueryFilters)?;
        self.relation_hop(desc, alias, &e.relation, |s, hop| {
            let target = Arc::clone(&hop.target);
            let inner_alias = hop.alias.clone();
            let filter = match &e.inner_filter {
                Some(inner) => s.node(&target, &inner_alias, inner)?,
                None => Condition::Always,
            };
            Ok(Condition::exists(hop.subquery(filter, None), !e.exists))
        })
    }

    // =========================================================================
    // Model-level filters
    // =========================================================================

    fn window(&mut self, desc: &Descriptor, alias: &str, w: &WindowFilter) -> Compiled {
        self.features.require(Feature::WindowFilters)?;
        let inner = self.fresh_alias("t");
        let derived = self.fresh_alias("w");

        let partition_by = w
            .partition_by
            .iter()
            .map(|p| {
                self.to_one_expr(desc, &inner, p.segments(), true)
                    .map(|(expr, _)| expr)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = self.order_terms(desc, &inner, &w.order_by)?;

        let rank = Expr::column(&derived, WINDOW_RANK_COLUMN);
        let rank_filter = [&w.rank, &w.percentile]
            .into_iter()
            .flatten()
            .map(|c| compile_comparator(rank.clone(), c, "_window", &plain_param))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Condition::InWindow {
            expr: Expr::column(alias, &desc.primary_key),
            query: Box::new(WindowQuery {
                from: TableRef {
                    table: desc.table.clone(),
                    alias: inner.clone(),
                },
                key: Expr::column(&inner, &desc.primary_key),
                function: w.function,
                partition_by,
                order_by,
                alias: derived,
                rank_filter: Condition::and(rank_filter),
            }),
        })
    }

    fn array(&mut self, desc: &Descriptor, alias: &str, a: &ArrayFilter) -> Compiled {
        self.features.require(Feature::ArrayFilters)?;
        let label = a.path.to_string();
        self.through(desc, alias, a.path.hops(), |_, d, t| {
            let field = d
                .field(a.path.leaf())
                .ok_or_else(|| FilterError::UnknownField {
                    model: d.model.clone(),
                    field: a.path.leaf().to_string(),
                })?;
            if field.field_type != FieldType::Array {
                return Err(FilterError::UnknownOperator {
                    field: label.clone(),
                    operator: "array".to_string(),
                    field_type: field.field_type.to_string(),
                }
                .into());
            }
            let col = Expr::column(t, &field.column);

            let mut parts = Vec::new();
            if let Some(values) = &a.contains {
                parts.push(array_condition(col.clone(), ArrayOp::Contains, values));
            }
            if let Some(values) = &a.contained_by {
                parts.push(array_condition(col.clone(), ArrayOp::ContainedBy, values));
            }
            if let Some(values) = &a.overlaps {
                parts.push(array_condition(col.clone(), ArrayOp::Overlaps, values));
            }
            if let Some(length) = &a.length {
                parts.push(compile_comparator(
                    Expr::ArrayLength(Box::new(col.clone())),
                    length,
                    &label,
                    &plain_param,
                )?);
            }
            if let Some(is_null) = a.is_null {
                parts.push(Condition::IsNull {
                    expr: col,
                    negated: !is_null,
                });
            }
            Ok(Condition::and(parts))
        })
    }

    fn compare(&mut self, desc: &Descriptor, alias: &str, c: &FieldCompareFilter) -> Compiled {
        self.features.require(Feature::FieldComparison)?;
        let (left, _) = self.field_expr(desc, alias, &c.left)?;
        let (mut right, _) = self.field_expr(desc, alias, &c.right)?;
        if let Some(multiplier) = c.right_multiplier {
            right = Expr::Arith(Box::new(right), ArithOp::Mul, Box::new(Expr::param(multiplier)));
        }
        if let Some(offset) = c.right_offset {
            right = Expr::Arith(Box::new(right), ArithOp::Add, Box::new(Expr::param(offset)));
        }
        let op = match c.operator {
            CompareOp::Eq => CmpOp::Eq,
            CompareOp::Neq => CmpOp::Ne,
            CompareOp::Gt => CmpOp::Gt,
            CompareOp::Gte => CmpOp::Gte,
            CompareOp::Lt => CmpOp::Lt,
            CompareOp::Lte => CmpOp::Lte,
        };
        Ok(Condition::compare(left, op, right))
    }

    fn date_trunc(&mut self, desc: &Descriptor, alias: &str, t: &DateTruncFilter) -> Compiled {
        self.features.require(Feature::DateTruncFilters)?;
        let label = t.path.to_string();
        let range = self.trunc_range(t).ok_or_else(|| {
            FilterError::operand(label.as_str(), "_trunc", "does not select a valid period")
        })?;
        self.through(desc, alias, t.path.hops(), |_, d, a| {
            let field = temporal_field(d, t.path.leaf(), &label, "_trunc")?;
            if t.precision.is_sub_day() && field.1 == FieldType::Date {
                return Err(FilterError::operand(
                    label.as_str(),
                    "_trunc",
                    "hour and minute precision require a datetime field",
                )
                .into());
            }
            Ok(range_condition(Expr::column(a, &field.0), field.1, range))
        })
    }

    fn trunc_range(&self, t: &DateTruncFilter) -> Option<DateRange> {
        if let Some(value) = &t.value {
            return parse_datetime(value).and_then(|at| period_containing(t.precision, at));
        }
        if let Some(year) = t.year {
            return match t.precision {
                DatePrecision::Year => year_range(year),
                DatePrecision::Quarter => t.quarter.and_then(|q| quarter_range(year, q)),
                DatePrecision::Month => t.month.and_then(|m| month_range(year, m)),
                DatePrecision::Week => t.week.and_then(|w| iso_week_range(year, w)),
                DatePrecision::Day | DatePrecision::Hour | DatePrecision::Minute => None,
            };
        }
        if t.this_period == Some(true) {
            return period_containing(t.precision, self.now);
        }
        if t.last_period == Some(true) {
            return previous_period(t.precision, self.now);
        }
        None
    }

    fn extract(&mut self, desc: &Descriptor, alias: &str, e: &ExtractDateFilter) -> Compiled {
        self.features.require(Feature::ExtractDateFilters)?;
        let label = e.path.to_string();
        self.through(desc, alias, e.path.hops(), |_, d, a| {
            let (column, ty) = temporal_field(d, e.path.leaf(), &label, "_extract")?;
            let mut parts = Vec::with_capacity(e.parts.len());
            for (part, comparator) in &e.parts {
                if part.is_time_of_day() && ty == FieldType::Date {
                    return Err(FilterError::operand(
                        label.as_str(),
                        "_extract",
                        "time parts require a datetime field",
                    )
                    .into());
                }
                let value = Expr::Extract(*part, Box::new(Expr::column(a, &column)));
                parts.push(compile_comparator(value, comparator, &label, &plain_param)?);
            }
            Ok(Condition::and(parts))
        })
    }
}

// =============================================================================
// Operand lowering
// =============================================================================

fn plain_param(value: &Value) -> Expr {
    Expr::Param(value.clone())
}

/// Parameter with the cast the column type needs for comparison
pub(crate) fn typed_param(ty: FieldType, value: &Value) -> Expr {
    let param = Expr::Param(value.clone());
    match ty {
        FieldType::Date => param.cast(SqlType::Date),
        FieldType::Datetime => param.cast(SqlType::Timestamp),
        FieldType::Uuid => param.cast(SqlType::Uuid),
        FieldType::Json => param.cast(SqlType::Json),
        _ => param,
    }
}

/// Array literal elements carry an explicit type so the list is homogeneous
fn array_element(value: &Value) -> Expr {
    let param = Expr::Param(value.clone());
    match value {
        Value::Text(_) => param.cast(SqlType::Text),
        Value::Int(_) => param.cast(SqlType::BigInt),
        Value::Float(_) => param.cast(SqlType::Double),
        _ => param,
    }
}

fn array_condition(col: Expr, op: ArrayOp, values: &[Value]) -> Condition {
    if values.is_empty() {
        return match op {
            ArrayOp::Contains => Condition::Always,
            ArrayOp::Overlaps => Condition::Never,
            ArrayOp::ContainedBy => Condition::compare(
                Expr::ArrayLength(Box::new(col)),
                CmpOp::Eq,
                Expr::param(0i64),
            ),
        };
    }
    Condition::Array {
        expr: col,
        op,
        values: values.iter().map(array_element).collect(),
    }
}

fn range_condition(col: Expr, ty: FieldType, range: DateRange) -> Condition {
    let bound = |at: NaiveDateTime| match ty {
        FieldType::Date => Expr::param(format_date(at.date())).cast(SqlType::Date),
        _ => Expr::param(format_timestamp(at)).cast(SqlType::Timestamp),
    };
    Condition::and(vec![
        Condition::compare(col.clone(), CmpOp::Gte, bound(range.start)),
        Condition::compare(col, CmpOp::Lt, bound(range.end)),
    ])
}

fn temporal_field(
    desc: &Descriptor,
    name: &str,
    label: &str,
    operator: &str,
) -> Result<(String, FieldType), QueryError> {
    let field = desc.field(name).ok_or_else(|| FilterError::UnknownField {
        model: desc.model.clone(),
        field: name.to_string(),
    })?;
    if !field.field_type.is_temporal() {
        return Err(FilterError::UnknownOperator {
            field: label.to_string(),
            operator: operator.to_string(),
            field_type: field.field_type.to_string(),
        }
        .into());
    }
    Ok((field.column.clone(), field.field_type))
}

/// Conjunction of comparator terms against `expr`
fn compile_comparator(
    expr: Expr,
    comparator: &Comparator,
    label: &str,
    wrap: &dyn Fn(&Value) -> Expr,
) -> Compiled {
    let terms = comparator
        .terms
        .iter()
        .map(|term| compare_op(expr.clone(), term.op, &term.value, label, wrap))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Condition::and(terms))
}

/// Whether the operator matches a NULL column
fn keeps_null(op: Operator, operand: &Value) -> bool {
    match op {
        Operator::IsNull => operand.as_bool() == Some(true),
        Operator::Neq | Operator::NotIn => true,
        _ => false,
    }
}

/// Comparison-style operator (`eq` .. `between`, `isNull`) against `expr`
fn compare_op(
    expr: Expr,
    op: Operator,
    value: &Value,
    label: &str,
    wrap: &dyn Fn(&Value) -> Expr,
) -> Compiled {
    let err = |reason: &str| -> QueryError { FilterError::operand(label, op.name(), reason).into() };
    let cmp = |c: CmpOp, expr: Expr| Condition::compare(expr, c, wrap(value));
    Ok(match op {
        Operator::Eq => cmp(CmpOp::Eq, expr),
        // NULL is "not equal" too
        Operator::Neq => Condition::not_true(cmp(CmpOp::Eq, expr)),
        Operator::Gt => cmp(CmpOp::Gt, expr),
        Operator::Gte => cmp(CmpOp::Gte, expr),
        Operator::Lt => cmp(CmpOp::Lt, expr),
        Operator::Lte => cmp(CmpOp::Lte, expr),
        Operator::In | Operator::NotIn => {
            let items = value.as_list().ok_or_else(|| err("expected a list"))?;
            let negated = op == Operator::NotIn;
            if items.is_empty() {
                return Ok(if negated {
                    Condition::Always
                } else {
                    Condition::Never
                });
            }
            let list = Condition::InList {
                expr,
                values: items.iter().map(wrap).collect(),
                negated: false,
            };
            if negated {
                Condition::not_true(list)
            } else {
                list
            }
        }
        Operator::Between => match value.as_list() {
            Some([low, high]) => Condition::Between(expr, wrap(low), wrap(high)),
            _ => return Err(err("expected [low, high]")),
        },
        Operator::IsNull => {
            let is_null = value.as_bool().ok_or_else(|| err("expected a boolean"))?;
            Condition::IsNull {
                expr,
                negated: !is_null,
            }
        }
        _ => return Err(err("not a comparison operator")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorCache;
    use crate::filter::ast::{
        AggregationFilter, Direction, SubqueryFilter, WindowFunction,
    };
    use crate::schema::Schema;
    use crate::sql::{DuckdbDialect, SqlRenderer};
    use chrono::NaiveDate;

    const SHOP: &str = r#"{
        "name": "shop",
        "models": [
            {"name": "product", "table": "products",
             "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"},
                {"name": "price", "type": "numeric"},
                {"name": "cost", "type": "numeric"},
                {"name": "createdAt", "column": "created_at", "type": "datetime"},
                {"name": "tags", "type": "array"}
             ],
             "relations": [
                {"name": "category", "target": "category", "kind": "foreign_key", "column": "category_id"},
                {"name": "reviews", "target": "review", "kind": "reverse", "column": "product_id"},
                {"name": "labels", "target": "label", "kind": "many_to_many",
                 "through": "product_labels", "source_column": "product_id", "target_column": "label_id"}
             ]},
            {"name": "category", "table": "categories",
             "fields": [{"name": "id", "type": "id"}, {"name": "name", "type": "string"}]},
            {"name": "review", "table": "reviews",
             "fields": [{"name": "id", "type": "id"}, {"name": "rating", "type": "numeric"},
                        {"name": "createdAt", "column": "created_at", "type": "datetime"}]},
            {"name": "label", "table": "labels",
             "fields": [{"name": "id", "type": "id"}, {"name": "name", "type": "string"}]}
        ]
    }"#;

    fn cache() -> DescriptorCache {
        DescriptorCache::new(Arc::new(Schema::from_json_str(SHOP).unwrap()), 10)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn compile_with(features: FeatureFlags, node: &FilterNode) -> Compiled {
        let cache = cache();
        FilterCompiler::new(&cache, features, now()).compile("product", node)
    }

    fn sql(node: &FilterNode) -> (String, Vec<Value>) {
        let cond = compile_with(FeatureFlags::all(), node).unwrap();
        let mut r = SqlRenderer::new(&DuckdbDialect);
        let text = r.condition(&cond);
        (text, r.into_params())
    }

    #[test]
    fn test_between_and_eq() {
        let node = FilterNode::and(vec![
            FilterNode::Field(FieldFilter {
                path: FieldPath::parse("price"),
                operator: Operator::Between,
                operand: Value::List(vec![Value::Int(100), Value::Int(500)]),
            }),
            FilterNode::field("name", Operator::Eq, "lamp"),
        ]);
        let (text, params) = sql(&node);
        assert_eq!(
            text,
            "(t0.\"price\" BETWEEN ? AND ? AND t0.\"name\" = ?)"
        );
        assert_eq!(
            params,
            vec![Value::Int(100), Value::Int(500), Value::from("lamp")]
        );
    }

    #[test]
    fn test_like_escapes_metacharacters() {
        let (text, params) = sql(&FilterNode::field("name", Operator::IContains, "50%_off"));
        assert_eq!(text, "t0.\"name\" ILIKE ? ESCAPE '\\'");
        assert_eq!(params, vec![Value::from("%50\\%\\_off%")]);
    }

    #[test]
    fn test_neq_and_not_include_nulls() {
        let (text, _) = sql(&FilterNode::field("name", Operator::Neq, "x"));
        assert_eq!(text, "(t0.\"name\" = ?) IS NOT TRUE");
        let (text, _) = sql(&FilterNode::not(FilterNode::field("price", Operator::Gt, 10i64)));
        assert_eq!(text, "(t0.\"price\" > ?) IS NOT TRUE");
    }

    #[test]
    fn test_empty_lists_fold() {
        let empty_in = FilterNode::field("name", Operator::In, Value::List(vec![]));
        assert_eq!(
            compile_with(FeatureFlags::all(), &empty_in).unwrap(),
            Condition::Never
        );
        let empty_not_in = FilterNode::field("name", Operator::NotIn, Value::List(vec![]));
        assert_eq!(
            compile_with(FeatureFlags::all(), &empty_not_in).unwrap(),
            Condition::Always
        );
    }

    #[test]
    fn test_to_one_path_uses_exists() {
        let (text, _) = sql(&FilterNode::field("category.name", Operator::Eq, "books"));
        assert_eq!(
            text,
            "EXISTS (SELECT 1 FROM \"categories\" AS t1 WHERE (t1.\"id\" = t0.\"category_id\" AND t1.\"name\" = ?))"
        );
    }

    #[test]
    fn test_is_null_through_relation_covers_missing_row() {
        let (text, _) = sql(&FilterNode::field("category.name", Operator::IsNull, true));
        assert!(text.starts_with("(NOT (EXISTS (SELECT 1 FROM \"categories\" AS t1 WHERE t1.\"id\" = t0.\"category_id\"))"));
        assert!(text.contains("t2.\"name\" IS NULL"));
    }

    #[test]
    fn test_neq_through_relation_keeps_missing_row() {
        let (text, _) = sql(&FilterNode::field("category.name", Operator::Neq, "books"));
        assert!(text.starts_with("(NOT (EXISTS (SELECT 1 FROM \"categories\" AS t1 WHERE t1.\"id\" = t0.\"category_id\"))"));
        assert!(text.contains("(t2.\"name\" = ?) IS NOT TRUE"));

        let (text, _) = sql(&FilterNode::field(
            "category.name",
            Operator::NotIn,
            Value::List(vec!["books".into()]),
        ));
        assert!(text.starts_with("(NOT (EXISTS"));

        let (text, _) = sql(&FilterNode::field("category.name", Operator::Eq, "books"));
        assert!(!text.contains("NOT"));
    }

    #[test]
    fn test_every_is_not_exists_not_true() {
        let node = FilterNode::Quantifier(RelationQuantifier {
            relation: FieldPath::parse("reviews"),
            quantifier: Quantifier::Every(Box::new(FilterNode::field(
                "rating",
                Operator::Gte,
                4i64,
            ))),
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "NOT EXISTS (SELECT 1 FROM \"reviews\" AS t1 WHERE (t1.\"product_id\" = t0.\"id\" AND (t1.\"rating\" >= ?) IS NOT TRUE))"
        );
    }

    #[test]
    fn test_many_to_many_hop() {
        let node = FilterNode::Quantifier(RelationQuantifier {
            relation: FieldPath::parse("labels"),
            quantifier: Quantifier::Some(Box::new(FilterNode::field("name", Operator::Eq, "sale"))),
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "EXISTS (SELECT 1 FROM \"product_labels\" AS t1 JOIN \"labels\" AS t2 ON t2.\"id\" = t1.\"label_id\" WHERE (t1.\"product_id\" = t0.\"id\" AND t2.\"name\" = ?))"
        );
    }

    #[test]
    fn test_count_quantifier() {
        let node = FilterNode::Quantifier(RelationQuantifier {
            relation: FieldPath::parse("reviews"),
            quantifier: Quantifier::Count(Comparator::new(vec![(Operator::Gte, Value::Int(2))])),
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "(SELECT COUNT(*) FROM \"reviews\" AS t1 WHERE t1.\"product_id\" = t0.\"id\") >= ?"
        );
    }

    #[test]
    fn test_aggregation_avg() {
        let node = FilterNode::Aggregation(AggregationFilter {
            relation: FieldPath::parse("reviews"),
            field: Some("rating".to_string()),
            agg: AggregateFn::Avg,
            comparator: Comparator::new(vec![(Operator::Gte, Value::Int(4))]),
        });
        let (text, _) = sql(&node);
        assert!(text.starts_with("(SELECT AVG(t1.\"rating\") FROM \"reviews\" AS t1"));
    }

    #[test]
    fn test_subquery_latest_review() {
        let node = FilterNode::Subquery(SubqueryFilter {
            relation: FieldPath::parse("reviews"),
            order_by: vec![SortKey::field("createdAt", Direction::Desc)],
            inner_filter: None,
            field: "rating".to_string(),
            comparator: Comparator::new(vec![(Operator::Gte, Value::Int(4))]),
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "(SELECT t1.\"rating\" FROM \"reviews\" AS t1 WHERE t1.\"product_id\" = t0.\"id\" ORDER BY t1.\"created_at\" DESC NULLS LAST, t1.\"id\" ASC NULLS LAST LIMIT 1) >= ?"
        );
    }

    #[test]
    fn test_window_row_number_per_category() {
        let node = FilterNode::Window(WindowFilter {
            function: WindowFunction::RowNumber,
            partition_by: vec![FieldPath::parse("category")],
            order_by: vec![SortKey::field("price", Direction::Desc)],
            rank: Some(Comparator::eq(1i64)),
            percentile: None,
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "t0.\"id\" IN (SELECT w2.__key FROM (SELECT t1.\"id\" AS __key, ROW_NUMBER() OVER (PARTITION BY t1.\"category_id\" ORDER BY t1.\"price\" DESC NULLS LAST, t1.\"id\" ASC NULLS LAST) AS __rank FROM \"products\" AS t1) AS w2 WHERE w2.\"__rank\" = ?)"
        );
    }

    #[test]
    fn test_array_filter_and_empty_lists() {
        let node = FilterNode::Array(ArrayFilter {
            path: FieldPath::parse("tags"),
            contains: Some(vec![Value::from("python"), Value::from("django")]),
            ..Default::default()
        });
        let (text, _) = sql(&node);
        assert_eq!(
            text,
            "list_has_all(t0.\"tags\", [CAST(? AS VARCHAR), CAST(? AS VARCHAR)])"
        );

        let empty_overlap = FilterNode::Array(ArrayFilter {
            path: FieldPath::parse("tags"),
            overlaps: Some(vec![]),
            ..Default::default()
        });
        assert_eq!(
            compile_with(FeatureFlags::all(), &empty_overlap).unwrap(),
            Condition::Never
        );
    }

    #[test]
    fn test_field_compare_arithmetic() {
        let node = FilterNode::Compare(FieldCompareFilter {
            left: FieldPath::parse("price"),
            operator: CompareOp::Gt,
            right: FieldPath::parse("cost"),
            right_multiplier: Some(1.5),
            right_offset: Some(2.0),
        });
        let (text, params) = sql(&node);
        assert_eq!(text, "t0.\"price\" > ((t0.\"cost\" * ?) + ?)");
        assert_eq!(params, vec![Value::Float(1.5), Value::Float(2.0)]);
    }

    #[test]
    fn test_relative_period_range() {
        let (text, params) = sql(&FilterNode::field("createdAt", Operator::ThisMonth, true));
        assert_eq!(
            text,
            "(t0.\"created_at\" >= CAST(? AS TIMESTAMP) AND t0.\"created_at\" < CAST(? AS TIMESTAMP))"
        );
        assert_eq!(
            params,
            vec![
                Value::from("2024-03-01 00:00:00"),
                Value::from("2024-04-01 00:00:00")
            ]
        );
    }

    #[test]
    fn test_trunc_quarter() {
        let node = FilterNode::DateTrunc(DateTruncFilter {
            path: FieldPath::parse("createdAt"),
            precision: DatePrecision::Quarter,
            value: None,
            year: Some(2023),
            quarter: Some(4),
            month: None,
            week: None,
            this_period: None,
            last_period: None,
        });
        let (_, params) = sql(&node);
        assert_eq!(
            params,
            vec![
                Value::from("2023-10-01 00:00:00"),
                Value::from("2024-01-01 00:00:00")
            ]
        );
    }

    #[test]
    fn test_disabled_feature_is_client_error() {
        let node = FilterNode::Exists(ExistsFilter {
            relation: FieldPath::parse("reviews"),
            inner_filter: None,
            exists: true,
        });
        let err = compile_with(FeatureFlags::default(), &node).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.code(), "FEATURE_NOT_ENABLED");
    }

    #[test]
    fn test_unknown_field_in_hand_built_tree() {
        let err = compile_with(
            FeatureFlags::all(),
            &FilterNode::field("colour", Operator::Eq, "red"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_FIELD");

        let err = compile_with(
            FeatureFlags::all(),
            &FilterNode::field("name", Operator::Gt, "a"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_OPERATOR");
    }
}
