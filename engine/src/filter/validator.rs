//! Structural security gate
//!
//! Depth, clause count and regex safety are checked independently and all
//! violations are collected in one pass. Runs before compilation and never
//! touches the store.

use regex::RegexBuilder;

use super::ast::{FieldFilter, FilterNode, Quantifier, SortTarget};
use super::regex_safety::is_catastrophic;
use crate::core::config::SecurityConfig;
use crate::error::Violation;

/// Compiled size limit for the syntax check
const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub fn validate(tree: &FilterNode, limits: &SecurityConfig) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    let depth = depth(tree);
    if depth > limits.max_filter_depth {
        violations.push(Violation::DepthExceeded {
            limit: limits.max_filter_depth,
            actual: depth,
        });
    }

    let clauses = clause_count(tree);
    if clauses > limits.max_filter_clauses {
        violations.push(Violation::TooManyClauses {
            limit: limits.max_filter_clauses,
            actual: clauses,
        });
    }

    let mut regexes = Vec::new();
    collect_regex_filters(tree, &mut regexes);
    for filter in regexes {
        if let Some(pattern) = filter.operand.as_str() {
            check_regex(pattern, filter.operator.is_regex_ci(), limits, &mut violations);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Nesting depth. A leaf counts 1, each boolean group and each relation
/// hop adds 1.
pub fn depth(node: &FilterNode) -> usize {
    match node {
        FilterNode::Field(f) => 1 + f.path.hops().len(),
        FilterNode::Group(g) => 1 + g.children.iter().map(depth).max().unwrap_or(0),
        FilterNode::Quantifier(q) => {
            let inner = match &q.quantifier {
                Quantifier::Some(inner) | Quantifier::Every(inner) | Quantifier::None(inner) => {
                    depth(inner)
                }
                Quantifier::Count(_) => 1,
            };
            q.relation.len() + inner
        }
        FilterNode::Aggregation(a) => a.relation.len() + 1,
        FilterNode::ConditionalAggregation(a) => a.relation.len() + depth(&a.condition).max(1),
        FilterNode::Window(w) => {
            let hops = w
                .partition_by
                .iter()
                .map(|p| p.hops().len())
                .chain(w.order_by.iter().map(|k| match &k.target {
                    SortTarget::Field(p) => p.hops().len(),
                    _ => 0,
                }))
                .max()
                .unwrap_or(0);
            1 + hops
        }
        FilterNode::Subquery(s) => {
            s.relation.len() + s.inner_filter.as_deref().map(depth).unwrap_or(0).max(1)
        }
        FilterNode::Exists(e) => {
            e.relation.len() + e.inner_filter.as_deref().map(depth).unwrap_or(0).max(1)
        }
        FilterNode::Array(a) => 1 + a.path.hops().len(),
        FilterNode::Compare(c) => 1 + c.left.hops().len().max(c.right.hops().len()),
        FilterNode::DateTrunc(d) => 1 + d.path.hops().len(),
        FilterNode::ExtractDate(e) => 1 + e.path.hops().len(),
    }
}

/// Number of leaf clauses, including those inside relation filters
pub fn clause_count(node: &FilterNode) -> usize {
    match node {
        FilterNode::Field(_)
        | FilterNode::Array(_)
        | FilterNode::Compare(_)
        | FilterNode::DateTrunc(_)
        | FilterNode::Window(_)
        | FilterNode::Aggregation(_) => 1,
        FilterNode::ExtractDate(e) => e.parts.len().max(1),
        FilterNode::Group(g) => g.children.iter().map(clause_count).sum(),
        FilterNode::Quantifier(q) => match &q.quantifier {
            Quantifier::Some(inner) | Quantifier::Every(inner) | Quantifier::None(inner) => {
                clause_count(inner).max(1)
            }
            Quantifier::Count(_) => 1,
        },
        FilterNode::ConditionalAggregation(a) => 1 + clause_count(&a.condition),
        FilterNode::Subquery(s) => 1 + s.inner_filter.as_deref().map(clause_count).unwrap_or(0),
        FilterNode::Exists(e) => e.inner_filter.as_deref().map(clause_count).unwrap_or(0).max(1),
    }
}

fn collect_regex_filters<'a>(node: &'a FilterNode, out: &mut Vec<&'a FieldFilter>) {
    match node {
        FilterNode::Field(f) if f.operator.is_regex() => out.push(f),
        FilterNode::Group(g) => g.children.iter().for_each(|c| collect_regex_filters(c, out)),
        FilterNode::Quantifier(q) => match &q.quantifier {
            Quantifier::Some(inner) | Quantifier::Every(inner) | Quantifier::None(inner) => {
                collect_regex_filters(inner, out)
            }
            Quantifier::Count(_) => {}
        },
        FilterNode::ConditionalAggregation(a) => collect_regex_filters(&a.condition, out),
        FilterNode::Subquery(s) => {
            if let Some(inner) = &s.inner_filter {
                collect_regex_filters(inner, out);
            }
        }
        FilterNode::Exists(e) => {
            if let Some(inner) = &e.inner_filter {
                collect_regex_filters(inner, out);
            }
        }
        _ => {}
    }
}

fn check_regex(
    pattern: &str,
    case_insensitive: bool,
    limits: &SecurityConfig,
    violations: &mut Vec<Violation>,
) {
    let length = pattern.chars().count();
    if length > limits.max_regex_length {
        violations.push(Violation::RegexTooLong {
            limit: limits.max_regex_length,
            actual: length,
        });
        return;
    }

    if let Err(e) = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
    {
        violations.push(Violation::RegexInvalid {
            reason: e.to_string(),
        });
        return;
    }

    if limits.reject_unsafe_regex && is_catastrophic(pattern) {
        violations.push(Violation::RegexUnsafe);
    }
}
