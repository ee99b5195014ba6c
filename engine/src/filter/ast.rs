//! Filter tree types
//!
//! Pure data. Every filter kind is a variant of [`FilterNode`] so the
//! validator and compiler match on it exhaustively.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

use super::operators::Operator;

// =============================================================================
// Paths and values
// =============================================================================

/// Dotted relation chain ending in a field or relation name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Last segment (the field or relation name)
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// Relation hops leading to the leaf
    pub fn hops(&self) -> &[String] {
        match self.0.split_last() {
            Some((_, hops)) => hops,
            None => &[],
        }
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn join(&self, other: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Operand value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Json(JsonValue),
}

impl Value {
    /// Convert a client JSON value; objects are kept as JSON documents
    /// `None` for integers outside the `i64` range, which would lose precision
    /// as floats
    pub fn from_json(json: &JsonValue) -> Option<Self> {
        Some(match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None if n.is_u64() => return None,
                None => Self::Float(n.as_f64()?),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect::<Option<_>>()?)
            }
            JsonValue::Object(_) => Self::Json(json.clone()),
        })
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => JsonValue::from(*f),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Json(j) => j.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// =============================================================================
// Filter nodes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Field(FieldFilter),
    Group(BooleanGroup),
    Quantifier(RelationQuantifier),
    Aggregation(AggregationFilter),
    ConditionalAggregation(ConditionalAggregationFilter),
    Window(WindowFilter),
    Subquery(SubqueryFilter),
    Exists(ExistsFilter),
    Array(ArrayFilter),
    Compare(FieldCompareFilter),
    DateTrunc(DateTruncFilter),
    ExtractDate(ExtractDateFilter),
}

impl FilterNode {
    /// Filter that places no constraint
    pub fn empty() -> Self {
        Self::Group(BooleanGroup {
            kind: BoolKind::And,
            children: Vec::new(),
        })
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::Group(BooleanGroup {
            kind: BoolKind::And,
            children,
        })
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::Group(BooleanGroup {
            kind: BoolKind::Or,
            children,
        })
    }

    pub fn not(child: FilterNode) -> Self {
        Self::Group(BooleanGroup {
            kind: BoolKind::Not,
            children: vec![child],
        })
    }

    pub fn field(path: &str, operator: Operator, operand: impl Into<Value>) -> Self {
        Self::Field(FieldFilter {
            path: FieldPath::parse(path),
            operator,
            operand: operand.into(),
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Group(g) if g.kind == BoolKind::And && g.children.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub path: FieldPath,
    pub operator: Operator,
    pub operand: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolKind {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanGroup {
    pub kind: BoolKind,
    pub children: Vec<FilterNode>,
}

/// Relation-level test. `relation` is the full path from the current model.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationQuantifier {
    pub relation: FieldPath,
    pub quantifier: Quantifier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Quantifier {
    Some(Box<FilterNode>),
    Every(Box<FilterNode>),
    None(Box<FilterNode>),
    Count(Comparator),
}

/// Conjunction of comparison terms, e.g. `{gte: 1, lt: 10}`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Comparator {
    pub terms: Vec<ComparatorTerm>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparatorTerm {
    pub op: Operator,
    pub value: Value,
}

impl Comparator {
    pub fn new(terms: Vec<(Operator, Value)>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|(op, value)| ComparatorTerm { op, value })
                .collect(),
        }
    }

    pub fn eq(value: impl Into<Value>) -> Self {
        Self::new(vec![(Operator::Eq, value.into())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl AggregateFn {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "countDistinct" => Some(Self::CountDistinct),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::CountDistinct => "countDistinct",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationFilter {
    pub relation: FieldPath,
    /// Target field; `None` counts related rows
    pub field: Option<String>,
    pub agg: AggregateFn,
    pub comparator: Comparator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalAggregationFilter {
    pub relation: FieldPath,
    pub field: Option<String>,
    pub condition: Box<FilterNode>,
    pub agg: AggregateFn,
    pub comparator: Comparator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    Rank,
    DenseRank,
    RowNumber,
    PercentRank,
}

impl WindowFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RANK" | "rank" => Some(Self::Rank),
            "DENSE_RANK" | "denseRank" => Some(Self::DenseRank),
            "ROW_NUMBER" | "rowNumber" => Some(Self::RowNumber),
            "PERCENT_RANK" | "percentRank" => Some(Self::PercentRank),
            _ => None,
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Rank => "RANK",
            Self::DenseRank => "DENSE_RANK",
            Self::RowNumber => "ROW_NUMBER",
            Self::PercentRank => "PERCENT_RANK",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowFilter {
    pub function: WindowFunction,
    pub partition_by: Vec<FieldPath>,
    pub order_by: Vec<SortKey>,
    pub rank: Option<Comparator>,
    pub percentile: Option<Comparator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryFilter {
    pub relation: FieldPath,
    pub order_by: Vec<SortKey>,
    pub inner_filter: Option<Box<FilterNode>>,
    pub field: String,
    pub comparator: Comparator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistsFilter {
    pub relation: FieldPath,
    pub inner_filter: Option<Box<FilterNode>>,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayFilter {
    pub path: FieldPath,
    pub contains: Option<Vec<Value>>,
    pub contained_by: Option<Vec<Value>>,
    pub overlaps: Option<Vec<Value>>,
    pub length: Option<Comparator>,
    pub is_null: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// `left OP (right * rightMultiplier + rightOffset)`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCompareFilter {
    pub left: FieldPath,
    pub operator: CompareOp,
    pub right: FieldPath,
    pub right_multiplier: Option<f64>,
    pub right_offset: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
}

impl DatePrecision {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "year" => Some(Self::Year),
            "quarter" => Some(Self::Quarter),
            "month" => Some(Self::Month),
            "week" => Some(Self::Week),
            "day" => Some(Self::Day),
            "hour" => Some(Self::Hour),
            "minute" => Some(Self::Minute),
            _ => None,
        }
    }

    /// Precision finer than a day, only meaningful for datetime fields
    pub fn is_sub_day(&self) -> bool {
        matches!(self, Self::Hour | Self::Minute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateTruncFilter {
    pub path: FieldPath,
    pub precision: DatePrecision,
    pub value: Option<String>,
    pub year: Option<i32>,
    pub quarter: Option<u32>,
    pub month: Option<u32>,
    pub week: Option<u32>,
    pub this_period: Option<bool>,
    pub last_period: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Quarter,
    Week,
    DayOfWeek,
    DayOfYear,
    IsoWeekDay,
    IsoYear,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "year" => Some(Self::Year),
            "month" => Some(Self::Month),
            "day" => Some(Self::Day),
            "quarter" => Some(Self::Quarter),
            "week" => Some(Self::Week),
            "dayOfWeek" => Some(Self::DayOfWeek),
            "dayOfYear" => Some(Self::DayOfYear),
            "isoWeekDay" => Some(Self::IsoWeekDay),
            "isoYear" => Some(Self::IsoYear),
            "hour" => Some(Self::Hour),
            "minute" => Some(Self::Minute),
            "second" => Some(Self::Second),
            _ => None,
        }
    }

    pub fn is_time_of_day(&self) -> bool {
        matches!(self, Self::Hour | Self::Minute | Self::Second)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractDateFilter {
    pub path: FieldPath,
    pub parts: BTreeMap<DatePart, Comparator>,
}

// =============================================================================
// Sort keys
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortTarget {
    /// Persisted field, possibly through to-one relations
    Field(FieldPath),
    /// Number of related rows (`reviews_count`)
    Count(FieldPath),
    /// Computed property, sorted in memory
    Computed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub target: SortTarget,
    pub direction: Direction,
}

impl SortKey {
    pub fn field(path: &str, direction: Direction) -> Self {
        Self {
            target: SortTarget::Field(FieldPath::parse(path)),
            direction,
        }
    }

    pub fn is_descending(&self) -> bool {
        self.direction == Direction::Desc
    }
}
