//! Operator vocabulary and per-type operator sets

use std::fmt;

use crate::schema::FieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Comparison
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    IsNull,
    // String
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Regex,
    IRegex,
    // Date parts
    Year,
    Month,
    Day,
    WeekDay,
    Hour,
    Minute,
    Date,
    // Relative periods
    Today,
    Yesterday,
    ThisWeek,
    PastWeek,
    ThisMonth,
    PastMonth,
    ThisYear,
    PastYear,
    // JSON
    HasKey,
    HasKeys,
    HasAnyKeys,
    // Array
    ContainedBy,
    Overlaps,
    Length,
}

const ALL: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::Between,
    Operator::IsNull,
    Operator::Contains,
    Operator::IContains,
    Operator::StartsWith,
    Operator::IStartsWith,
    Operator::EndsWith,
    Operator::IEndsWith,
    Operator::Regex,
    Operator::IRegex,
    Operator::Year,
    Operator::Month,
    Operator::Day,
    Operator::WeekDay,
    Operator::Hour,
    Operator::Minute,
    Operator::Date,
    Operator::Today,
    Operator::Yesterday,
    Operator::ThisWeek,
    Operator::PastWeek,
    Operator::ThisMonth,
    Operator::PastMonth,
    Operator::ThisYear,
    Operator::PastYear,
    Operator::HasKey,
    Operator::HasKeys,
    Operator::HasAnyKeys,
    Operator::ContainedBy,
    Operator::Overlaps,
    Operator::Length,
];

const STRING_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Contains,
    Operator::IContains,
    Operator::StartsWith,
    Operator::IStartsWith,
    Operator::EndsWith,
    Operator::IEndsWith,
    Operator::In,
    Operator::NotIn,
    Operator::IsNull,
    Operator::Regex,
    Operator::IRegex,
];

const NUMERIC_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::Between,
    Operator::IsNull,
];

const BOOLEAN_OPS: &[Operator] = &[Operator::Eq, Operator::IsNull];

const DATE_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::Between,
    Operator::IsNull,
    Operator::Year,
    Operator::Month,
    Operator::Day,
    Operator::WeekDay,
    Operator::Today,
    Operator::Yesterday,
    Operator::ThisWeek,
    Operator::PastWeek,
    Operator::ThisMonth,
    Operator::PastMonth,
    Operator::ThisYear,
    Operator::PastYear,
];

const DATETIME_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::Between,
    Operator::IsNull,
    Operator::Year,
    Operator::Month,
    Operator::Day,
    Operator::WeekDay,
    Operator::Today,
    Operator::Yesterday,
    Operator::ThisWeek,
    Operator::PastWeek,
    Operator::ThisMonth,
    Operator::PastMonth,
    Operator::ThisYear,
    Operator::PastYear,
    Operator::Hour,
    Operator::Minute,
    Operator::Date,
];

const ID_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::In,
    Operator::NotIn,
    Operator::IsNull,
];

const JSON_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::IsNull,
    Operator::HasKey,
    Operator::HasKeys,
    Operator::HasAnyKeys,
];

const ARRAY_OPS: &[Operator] = &[
    Operator::Contains,
    Operator::ContainedBy,
    Operator::Overlaps,
    Operator::Length,
    Operator::IsNull,
];

/// Operators usable inside a comparator object (`_count`, `_agg`, rank, ...)
pub const COMPARATOR_OPS: &[Operator] = NUMERIC_OPS;

/// Allowed operators for a semantic field type
pub fn operators_for(field_type: FieldType) -> &'static [Operator] {
    match field_type {
        FieldType::String => STRING_OPS,
        FieldType::Numeric => NUMERIC_OPS,
        FieldType::Boolean => BOOLEAN_OPS,
        FieldType::Date => DATE_OPS,
        FieldType::Datetime => DATETIME_OPS,
        FieldType::Id | FieldType::Uuid => ID_OPS,
        FieldType::Json => JSON_OPS,
        FieldType::Array => ARRAY_OPS,
    }
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Client-facing name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Between => "between",
            Self::IsNull => "isNull",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startsWith",
            Self::IStartsWith => "istartsWith",
            Self::EndsWith => "endsWith",
            Self::IEndsWith => "iendsWith",
            Self::Regex => "regex",
            Self::IRegex => "iregex",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::WeekDay => "weekDay",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Date => "date",
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::ThisWeek => "thisWeek",
            Self::PastWeek => "pastWeek",
            Self::ThisMonth => "thisMonth",
            Self::PastMonth => "pastMonth",
            Self::ThisYear => "thisYear",
            Self::PastYear => "pastYear",
            Self::HasKey => "hasKey",
            Self::HasKeys => "hasKeys",
            Self::HasAnyKeys => "hasAnyKeys",
            Self::ContainedBy => "containedBy",
            Self::Overlaps => "overlaps",
            Self::Length => "length",
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex | Self::IRegex)
    }

    pub fn is_regex_ci(&self) -> bool {
        matches!(self, Self::IRegex)
    }

    pub fn is_relative_period(&self) -> bool {
        matches!(
            self,
            Self::Today
                | Self::Yesterday
                | Self::ThisWeek
                | Self::PastWeek
                | Self::ThisMonth
                | Self::PastMonth
                | Self::ThisYear
                | Self::PastYear
        )
    }

    pub fn is_comparator(&self) -> bool {
        COMPARATOR_OPS.contains(self)
    }

    pub fn is_allowed_for(&self, field_type: FieldType) -> bool {
        operators_for(field_type).contains(self)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
