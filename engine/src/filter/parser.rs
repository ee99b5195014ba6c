//! Client "where" JSON to filter tree
//!
//! Rejects unknown fields, operators outside the field type's set and
//! mistyped operands with a [`FilterError`]. Capability flags are checked
//! here so a disabled filter kind never reaches the compiler.

use serde_json::{Map, Value as JsonValue};

use super::ast::{
    AggregateFn, AggregationFilter, ArrayFilter, Comparator, ComparatorTerm, CompareOp,
    ConditionalAggregationFilter, DatePart, DatePrecision, DateTruncFilter, Direction,
    ExistsFilter, ExtractDateFilter, FieldCompareFilter, FieldFilter, FieldPath, FilterNode,
    Quantifier, RelationQuantifier, SortKey, SortTarget, SubqueryFilter, Value, WindowFilter,
    WindowFunction,
};
use super::dates::{format_date, format_timestamp, parse_date, parse_datetime};
use super::operators::Operator;
use crate::error::FilterError;
use crate::schema::{
    AllowedFields, Feature, FeatureFlags, FieldMeta, FieldType, ModelMeta, RelationKind,
    RelationMeta, Schema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    Some,
    Every,
    None,
    Count,
    Agg,
    CondAgg,
    Exists,
    Subquery,
    Trunc,
    Extract,
}

const SUFFIXES: &[(&str, Suffix)] = &[
    ("_some", Suffix::Some),
    ("_every", Suffix::Every),
    ("_none", Suffix::None),
    ("_count", Suffix::Count),
    ("_condAgg", Suffix::CondAgg),
    ("_agg", Suffix::Agg),
    ("_exists", Suffix::Exists),
    ("_subquery", Suffix::Subquery),
    ("_trunc", Suffix::Trunc),
    ("_extract", Suffix::Extract),
];

fn split_suffix(key: &str) -> Option<(&str, Suffix)> {
    SUFFIXES.iter().find_map(|(suffix, kind)| {
        key.strip_suffix(suffix)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *kind))
    })
}

/// Position of the parser inside the tree
struct Scope<'s> {
    model: &'s ModelMeta,
    /// Path from the filter's own model (used in the AST)
    rel: FieldPath,
    /// Path from the request's root model (used for authorisation)
    abs: FieldPath,
}

impl<'s> Scope<'s> {
    /// Nested relation object: paths keep growing
    fn descend(&self, relation: &str, target: &'s ModelMeta) -> Self {
        Self {
            model: target,
            rel: self.rel.child(relation),
            abs: self.abs.child(relation),
        }
    }

    /// Relation-level filter: inner paths restart at the target model
    fn enter(&self, relation: &str, target: &'s ModelMeta) -> Self {
        Self {
            model: target,
            rel: FieldPath::root(),
            abs: self.abs.child(relation),
        }
    }

    fn path(&self, name: &str) -> FieldPath {
        self.rel.child(name)
    }

    fn label(&self, name: &str) -> String {
        self.abs.child(name).to_string()
    }
}

pub struct FilterParser<'a> {
    schema: &'a Schema,
    features: FeatureFlags,
    allowed: Option<&'a AllowedFields>,
}

impl<'a> FilterParser<'a> {
    pub fn new(schema: &'a Schema, features: FeatureFlags) -> Self {
        Self {
            schema,
            features,
            allowed: None,
        }
    }

    /// Restrict accepted paths to an authorised field set
    pub fn with_allowed_fields(mut self, allowed: &'a AllowedFields) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn parse_str(&self, model: &str, json: &str) -> Result<FilterNode, FilterError> {
        let value: JsonValue = serde_json::from_str(json)
            .map_err(|e| FilterError::InvalidFilterJson(e.to_string()))?;
        self.parse(model, &value)
    }

    pub fn parse(&self, model: &str, json: &JsonValue) -> Result<FilterNode, FilterError> {
        let meta = self.schema.model(model)?;
        let scope = Scope {
            model: meta,
            rel: FieldPath::root(),
            abs: FieldPath::root(),
        };
        match json {
            JsonValue::Null => Ok(FilterNode::empty()),
            JsonValue::Object(obj) => self.parse_object(&scope, obj),
            _ => Err(FilterError::InvalidFilterJson(
                "filter must be a JSON object".to_string(),
            )),
        }
    }

    // =========================================================================
    // Objects and boolean groups
    // =========================================================================

    fn parse_object(
        &self,
        scope: &Scope<'_>,
        obj: &Map<String, JsonValue>,
    ) -> Result<FilterNode, FilterError> {
        let mut children = obj
            .iter()
            .map(|(key, value)| self.parse_entry(scope, key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match children.len() {
            1 => children.remove(0),
            _ => FilterNode::and(children),
        })
    }

    fn parse_entry(
        &self,
        scope: &Scope<'_>,
        key: &str,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        match key {
            "AND" => return Ok(FilterNode::and(self.parse_list(scope, key, value)?)),
            "OR" => return Ok(FilterNode::or(self.parse_list(scope, key, value)?)),
            "NOT" => {
                let children = self.parse_list(scope, key, value)?;
                return Ok(FilterNode::not(single_or_and(children)));
            }
            "_window" => return self.parse_window(scope, value),
            "_compare" => return self.parse_compare(scope, value),
            _ => {}
        }

        if let Some(field) = scope.model.field(key) {
            self.check_allowed(scope, key)?;
            return if field.field_type == FieldType::Array {
                self.parse_array(scope, field, value)
            } else {
                self.parse_field(scope, field, value)
            };
        }

        if let Some(relation) = scope.model.relation(key) {
            let target = self.target(relation)?;
            self.check_relation_allowed(scope, key)?;
            let obj = expect_object(&scope.label(key), key, value)?;
            return self.parse_object(&scope.descend(key, target), obj);
        }

        if let Some((base, suffix)) = split_suffix(key) {
            match suffix {
                Suffix::Trunc | Suffix::Extract => {
                    if let Some(field) = scope.model.field(base) {
                        self.check_allowed(scope, base)?;
                        return if suffix == Suffix::Trunc {
                            self.parse_trunc(scope, field, value)
                        } else {
                            self.parse_extract(scope, field, value)
                        };
                    }
                }
                _ => {
                    if let Some(relation) = scope.model.relation(base) {
                        return self.parse_relation_suffix(scope, relation, suffix, value);
                    }
                }
            }
        }

        Err(FilterError::UnknownField {
            model: scope.model.name.clone(),
            field: key.to_string(),
        })
    }

    fn parse_list(
        &self,
        scope: &Scope<'_>,
        key: &str,
        value: &JsonValue,
    ) -> Result<Vec<FilterNode>, FilterError> {
        match value {
            JsonValue::Object(obj) => Ok(vec![self.parse_object(scope, obj)?]),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    let obj = expect_object(key, key, item)?;
                    self.parse_object(scope, obj)
                })
                .collect(),
            _ => Err(FilterError::operand(
                key,
                key,
                "expected an object or a list of objects",
            )),
        }
    }

    // =========================================================================
    // Field filters
    // =========================================================================

    fn parse_field(
        &self,
        scope: &Scope<'_>,
        field: &FieldMeta,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        let label = scope.label(&field.name);
        let obj = value
            .as_object()
            .ok_or_else(|| FilterError::operand(&label, "", "expected an operator object"))?;
        if obj.is_empty() {
            return Err(FilterError::operand(&label, "", "empty operator object"));
        }

        let mut children = Vec::with_capacity(obj.len());
        for (name, operand) in obj {
            let operator = Operator::from_name(name)
                .filter(|op| op.is_allowed_for(field.field_type))
                .ok_or_else(|| FilterError::UnknownOperator {
                    field: label.clone(),
                    operator: name.clone(),
                    field_type: field.field_type.to_string(),
                })?;
            let operand = operand_for(&label, field.field_type, operator, operand)?;
            children.push(FilterNode::Field(FieldFilter {
                path: scope.path(&field.name),
                operator,
                operand,
            }));
        }
        Ok(single_or_and(children))
    }

    fn parse_array(
        &self,
        scope: &Scope<'_>,
        field: &FieldMeta,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        self.features.require(Feature::ArrayFilters)?;
        let label = scope.label(&field.name);
        let obj = expect_object(&label, "", value)?;
        if obj.is_empty() {
            return Err(FilterError::operand(&label, "", "empty operator object"));
        }

        let mut filter = ArrayFilter {
            path: scope.path(&field.name),
            ..Default::default()
        };
        for (name, operand) in obj {
            match name.as_str() {
                "contains" => filter.contains = Some(array_elements(&label, name, operand)?),
                "containedBy" => {
                    filter.contained_by = Some(array_elements(&label, name, operand)?)
                }
                "overlaps" => filter.overlaps = Some(array_elements(&label, name, operand)?),
                "length" => {
                    filter.length = Some(parse_comparator(&label, FieldType::Numeric, operand)?)
                }
                "isNull" => {
                    filter.is_null = Some(
                        operand
                            .as_bool()
                            .ok_or_else(|| FilterError::operand(&label, name, "expected a boolean"))?,
                    )
                }
                _ => {
                    return Err(FilterError::UnknownOperator {
                        field: label,
                        operator: name.clone(),
                        field_type: FieldType::Array.to_string(),
                    });
                }
            }
        }
        Ok(FilterNode::Array(filter))
    }

    // =========================================================================
    // Relation filters
    // =========================================================================

    fn parse_relation_suffix(
        &self,
        scope: &Scope<'_>,
        relation: &RelationMeta,
        suffix: Suffix,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        let target = self.target(relation)?;
        self.check_relation_allowed(scope, &relation.name)?;
        let path = scope.path(&relation.name);
        let label = scope.label(&relation.name);
        let inner = scope.enter(&relation.name, target);

        match suffix {
            Suffix::Some | Suffix::Every | Suffix::None => {
                let obj = expect_object(&label, suffix_name(suffix), value)?;
                let node = Box::new(self.parse_object(&inner, obj)?);
                let quantifier = match suffix {
                    Suffix::Some => Quantifier::Some(node),
                    Suffix::Every => Quantifier::Every(node),
                    _ => Quantifier::None(node),
                };
                Ok(FilterNode::Quantifier(RelationQuantifier {
                    relation: path,
                    quantifier,
                }))
            }
            Suffix::Count => Ok(FilterNode::Quantifier(RelationQuantifier {
                relation: path,
                quantifier: Quantifier::Count(parse_comparator(
                    &label,
                    FieldType::Numeric,
                    value,
                )?),
            })),
            Suffix::Agg => self.parse_aggregation(&inner, path, &label, value, false),
            Suffix::CondAgg => {
                self.features.require(Feature::ConditionalAggregation)?;
                self.parse_aggregation(&inner, path, &label, value, true)
            }
            Suffix::Exists => {
                self.features.require(Feature::SubqueryFilters)?;
                self.parse_exists(&inner, path, &label, value)
            }
            Suffix::Subquery => {
                self.features.require(Feature::SubqueryFilters)?;
                self.parse_subquery(&inner, path, &label, value)
            }
            Suffix::Trunc | Suffix::Extract => Err(FilterError::UnknownField {
                model: scope.model.name.clone(),
                field: relation.name.clone(),
            }),
        }
    }

    fn parse_aggregation(
        &self,
        inner: &Scope<'_>,
        relation: FieldPath,
        label: &str,
        value: &JsonValue,
        conditional: bool,
    ) -> Result<FilterNode, FilterError> {
        let op_name = if conditional { "_condAgg" } else { "_agg" };
        let obj = expect_object(label, op_name, value)?;

        let field = match obj.get("field") {
            None => None,
            Some(JsonValue::String(name)) => {
                let meta = inner.model.field(name).ok_or_else(|| FilterError::UnknownField {
                    model: inner.model.name.clone(),
                    field: name.clone(),
                })?;
                self.check_allowed(inner, name)?;
                Some(meta)
            }
            Some(_) => {
                return Err(FilterError::operand(label, op_name, "'field' must be a string"));
            }
        };

        let condition = if conditional {
            let filter = obj
                .get("filter")
                .ok_or_else(|| FilterError::operand(label, op_name, "'filter' is required"))?;
            let filter = expect_object(label, op_name, filter)?;
            Some(self.parse_object(inner, filter)?)
        } else {
            None
        };

        let mut nodes = Vec::new();
        for (name, operand) in obj {
            if name == "field" || (conditional && name == "filter") {
                continue;
            }
            let agg = AggregateFn::from_name(name).ok_or_else(|| FilterError::UnknownOperator {
                field: label.to_string(),
                operator: name.clone(),
                field_type: "aggregation".to_string(),
            })?;
            if agg == AggregateFn::CountDistinct {
                self.features.require(Feature::DistinctCount)?;
            }
            let operand_type = match (agg, field) {
                (AggregateFn::Count, _) => FieldType::Numeric,
                (_, None) => {
                    return Err(FilterError::operand(
                        label,
                        name,
                        "aggregation requires 'field'",
                    ));
                }
                (AggregateFn::Sum | AggregateFn::Avg, Some(f)) => {
                    if f.field_type != FieldType::Numeric {
                        return Err(FilterError::operand(
                            label,
                            name,
                            format!("'{}' requires a numeric field", name),
                        ));
                    }
                    FieldType::Numeric
                }
                (AggregateFn::Min | AggregateFn::Max, Some(f)) => {
                    if !f.field_type.is_orderable() {
                        return Err(FilterError::operand(
                            label,
                            name,
                            format!("'{}' is not defined for {} fields", name, f.field_type),
                        ));
                    }
                    f.field_type
                }
                (AggregateFn::CountDistinct, Some(_)) => FieldType::Numeric,
            };
            let comparator = parse_comparator(label, operand_type, operand)?;
            let field_name = field.map(|f| f.name.clone());
            nodes.push(match &condition {
                Some(cond) => FilterNode::ConditionalAggregation(ConditionalAggregationFilter {
                    relation: relation.clone(),
                    field: field_name,
                    condition: Box::new(cond.clone()),
                    agg,
                    comparator,
                }),
                None => FilterNode::Aggregation(AggregationFilter {
                    relation: relation.clone(),
                    field: field_name,
                    agg,
                    comparator,
                }),
            });
        }

        if nodes.is_empty() {
            return Err(FilterError::operand(
                label,
                op_name,
                "expected one of sum, avg, min, max, count, countDistinct",
            ));
        }
        Ok(single_or_and(nodes))
    }

    fn parse_exists(
        &self,
        inner: &Scope<'_>,
        relation: FieldPath,
        label: &str,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        match value {
            JsonValue::Bool(exists) => Ok(FilterNode::Exists(ExistsFilter {
                relation,
                inner_filter: None,
                exists: *exists,
            })),
            JsonValue::Object(obj) => {
                let mut exists = true;
                let mut inner_filter = None;
                for (name, operand) in obj {
                    match name.as_str() {
                        "exists" => {
                            exists = operand.as_bool().ok_or_else(|| {
                                FilterError::operand(label, "_exists", "'exists' must be a boolean")
                            })?
                        }
                        "filter" => {
                            let filter = expect_object(label, "_exists", operand)?;
                            inner_filter = Some(Box::new(self.parse_object(inner, filter)?));
                        }
                        _ => {
                            return Err(FilterError::operand(
                                label,
                                "_exists",
                                format!("unexpected key '{}'", name),
                            ));
                        }
                    }
                }
                Ok(FilterNode::Exists(ExistsFilter {
                    relation,
                    inner_filter,
                    exists,
                }))
            }
            _ => Err(FilterError::operand(
                label,
                "_exists",
                "expected a boolean or an object",
            )),
        }
    }

    fn parse_subquery(
        &self,
        inner: &Scope<'_>,
        relation: FieldPath,
        label: &str,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        let obj = expect_object(label, "_subquery", value)?;

        let field_name = obj
            .get("field")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| FilterError::operand(label, "_subquery", "'field' is required"))?;
        let field = inner
            .model
            .field(field_name)
            .ok_or_else(|| FilterError::UnknownField {
                model: inner.model.name.clone(),
                field: field_name.to_string(),
            })?;
        self.check_allowed(inner, field_name)?;

        let order_by = match obj.get("orderBy") {
            Some(v) => self.parse_sort_list(inner, v)?,
            None => Vec::new(),
        };
        if order_by.is_empty() {
            return Err(FilterError::operand(label, "_subquery", "'orderBy' is required"));
        }

        let inner_filter = match obj.get("filter") {
            Some(filter) => {
                let filter = expect_object(label, "_subquery", filter)?;
                Some(Box::new(self.parse_object(inner, filter)?))
            }
            None => None,
        };

        let terms: Map<String, JsonValue> = obj
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "field" | "orderBy" | "filter"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if terms.is_empty() {
            return Err(FilterError::operand(
                label,
                "_subquery",
                "expected at least one comparison",
            ));
        }
        let comparator = parse_comparator(
            &inner.label(field_name),
            field.field_type,
            &JsonValue::Object(terms),
        )?;

        Ok(FilterNode::Subquery(SubqueryFilter {
            relation,
            order_by,
            inner_filter,
            field: field_name.to_string(),
            comparator,
        }))
    }

    // =========================================================================
    // Model-level filters
    // =========================================================================

    fn parse_window(&self, scope: &Scope<'_>, value: &JsonValue) -> Result<FilterNode, FilterError> {
        self.features.require(Feature::WindowFilters)?;
        if !scope.rel.is_empty() {
            return Err(FilterError::operand(
                "_window",
                "_window",
                "window filters apply to the filtered model itself",
            ));
        }
        let obj = expect_object("_window", "_window", value)?;

        let mut function = None;
        let mut partition_by = Vec::new();
        let mut order_by = Vec::new();
        let mut rank = None;
        let mut percentile = None;
        for (name, operand) in obj {
            match name.as_str() {
                "function" => {
                    let fn_name = operand.as_str().ok_or_else(|| {
                        FilterError::operand("_window", "function", "expected a string")
                    })?;
                    function = Some(WindowFunction::from_name(fn_name).ok_or_else(|| {
                        FilterError::UnknownOperator {
                            field: "_window".to_string(),
                            operator: fn_name.to_string(),
                            field_type: "window".to_string(),
                        }
                    })?);
                }
                "partitionBy" => {
                    for dotted in string_list("_window", name, operand)? {
                        let path = FieldPath::parse(&dotted);
                        self.resolve_partition(scope, &path)?;
                        partition_by.push(path);
                    }
                }
                "orderBy" => order_by = self.parse_sort_list(scope, operand)?,
                "rank" => rank = Some(parse_comparator("_window", FieldType::Numeric, operand)?),
                "percentile" => {
                    let comparator = parse_comparator("_window", FieldType::Numeric, operand)?;
                    for term in &comparator.terms {
                        let in_range = match &term.value {
                            Value::List(items) => items.iter().all(unit_interval),
                            Value::Bool(_) => true,
                            other => unit_interval(other),
                        };
                        if !in_range {
                            return Err(FilterError::operand(
                                "_window",
                                "percentile",
                                "percentile values lie in [0.0, 1.0]",
                            ));
                        }
                    }
                    percentile = Some(comparator);
                }
                _ => {
                    return Err(FilterError::operand(
                        "_window",
                        "_window",
                        format!("unexpected key '{}'", name),
                    ));
                }
            }
        }

        let function = function
            .ok_or_else(|| FilterError::operand("_window", "function", "'function' is required"))?;
        if order_by.is_empty() {
            return Err(FilterError::operand(
                "_window",
                "orderBy",
                "'orderBy' must not be empty",
            ));
        }
        match (function, &rank, &percentile) {
            (_, None, None) => {
                return Err(FilterError::operand(
                    "_window",
                    "_window",
                    "expected 'rank' or 'percentile'",
                ));
            }
            (WindowFunction::PercentRank, Some(_), _) => {
                return Err(FilterError::operand(
                    "_window",
                    "rank",
                    "PERCENT_RANK is filtered with 'percentile'",
                ));
            }
            (f, _, Some(_)) if f != WindowFunction::PercentRank => {
                return Err(FilterError::operand(
                    "_window",
                    "percentile",
                    "'percentile' requires PERCENT_RANK",
                ));
            }
            _ => {}
        }

        Ok(FilterNode::Window(WindowFilter {
            function,
            partition_by,
            order_by,
            rank,
            percentile,
        }))
    }

    fn parse_compare(&self, scope: &Scope<'_>, value: &JsonValue) -> Result<FilterNode, FilterError> {
        self.features.require(Feature::FieldComparison)?;
        match value {
            JsonValue::Object(obj) => self.parse_compare_one(scope, obj),
            JsonValue::Array(items) => {
                let nodes = items
                    .iter()
                    .map(|item| {
                        let obj = expect_object("_compare", "_compare", item)?;
                        self.parse_compare_one(scope, obj)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(single_or_and(nodes))
            }
            _ => Err(FilterError::operand(
                "_compare",
                "_compare",
                "expected an object or a list of objects",
            )),
        }
    }

    fn parse_compare_one(
        &self,
        scope: &Scope<'_>,
        obj: &Map<String, JsonValue>,
    ) -> Result<FilterNode, FilterError> {
        let side = |key: &str| -> Result<(FieldPath, FieldType), FilterError> {
            let dotted = obj.get(key).and_then(JsonValue::as_str).ok_or_else(|| {
                FilterError::operand("_compare", key, format!("'{}' is required", key))
            })?;
            let path = FieldPath::parse(dotted);
            let field_type = self.resolve_to_one_field(scope, &path)?.field_type;
            Ok((path, field_type))
        };
        let (left, lt) = side("left")?;
        let (right, rt) = side("right")?;

        let op_name = obj
            .get("operator")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| FilterError::operand("_compare", "operator", "'operator' is required"))?;
        let operator = CompareOp::from_name(op_name).ok_or_else(|| FilterError::UnknownOperator {
            field: "_compare".to_string(),
            operator: op_name.to_string(),
            field_type: "compare".to_string(),
        })?;

        let number = |key: &str| -> Result<Option<f64>, FilterError> {
            match obj.get(key) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                    FilterError::operand("_compare", key, "expected a number")
                }),
            }
        };
        let right_multiplier = number("rightMultiplier")?;
        let right_offset = number("rightOffset")?;

        for key in obj.keys() {
            if !matches!(
                key.as_str(),
                "left" | "right" | "operator" | "rightMultiplier" | "rightOffset"
            ) {
                return Err(FilterError::operand(
                    "_compare",
                    "_compare",
                    format!("unexpected key '{}'", key),
                ));
            }
        }

        let arithmetic = right_multiplier.is_some() || right_offset.is_some();
        let compatible = match (lt, rt) {
            (FieldType::Numeric, FieldType::Numeric) => true,
            (l, r) if l.is_temporal() && r.is_temporal() => !arithmetic,
            (l, r) => l == r && l.is_orderable() && !arithmetic,
        };
        if !compatible {
            return Err(FilterError::operand(
                "_compare",
                op_name,
                format!("cannot compare {} field with {} field", lt, rt),
            ));
        }

        Ok(FilterNode::Compare(FieldCompareFilter {
            left: scope.rel.join(&left),
            operator,
            right: scope.rel.join(&right),
            right_multiplier,
            right_offset,
        }))
    }

    fn parse_trunc(
        &self,
        scope: &Scope<'_>,
        field: &FieldMeta,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        self.features.require(Feature::DateTruncFilters)?;
        let label = scope.label(&field.name);
        if !field.field_type.is_temporal() {
            return Err(FilterError::UnknownOperator {
                field: label,
                operator: "_trunc".to_string(),
                field_type: field.field_type.to_string(),
            });
        }
        let obj = expect_object(&label, "_trunc", value)?;
        let err = |reason: &str| FilterError::operand(&label, "_trunc", reason);

        let precision = obj
            .get("precision")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| err("'precision' is required"))?;
        let precision = DatePrecision::from_name(precision)
            .ok_or_else(|| err("precision must be one of year, quarter, month, week, day, hour, minute"))?;
        if precision.is_sub_day() && field.field_type == FieldType::Date {
            return Err(err("hour and minute precision require a datetime field"));
        }

        let mut filter = DateTruncFilter {
            path: scope.path(&field.name),
            precision,
            value: None,
            year: None,
            quarter: None,
            month: None,
            week: None,
            this_period: None,
            last_period: None,
        };
        for (name, operand) in obj {
            match name.as_str() {
                "precision" => {}
                "value" => {
                    let text = operand.as_str().ok_or_else(|| err("'value' must be a date string"))?;
                    let at = parse_datetime(text).ok_or_else(|| err("'value' is not a valid date"))?;
                    filter.value = Some(format_timestamp(at));
                }
                "year" => {
                    filter.year = Some(
                        operand
                            .as_i64()
                            .and_then(|y| i32::try_from(y).ok())
                            .filter(|y| (1..=9999).contains(y))
                            .ok_or_else(|| err("'year' must be an integer between 1 and 9999"))?,
                    )
                }
                "quarter" => filter.quarter = Some(bounded_u32(operand, 1, 4).ok_or_else(|| err("'quarter' must be 1-4"))?),
                "month" => filter.month = Some(bounded_u32(operand, 1, 12).ok_or_else(|| err("'month' must be 1-12"))?),
                "week" => filter.week = Some(bounded_u32(operand, 1, 53).ok_or_else(|| err("'week' must be 1-53"))?),
                "thisPeriod" => filter.this_period = Some(operand.as_bool().ok_or_else(|| err("'thisPeriod' must be a boolean"))?),
                "lastPeriod" => filter.last_period = Some(operand.as_bool().ok_or_else(|| err("'lastPeriod' must be a boolean"))?),
                _ => return Err(err(&format!("unexpected key '{}'", name))),
            }
        }

        let modes = [
            filter.value.is_some(),
            filter.year.is_some(),
            filter.this_period == Some(true),
            filter.last_period == Some(true),
        ]
        .iter()
        .filter(|m| **m)
        .count();
        if modes != 1 {
            return Err(err(
                "specify exactly one of value, year, thisPeriod or lastPeriod",
            ));
        }
        if filter.year.is_none()
            && (filter.quarter.is_some() || filter.month.is_some() || filter.week.is_some())
        {
            return Err(err("quarter, month and week require 'year'"));
        }
        if filter.year.is_some() {
            let ok = match precision {
                DatePrecision::Year => {
                    filter.quarter.is_none() && filter.month.is_none() && filter.week.is_none()
                }
                DatePrecision::Quarter => {
                    filter.quarter.is_some() && filter.month.is_none() && filter.week.is_none()
                }
                DatePrecision::Month => {
                    filter.month.is_some() && filter.quarter.is_none() && filter.week.is_none()
                }
                DatePrecision::Week => {
                    filter.week.is_some() && filter.quarter.is_none() && filter.month.is_none()
                }
                DatePrecision::Day | DatePrecision::Hour | DatePrecision::Minute => false,
            };
            if !ok {
                return Err(err(
                    "year/quarter/month/week components must match the precision; day and finer periods use 'value'",
                ));
            }
        }

        Ok(FilterNode::DateTrunc(filter))
    }

    fn parse_extract(
        &self,
        scope: &Scope<'_>,
        field: &FieldMeta,
        value: &JsonValue,
    ) -> Result<FilterNode, FilterError> {
        self.features.require(Feature::ExtractDateFilters)?;
        let label = scope.label(&field.name);
        if !field.field_type.is_temporal() {
            return Err(FilterError::UnknownOperator {
                field: label,
                operator: "_extract".to_string(),
                field_type: field.field_type.to_string(),
            });
        }
        let obj = expect_object(&label, "_extract", value)?;
        if obj.is_empty() {
            return Err(FilterError::operand(&label, "_extract", "empty part object"));
        }

        let mut filter = ExtractDateFilter {
            path: scope.path(&field.name),
            parts: Default::default(),
        };
        for (name, operand) in obj {
            let part = DatePart::from_name(name).ok_or_else(|| FilterError::UnknownOperator {
                field: label.clone(),
                operator: name.clone(),
                field_type: "date part".to_string(),
            })?;
            if part.is_time_of_day() && field.field_type == FieldType::Date {
                return Err(FilterError::operand(
                    &label,
                    name,
                    "time parts require a datetime field",
                ));
            }
            filter
                .parts
                .insert(part, parse_comparator(&label, FieldType::Numeric, operand)?);
        }
        Ok(FilterNode::ExtractDate(filter))
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Sort keys usable inside a filter: fields reachable through to-one hops
    fn parse_sort_list(
        &self,
        scope: &Scope<'_>,
        value: &JsonValue,
    ) -> Result<Vec<SortKey>, FilterError> {
        string_list("orderBy", "orderBy", value)?
            .into_iter()
            .map(|raw| {
                let (descending, dotted) = match raw.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, raw.as_str()),
                };
                let path = FieldPath::parse(dotted);
                let field = self
                    .resolve_to_one_field(scope, &path)
                    .map_err(|_| FilterError::InvalidOrdering {
                        key: raw.clone(),
                        reason: "not a field reachable through to-one relations".to_string(),
                    })?;
                if !field.field_type.is_orderable() {
                    return Err(FilterError::InvalidOrdering {
                        key: raw.clone(),
                        reason: format!("{} fields are not orderable", field.field_type),
                    });
                }
                Ok(SortKey {
                    target: SortTarget::Field(path),
                    direction: if descending {
                        Direction::Desc
                    } else {
                        Direction::Asc
                    },
                })
            })
            .collect()
    }

    /// Walk `path` through foreign keys to a field of the final model
    fn resolve_to_one_field<'m>(
        &'m self,
        scope: &Scope<'m>,
        path: &FieldPath,
    ) -> Result<&'m FieldMeta, FilterError> {
        let model = self.walk_to_one(scope, path)?;
        let field = model.field(path.leaf()).ok_or_else(|| FilterError::UnknownField {
            model: model.name.clone(),
            field: path.leaf().to_string(),
        })?;
        self.check_path_allowed(scope, path, &model.name)?;
        Ok(field)
    }

    /// Partition keys may also name a foreign key relation directly
    fn resolve_partition(&self, scope: &Scope<'_>, path: &FieldPath) -> Result<(), FilterError> {
        let model = self.walk_to_one(scope, path)?;
        let is_field = model.field(path.leaf()).is_some();
        let is_fk = model
            .relation(path.leaf())
            .is_some_and(|r| matches!(r.kind, RelationKind::ForeignKey { .. }));
        if !is_field && !is_fk {
            return Err(FilterError::UnknownField {
                model: model.name.clone(),
                field: path.leaf().to_string(),
            });
        }
        self.check_path_allowed(scope, path, &model.name)
    }

    fn walk_to_one<'m>(
        &'m self,
        scope: &Scope<'m>,
        path: &FieldPath,
    ) -> Result<&'m ModelMeta, FilterError> {
        if path.is_empty() {
            return Err(FilterError::UnknownField {
                model: scope.model.name.clone(),
                field: String::new(),
            });
        }
        let mut model = scope.model;
        for hop in path.hops() {
            let relation = model
                .relation(hop)
                .filter(|r| !r.kind.is_to_many())
                .ok_or_else(|| FilterError::UnknownField {
                    model: model.name.clone(),
                    field: hop.clone(),
                })?;
            model = self.target(relation)?;
        }
        Ok(model)
    }

    fn target(&self, relation: &RelationMeta) -> Result<&'a ModelMeta, FilterError> {
        self.schema.model(&relation.target)
    }

    // =========================================================================
    // Authorisation
    // =========================================================================

    fn check_allowed(&self, scope: &Scope<'_>, name: &str) -> Result<(), FilterError> {
        match self.allowed {
            Some(allowed) if !allowed.allows(&scope.label(name)) => Err(FilterError::UnknownField {
                model: scope.model.name.clone(),
                field: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_relation_allowed(&self, scope: &Scope<'_>, name: &str) -> Result<(), FilterError> {
        match self.allowed {
            Some(allowed) if !allowed.allows_relation(&scope.label(name)) => {
                Err(FilterError::UnknownField {
                    model: scope.model.name.clone(),
                    field: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_path_allowed(
        &self,
        scope: &Scope<'_>,
        path: &FieldPath,
        leaf_model: &str,
    ) -> Result<(), FilterError> {
        match self.allowed {
            Some(allowed) if !allowed.allows(&scope.abs.join(path).to_string()) => {
                Err(FilterError::UnknownField {
                    model: leaf_model.to_string(),
                    field: path.leaf().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Operands
// =============================================================================

fn single_or_and(mut nodes: Vec<FilterNode>) -> FilterNode {
    if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        FilterNode::and(nodes)
    }
}

fn suffix_name(suffix: Suffix) -> &'static str {
    SUFFIXES
        .iter()
        .find(|(_, kind)| *kind == suffix)
        .map(|(name, _)| *name)
        .unwrap_or("")
}

fn expect_object<'v>(
    label: &str,
    operator: &str,
    value: &'v JsonValue,
) -> Result<&'v Map<String, JsonValue>, FilterError> {
    value
        .as_object()
        .ok_or_else(|| FilterError::operand(label, operator, "expected an object"))
}

fn string_list(label: &str, operator: &str, value: &JsonValue) -> Result<Vec<String>, FilterError> {
    match value {
        JsonValue::String(s) => Ok(vec![s.clone()]),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    FilterError::operand(label, operator, "expected a list of strings")
                })
            })
            .collect(),
        _ => Err(FilterError::operand(
            label,
            operator,
            "expected a string or a list of strings",
        )),
    }
}

fn bounded_u32(value: &JsonValue, min: u32, max: u32) -> Option<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| (min..=max).contains(v))
}

fn unit_interval(value: &Value) -> bool {
    value.as_f64().is_some_and(|v| (0.0..=1.0).contains(&v))
}

const INTEGER_OUT_OF_RANGE: &str = "integer out of range";

fn array_elements(label: &str, operator: &str, value: &JsonValue) -> Result<Vec<Value>, FilterError> {
    let items = value
        .as_array()
        .ok_or_else(|| FilterError::operand(label, operator, "expected a list"))?;
    items
        .iter()
        .map(|item| match item {
            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                Value::from_json(item)
                    .ok_or_else(|| FilterError::operand(label, operator, INTEGER_OUT_OF_RANGE))
            }
            _ => Err(FilterError::operand(
                label,
                operator,
                "list elements must be strings, numbers or booleans",
            )),
        })
        .collect()
}

/// Comparator object (`{gte: 1, lt: 5}`) or a bare scalar meaning `eq`
pub(crate) fn parse_comparator(
    label: &str,
    operand_type: FieldType,
    value: &JsonValue,
) -> Result<Comparator, FilterError> {
    match value {
        JsonValue::Object(obj) => {
            if obj.is_empty() {
                return Err(FilterError::operand(label, "", "empty comparator"));
            }
            let terms = obj
                .iter()
                .map(|(name, operand)| {
                    let op = Operator::from_name(name)
                        .filter(Operator::is_comparator)
                        .ok_or_else(|| FilterError::UnknownOperator {
                            field: label.to_string(),
                            operator: name.clone(),
                            field_type: "comparator".to_string(),
                        })?;
                    let value = operand_for(label, operand_type, op, operand)?;
                    Ok(ComparatorTerm { op, value })
                })
                .collect::<Result<Vec<_>, FilterError>>()?;
            Ok(Comparator { terms })
        }
        JsonValue::Null | JsonValue::Array(_) => Err(FilterError::operand(
            label,
            "",
            "expected a comparator object or a value",
        )),
        scalar_value => Ok(Comparator::eq(scalar(
            label,
            operand_type,
            Operator::Eq,
            scalar_value,
        )?)),
    }
}

/// Check and normalise the operand of `op` on a field of type `ty`
fn operand_for(
    label: &str,
    ty: FieldType,
    op: Operator,
    value: &JsonValue,
) -> Result<Value, FilterError> {
    let err = |reason: &str| FilterError::operand(label, op.name(), reason);
    match op {
        Operator::IsNull => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| err("expected a boolean")),
        Operator::In | Operator::NotIn => {
            let items = value.as_array().ok_or_else(|| err("expected a list"))?;
            items
                .iter()
                .map(|item| scalar(label, ty, op, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Operator::Between => {
            let items = value.as_array().ok_or_else(|| err("expected [low, high]"))?;
            if items.len() != 2 {
                return Err(err("expected [low, high]"));
            }
            items
                .iter()
                .map(|item| scalar(label, ty, op, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Operator::HasKey => value
            .as_str()
            .map(Value::from)
            .ok_or_else(|| err("expected a key string")),
        Operator::HasKeys | Operator::HasAnyKeys => {
            let items = value.as_array().ok_or_else(|| err("expected a list of keys"))?;
            items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(Value::from)
                        .ok_or_else(|| err("expected a list of keys"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Operator::Year => int_in(value, 1, 9999).ok_or_else(|| err("expected a year")),
        Operator::Month => int_in(value, 1, 12).ok_or_else(|| err("expected a month 1-12")),
        Operator::Day => int_in(value, 1, 31).ok_or_else(|| err("expected a day 1-31")),
        Operator::WeekDay => {
            int_in(value, 1, 7).ok_or_else(|| err("expected an ISO weekday 1 (Monday) to 7"))
        }
        Operator::Hour => int_in(value, 0, 23).ok_or_else(|| err("expected an hour 0-23")),
        Operator::Minute => int_in(value, 0, 59).ok_or_else(|| err("expected a minute 0-59")),
        Operator::Date => value
            .as_str()
            .and_then(|s| parse_date(s).or_else(|| parse_datetime(s).map(|dt| dt.date())))
            .map(|d| Value::Text(format_date(d)))
            .ok_or_else(|| err("expected a date string")),
        op if op.is_relative_period() => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| err("expected a boolean")),
        Operator::Contains
        | Operator::IContains
        | Operator::StartsWith
        | Operator::IStartsWith
        | Operator::EndsWith
        | Operator::IEndsWith
        | Operator::Regex
        | Operator::IRegex => value
            .as_str()
            .map(Value::from)
            .ok_or_else(|| err("expected a string")),
        _ => scalar(label, ty, op, value),
    }
}

fn int_in(value: &JsonValue, min: i64, max: i64) -> Option<Value> {
    value
        .as_i64()
        .filter(|v| (min..=max).contains(v))
        .map(Value::Int)
}

/// Single comparison operand for a field type
fn scalar(label: &str, ty: FieldType, op: Operator, value: &JsonValue) -> Result<Value, FilterError> {
    let err = |reason: String| FilterError::operand(label, op.name(), reason);
    if value.is_null() {
        return Err(err("null is not a valid operand, use isNull".to_string()));
    }
    let mismatch = || err(format!("expected a {} value", ty));
    let out_of_range = || err(INTEGER_OUT_OF_RANGE.to_string());
    match ty {
        FieldType::String => value.as_str().map(Value::from).ok_or_else(mismatch),
        FieldType::Numeric => {
            if value.is_number() {
                Value::from_json(value).ok_or_else(out_of_range)
            } else {
                Err(mismatch())
            }
        }
        FieldType::Boolean => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
        FieldType::Date => value
            .as_str()
            .and_then(|s| parse_date(s).or_else(|| parse_datetime(s).map(|dt| dt.date())))
            .map(|d| Value::Text(format_date(d)))
            .ok_or_else(mismatch),
        FieldType::Datetime => value
            .as_str()
            .and_then(parse_datetime)
            .map(|dt| Value::Text(format_timestamp(dt)))
            .ok_or_else(mismatch),
        FieldType::Id => match value {
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => {
                Value::from_json(value).ok_or_else(out_of_range)
            }
            JsonValue::String(s) => Ok(Value::Text(s.clone())),
            _ => Err(mismatch()),
        },
        FieldType::Uuid => value
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .map(|u| Value::Text(u.to_string()))
            .ok_or_else(mismatch),
        FieldType::Json => Ok(Value::Json(value.clone())),
        FieldType::Array => match value {
            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                Value::from_json(value).ok_or_else(out_of_range)
            }
            _ => Err(mismatch()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ast::{BoolKind, BooleanGroup};
    use serde_json::json;

    const SHOP: &str = r#"{
        "name": "shop",
        "models": [
            {"name": "product", "table": "products",
             "fields": [
                {"name": "id", "type": "id"},
                {"name": "name", "type": "string"},
                {"name": "brand", "type": "string"},
                {"name": "price", "type": "numeric"},
                {"name": "cost", "type": "numeric"},
                {"name": "isActive", "column": "is_active", "type": "boolean"},
                {"name": "createdAt", "column": "created_at", "type": "datetime"},
                {"name": "releaseDate", "column": "release_date", "type": "date"},
                {"name": "meta", "type": "json"},
                {"name": "tags", "type": "array"},
                {"name": "sku", "type": "uuid"}
             ],
             "relations": [
                {"name": "category", "target": "category", "kind": "foreign_key", "column": "category_id"},
                {"name": "reviews", "target": "review", "kind": "reverse", "column": "product_id"}
             ]},
            {"name": "category", "table": "categories",
             "fields": [{"name": "id", "type": "id"}, {"name": "name", "type": "string"}],
             "relations": [{"name": "products", "target": "product", "kind": "reverse", "column": "category_id"}]},
            {"name": "review", "table": "reviews",
             "fields": [
                {"name": "id", "type": "id"},
                {"name": "rating", "type": "numeric"},
                {"name": "author", "type": "string"},
                {"name": "createdAt", "column": "created_at", "type": "datetime"}
             ],
             "relations": [{"name": "product", "target": "product", "kind": "foreign_key", "column": "product_id"}]}
        ]
    }"#;

    fn schema() -> Schema {
        Schema::from_json_str(SHOP).unwrap()
    }

    fn parse(json: JsonValue) -> Result<FilterNode, FilterError> {
        let schema = schema();
        FilterParser::new(&schema, FeatureFlags::all()).parse("product", &json)
    }

    #[test]
    fn test_field_filters_and_implicit_and() {
        let node = parse(json!({"price": {"between": [100, 500]}, "isActive": {"eq": true}})).unwrap();
        assert_eq!(
            node,
            FilterNode::and(vec![
                FilterNode::Field(FieldFilter {
                    path: FieldPath::parse("price"),
                    operator: Operator::Between,
                    operand: Value::List(vec![Value::Int(100), Value::Int(500)]),
                }),
                FilterNode::field("isActive", Operator::Eq, true),
            ])
        );
    }

    #[test]
    fn test_boolean_groups() {
        let node = parse(json!({
            "OR": [{"brand": {"eq": "acme"}}, {"NOT": {"price": {"gt": 10}}}]
        }))
        .unwrap();
        let FilterNode::Group(group) = node else {
            panic!("expected group");
        };
        assert_eq!(group.kind, BoolKind::Or);
        assert_eq!(group.children.len(), 2);
        assert!(matches!(
            &group.children[1],
            FilterNode::Group(BooleanGroup { kind: BoolKind::Not, .. })
        ));
    }

    #[test]
    fn test_nested_relation_flattens_path() {
        let node = parse(json!({"category": {"name": {"icontains": "book"}}})).unwrap();
        assert_eq!(node, FilterNode::field("category.name", Operator::IContains, "book"));
    }

    #[test]
    fn test_unknown_field_and_operator() {
        assert!(matches!(
            parse(json!({"colour": {"eq": "red"}})),
            Err(FilterError::UnknownField { ref field, .. }) if field == "colour"
        ));
        assert!(matches!(
            parse(json!({"name": {"gt": "a"}})),
            Err(FilterError::UnknownOperator { ref operator, .. }) if operator == "gt"
        ));
        assert!(matches!(
            parse(json!({"isActive": {"neq": true}})),
            Err(FilterError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_operand_type_mismatch() {
        assert!(matches!(
            parse(json!({"price": {"gt": "cheap"}})),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(matches!(
            parse(json!({"price": {"between": [1]}})),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(matches!(
            parse(json!({"name": {"eq": null}})),
            Err(FilterError::InvalidOperand { ref reason, .. }) if reason.contains("isNull")
        ));
        assert!(matches!(
            parse(json!({"sku": {"eq": "not-a-uuid"}})),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(matches!(
            parse(json!({"createdAt": {"weekDay": 8}})),
            Err(FilterError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_integer_beyond_i64_rejected() {
        assert!(matches!(
            parse(json!({"price": {"gt": u64::MAX}})),
            Err(FilterError::InvalidOperand { ref reason, .. }) if reason == "integer out of range"
        ));
        assert!(matches!(
            parse(json!({"id": {"in": [1, u64::MAX]}})),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(parse(json!({"id": {"eq": i64::MAX}})).is_ok());
    }

    #[test]
    fn test_datetime_operand_normalised() {
        let node = parse(json!({"createdAt": {"gte": "2024-03-01T10:00:00Z"}})).unwrap();
        assert_eq!(
            node,
            FilterNode::field("createdAt", Operator::Gte, "2024-03-01 10:00:00")
        );
    }

    #[test]
    fn test_quantifiers() {
        let node = parse(json!({"reviews_every": {"rating": {"gte": 4}}})).unwrap();
        assert_eq!(
            node,
            FilterNode::Quantifier(RelationQuantifier {
                relation: FieldPath::parse("reviews"),
                quantifier: Quantifier::Every(Box::new(FilterNode::field(
                    "rating",
                    Operator::Gte,
                    4i64
                ))),
            })
        );

        let count = parse(json!({"reviews_count": {"gte": 2}})).unwrap();
        assert!(matches!(
            count,
            FilterNode::Quantifier(RelationQuantifier { quantifier: Quantifier::Count(_), .. })
        ));

        let nested = parse(json!({"category": {"products_some": {"price": {"lt": 5}}}})).unwrap();
        let FilterNode::Quantifier(q) = nested else {
            panic!("expected quantifier");
        };
        assert_eq!(q.relation.to_string(), "category.products");
    }

    #[test]
    fn test_aggregations() {
        let node = parse(json!({"reviews_agg": {"field": "rating", "avg": {"gte": 4}}})).unwrap();
        assert_eq!(
            node,
            FilterNode::Aggregation(AggregationFilter {
                relation: FieldPath::parse("reviews"),
                field: Some("rating".to_string()),
                agg: AggregateFn::Avg,
                comparator: Comparator::new(vec![(Operator::Gte, Value::Int(4))]),
            })
        );

        assert!(matches!(
            parse(json!({"reviews_agg": {"field": "author", "sum": 3}})),
            Err(FilterError::InvalidOperand { .. })
        ));
        assert!(matches!(
            parse(json!({"reviews_agg": {"avg": 3}})),
            Err(FilterError::InvalidOperand { .. })
        ));

        let cond = parse(json!({"reviews_condAgg": {
            "field": "rating", "filter": {"author": {"eq": "ann"}}, "count": {"gte": 1}
        }}))
        .unwrap();
        assert!(matches!(cond, FilterNode::ConditionalAggregation(_)));
    }

    #[test]
    fn test_feature_flags_gate_parsing() {
        let schema = schema();
        let parser = FilterParser::new(&schema, FeatureFlags::default());
        assert_eq!(
            parser
                .parse("product", &json!({"reviews_exists": true}))
                .unwrap_err(),
            FilterError::FeatureNotEnabled(Feature::SubqueryFilters)
        );
        assert_eq!(
            parser
                .parse(
                    "product",
                    &json!({"_window": {"function": "RANK", "orderBy": ["-price"], "rank": 1}})
                )
                .unwrap_err(),
            FilterError::FeatureNotEnabled(Feature::WindowFilters)
        );

        let no_arrays = FeatureFlags {
            enable_array_filters: false,
            ..FeatureFlags::all()
        };
        let parser = FilterParser::new(&schema, no_arrays);
        assert_eq!(
            parser
                .parse("product", &json!({"tags": {"contains": ["a"]}}))
                .unwrap_err(),
            FilterError::FeatureNotEnabled(Feature::ArrayFilters)
        );
    }

    #[test]
    fn test_window_filter() {
        let node = parse(json!({"_window": {
            "function": "ROW_NUMBER", "partitionBy": "category", "orderBy": ["-price"], "rank": {"eq": 1}
        }}))
        .unwrap();
        let FilterNode::Window(w) = node else {
            panic!("expected window");
        };
        assert_eq!(w.function, WindowFunction::RowNumber);
        assert_eq!(w.partition_by, vec![FieldPath::parse("category")]);
        assert_eq!(w.order_by, vec![SortKey::field("price", Direction::Desc)]);

        assert!(parse(json!({"_window": {"function": "RANK", "orderBy": [], "rank": 1}})).is_err());
        assert!(parse(json!({"_window": {
            "function": "PERCENT_RANK", "orderBy": "price", "percentile": {"lte": 1.5}
        }}))
        .is_err());
        assert!(parse(json!({"_window": {
            "function": "RANK", "orderBy": "price", "percentile": {"lte": 0.5}
        }}))
        .is_err());
    }

    #[test]
    fn test_subquery_and_exists() {
        let node = parse(json!({"reviews_subquery": {
            "orderBy": "-createdAt", "field": "rating", "gte": 4
        }}))
        .unwrap();
        let FilterNode::Subquery(s) = node else {
            panic!("expected subquery");
        };
        assert_eq!(s.field, "rating");
        assert_eq!(
            s.order_by[0].target,
            SortTarget::Field(FieldPath::parse("createdAt"))
        );
        assert_eq!(s.comparator, Comparator::new(vec![(Operator::Gte, Value::Int(4))]));

        let exists = parse(json!({"reviews_exists": {"filter": {"rating": {"eq": 5}}, "exists": false}}))
            .unwrap();
        assert!(matches!(exists, FilterNode::Exists(ExistsFilter { exists: false, inner_filter: Some(_), .. })));
    }

    #[test]
    fn test_array_filter() {
        let node = parse(json!({"tags": {"contains": ["python", "django"], "length": {"gte": 2}}})).unwrap();
        let FilterNode::Array(a) = node else {
            panic!("expected array filter");
        };
        assert_eq!(
            a.contains,
            Some(vec![Value::from("python"), Value::from("django")])
        );
        assert!(a.length.is_some());
        assert!(matches!(
            parse(json!({"tags": {"eq": ["x"]}})),
            Err(FilterError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_compare_filter() {
        let node = parse(json!({"_compare": {
            "left": "price", "operator": "gt", "right": "cost", "rightMultiplier": 1.5
        }}))
        .unwrap();
        assert_eq!(
            node,
            FilterNode::Compare(FieldCompareFilter {
                left: FieldPath::parse("price"),
                operator: CompareOp::Gt,
                right: FieldPath::parse("cost"),
                right_multiplier: Some(1.5),
                right_offset: None,
            })
        );
        assert!(parse(json!({"_compare": {"left": "price", "operator": "gt", "right": "name"}})).is_err());
        assert!(parse(json!({"_compare": {
            "left": "createdAt", "operator": "gt", "right": "releaseDate", "rightOffset": 1
        }}))
        .is_err());
    }

    #[test]
    fn test_trunc_and_extract() {
        let node = parse(json!({"createdAt_trunc": {"precision": "month", "year": 2024, "month": 3}})).unwrap();
        let FilterNode::DateTrunc(t) = node else {
            panic!("expected trunc");
        };
        assert_eq!(t.precision, DatePrecision::Month);
        assert_eq!((t.year, t.month), (Some(2024), Some(3)));

        assert!(parse(json!({"createdAt_trunc": {"precision": "month", "year": 2024}})).is_err());
        assert!(parse(json!({"createdAt_trunc": {"precision": "day", "thisPeriod": true, "year": 2024}})).is_err());
        assert!(parse(json!({"releaseDate_trunc": {"precision": "hour", "thisPeriod": true}})).is_err());

        let extract = parse(json!({"createdAt_extract": {"isoWeekDay": {"in": [6, 7]}, "hour": {"gte": 9}}})).unwrap();
        let FilterNode::ExtractDate(e) = extract else {
            panic!("expected extract");
        };
        assert_eq!(e.parts.len(), 2);
        assert!(parse(json!({"releaseDate_extract": {"hour": 1}})).is_err());
    }

    #[test]
    fn test_allowed_fields() {
        let schema = schema();
        let allowed = AllowedFields::new(["price", "reviews.rating"]);
        let parser = FilterParser::new(&schema, FeatureFlags::all()).with_allowed_fields(&allowed);

        assert!(parser.parse("product", &json!({"price": {"gt": 1}})).is_ok());
        assert!(parser
            .parse("product", &json!({"reviews_some": {"rating": {"gt": 1}}}))
            .is_ok());
        assert!(matches!(
            parser.parse("product", &json!({"name": {"eq": "x"}})),
            Err(FilterError::UnknownField { .. })
        ));
        assert!(matches!(
            parser.parse("product", &json!({"reviews_some": {"author": {"eq": "x"}}})),
            Err(FilterError::UnknownField { .. })
        ));
        assert!(matches!(
            parser.parse("product", &json!({"category": {"name": {"eq": "x"}}})),
            Err(FilterError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_parse_str_errors() {
        let schema = schema();
        let parser = FilterParser::new(&schema, FeatureFlags::all());
        assert!(matches!(
            parser.parse_str("product", "{"),
            Err(FilterError::InvalidFilterJson(_))
        ));
        assert!(matches!(
            parser.parse_str("product", "[1]"),
            Err(FilterError::InvalidFilterJson(_))
        ));
        assert!(parser.parse_str("product", "{}").unwrap().is_empty());
        assert!(parser.parse_str("product", "null").unwrap().is_empty());
    }
}
