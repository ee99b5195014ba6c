//! Named presets
//!
//! Presets are server-defined fragments declared in the schema. They are
//! trusted configuration, so they are parsed without the caller's
//! allowed-field restriction.

use crate::error::FilterError;
use crate::filter::ast::FilterNode;
use crate::filter::parser::FilterParser;
use crate::schema::{FeatureFlags, Schema};

pub fn load_preset(
    schema: &Schema,
    features: FeatureFlags,
    model: &str,
    name: &str,
) -> Result<FilterNode, FilterError> {
    let meta = schema.model(model)?;
    let json = meta.preset(name).ok_or_else(|| FilterError::UnknownPreset {
        model: model.to_string(),
        name: name.to_string(),
    })?;
    tracing::trace!(model, preset = name, "Loading preset");
    FilterParser::new(schema, features).parse(model, json)
}

pub fn load_presets(
    schema: &Schema,
    features: FeatureFlags,
    model: &str,
    names: &[String],
) -> Result<Vec<FilterNode>, FilterError> {
    names
        .iter()
        .map(|name| load_preset(schema, features, model, name))
        .collect()
}
