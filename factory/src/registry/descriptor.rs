//! Capability descriptors: the on-disk manifest naming a capability, its
//! implementation entry, and its input/output shapes.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::Value;

use crate::core::shape::{Shape, validate_shape};

const DESCRIPTOR_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/capability/v1.schema.json"
));

pub const DESCRIPTOR_FILE: &str = "capability.json";

static DESCRIPTOR_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(DESCRIPTOR_SCHEMA).expect("descriptor schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("descriptor schema should compile")
});

/// A descriptor that passed every structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub entry: String,
    pub input_schema: Shape,
    pub output_schema: Shape,
    pub capabilities: Vec<String>,
}

/// Every problem with a raw descriptor: envelope schema violations first, then
/// shape errors for `inputSchema` and `outputSchema`.
pub fn validate_descriptor(raw: &Value) -> Vec<String> {
    let mut errors: Vec<String> = DESCRIPTOR_VALIDATOR
        .iter_errors(raw)
        .map(|err| err.to_string())
        .collect();
    for field in ["inputSchema", "outputSchema"] {
        if let Some(node) = raw.get(field) {
            errors.extend(validate_shape(node, field));
        }
    }
    errors
}

/// Validate and build a [`Descriptor`].
pub fn parse_descriptor(raw: &Value) -> Result<Descriptor, Vec<String>> {
    let errors = validate_descriptor(raw);
    if !errors.is_empty() {
        return Err(errors);
    }

    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let input_schema = Shape::parse(&raw["inputSchema"], "inputSchema")?;
    let output_schema = Shape::parse(&raw["outputSchema"], "outputSchema")?;
    let capabilities = raw
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Descriptor {
        id: text("id"),
        name: text("name"),
        version: text("version"),
        entry: text("entry"),
        input_schema,
        output_schema,
        capabilities,
    })
}
