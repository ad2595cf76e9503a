//! Structural shape language for capability inputs and outputs.
//!
//! A shape is a closed set of node kinds: `object`, `array`, and the scalar
//! leaves `string`, `number`, `boolean`. Both checks here accumulate every
//! violation as a path-qualified message instead of stopping at the first.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

const KINDS: [&str; 5] = ["object", "string", "number", "boolean", "array"];

/// A parsed, well-formed shape node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Object {
        properties: BTreeMap<String, Shape>,
        required: Vec<String>,
        /// `false` closes the object to undeclared keys.
        additional_properties: bool,
    },
    Array {
        items: Box<Shape>,
    },
    String,
    Number,
    Boolean,
}

impl Shape {
    /// Validate a raw shape node and build the typed tree.
    ///
    /// The top-level node must be an `object`.
    pub fn parse(raw: &Value, path: &str) -> Result<Shape, Vec<String>> {
        let errors = validate_shape(raw, path);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(build(raw))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Object { .. } => "object",
            Shape::Array { .. } => "array",
            Shape::String => "string",
            Shape::Number => "number",
            Shape::Boolean => "boolean",
        }
    }
}

impl Serialize for Shape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind())?;
        match self {
            Shape::Object {
                properties,
                required,
                additional_properties,
            } => {
                map.serialize_entry("properties", properties)?;
                map.serialize_entry("required", required)?;
                map.serialize_entry("additionalProperties", additional_properties)?;
            }
            Shape::Array { items } => map.serialize_entry("items", items)?,
            Shape::String | Shape::Number | Shape::Boolean => {}
        }
        map.end()
    }
}

/// Check that a raw shape descriptor is itself well-formed.
///
/// The node at `path` must be an `object` shape; nested nodes may be any kind.
pub fn validate_shape(raw: &Value, path: &str) -> Vec<String> {
    let mut errors = Vec::new();
    validate_node(raw, path, &mut errors, true);
    errors
}

fn validate_node(raw: &Value, path: &str, errors: &mut Vec<String>, require_object: bool) {
    let Some(node) = raw.as_object() else {
        errors.push(format!("{path} must be an object"));
        return;
    };

    let Some(kind) = node
        .get("type")
        .and_then(Value::as_str)
        .filter(|kind| KINDS.contains(kind))
    else {
        errors.push(format!(
            "{path}.type must be one of: object, string, number, boolean, array"
        ));
        return;
    };

    if require_object && kind != "object" {
        errors.push(format!("{path}.type must be \"object\""));
    }

    match kind {
        "object" => validate_object_node(node, path, errors),
        "array" => validate_array_node(node, path, errors),
        _ => {
            for key in ["properties", "required", "additionalProperties"] {
                if node.contains_key(key) {
                    errors.push(format!("{path}.{key} is only valid when type is \"object\""));
                }
            }
            if node.contains_key("items") {
                errors.push(format!("{path}.items is only valid when type is \"array\""));
            }
        }
    }
}

fn validate_object_node(node: &Map<String, Value>, path: &str, errors: &mut Vec<String>) {
    if node.contains_key("items") {
        errors.push(format!("{path}.items is only valid when type is \"array\""));
    }

    if let Some(additional) = node.get("additionalProperties")
        && !additional.is_boolean()
    {
        errors.push(format!(
            "{path}.additionalProperties must be boolean when provided"
        ));
    }

    let Some(properties) = node.get("properties").and_then(Value::as_object) else {
        errors.push(format!("{path}.properties must be an object"));
        return;
    };

    if let Some(required) = node.get("required") {
        match required.as_array() {
            Some(names) if names.iter().all(Value::is_string) => {
                for name in names.iter().filter_map(Value::as_str) {
                    if !properties.contains_key(name) {
                        errors.push(format!(
                            "{path}.required contains \"{name}\" but it is not defined in properties"
                        ));
                    }
                }
            }
            _ => errors.push(format!("{path}.required must be an array of strings")),
        }
    }

    for (name, child) in properties {
        validate_node(child, &format!("{path}.properties.{name}"), errors, false);
    }
}

fn validate_array_node(node: &Map<String, Value>, path: &str, errors: &mut Vec<String>) {
    for key in ["properties", "required", "additionalProperties"] {
        if node.contains_key(key) {
            errors.push(format!("{path}.{key} is only valid when type is \"object\""));
        }
    }
    match node.get("items") {
        Some(items) => validate_node(items, &format!("{path}.items"), errors, false),
        None => errors.push(format!("{path}.items must be an object when type is \"array\"")),
    }
}

/// Build the typed tree from a node that already passed [`validate_shape`].
fn build(raw: &Value) -> Shape {
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "object" => {
            let properties = raw
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, child)| (name.clone(), build(child)))
                        .collect()
                })
                .unwrap_or_default();
            let required = raw
                .get("required")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let additional_properties = raw
                .get("additionalProperties")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            Shape::Object {
                properties,
                required,
                additional_properties,
            }
        }
        "array" => Shape::Array {
            items: Box::new(raw.get("items").map(build).unwrap_or(Shape::String)),
        },
        "number" => Shape::Number,
        "boolean" => Shape::Boolean,
        _ => Shape::String,
    }
}

/// Check a value against a shape, reporting every violation under `path`.
pub fn validate_value(value: &Value, shape: &Shape, path: &str) -> Vec<String> {
    let mut errors = Vec::new();
    check_value(value, shape, path, &mut errors);
    errors
}

fn check_value(value: &Value, shape: &Shape, path: &str, errors: &mut Vec<String>) {
    match shape {
        Shape::String => {
            if !value.is_string() {
                errors.push(format!("{path} must be string"));
            }
        }
        // serde_json numbers are always finite, so NaN can never reach this point.
        Shape::Number => {
            if !value.is_number() {
                errors.push(format!("{path} must be number"));
            }
        }
        Shape::Boolean => {
            if !value.is_boolean() {
                errors.push(format!("{path} must be boolean"));
            }
        }
        Shape::Array { items } => {
            let Some(elements) = value.as_array() else {
                errors.push(format!("{path} must be array"));
                return;
            };
            for (idx, element) in elements.iter().enumerate() {
                check_value(element, items, &format!("{path}[{idx}]"), errors);
            }
        }
        Shape::Object {
            properties,
            required,
            additional_properties,
        } => {
            let Some(object) = value.as_object() else {
                errors.push(format!("{path} must be object"));
                return;
            };
            for key in required {
                if !object.contains_key(key) {
                    errors.push(format!("{path}.{key} is required"));
                }
            }
            for (key, child) in object {
                match properties.get(key) {
                    Some(child_shape) => {
                        check_value(child, child_shape, &format!("{path}.{key}"), errors);
                    }
                    None if !additional_properties => {
                        errors.push(format!("{path}.{key} is not allowed"));
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_shape() -> Shape {
        Shape::parse(
            &json!({
                "type": "object",
                "properties": {
                    "taskId": { "type": "string" },
                    "fileScope": { "type": "array", "items": { "type": "string" } },
                    "dryRun": { "type": "boolean" },
                    "limit": { "type": "number" }
                },
                "required": ["taskId", "fileScope"],
                "additionalProperties": false
            }),
            "inputSchema",
        )
        .expect("valid shape")
    }

    #[test]
    fn well_formed_shape_has_no_errors() {
        let raw = json!({
            "type": "object",
            "properties": { "items": { "type": "array", "items": { "type": "number" } } },
            "required": ["items"]
        });
        assert!(validate_shape(&raw, "inputSchema").is_empty());
    }

    #[test]
    fn shape_errors_are_reported_together() {
        let raw = json!({
            "type": "object",
            "items": { "type": "string" },
            "properties": {
                "list": { "type": "array", "properties": {}, "items": { "type": "string" } },
                "weird": { "type": "date" },
                "name": { "type": "string", "items": { "type": "string" } }
            },
            "required": ["missing"]
        });

        let errors = validate_shape(&raw, "inputSchema");
        assert!(errors.contains(&"inputSchema.items is only valid when type is \"array\"".to_string()));
        assert!(errors.contains(
            &"inputSchema.required contains \"missing\" but it is not defined in properties"
                .to_string()
        ));
        assert!(errors.contains(
            &"inputSchema.properties.list.properties is only valid when type is \"object\""
                .to_string()
        ));
        assert!(errors.contains(
            &"inputSchema.properties.weird.type must be one of: object, string, number, boolean, array"
                .to_string()
        ));
        assert!(errors.contains(
            &"inputSchema.properties.name.items is only valid when type is \"array\"".to_string()
        ));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn top_level_must_be_object() {
        let errors = validate_shape(&json!({ "type": "string" }), "outputSchema");
        assert_eq!(errors, vec!["outputSchema.type must be \"object\"".to_string()]);
    }

    #[test]
    fn array_without_items_is_malformed() {
        let raw = json!({ "type": "object", "properties": { "xs": { "type": "array" } } });
        let errors = validate_shape(&raw, "s");
        assert_eq!(
            errors,
            vec!["s.properties.xs.items must be an object when type is \"array\"".to_string()]
        );
    }

    #[test]
    fn value_errors_are_path_qualified_and_accumulated() {
        let shape = task_shape();
        let value = json!({
            "fileScope": ["ok", 3, true],
            "dryRun": "yes",
            "extra": 1
        });

        let mut errors = validate_value(&value, &shape, "input");
        errors.sort();
        assert_eq!(
            errors,
            vec![
                "input.dryRun must be boolean".to_string(),
                "input.extra is not allowed".to_string(),
                "input.fileScope[1] must be string".to_string(),
                "input.fileScope[2] must be string".to_string(),
                "input.taskId is required".to_string(),
            ]
        );
    }

    #[test]
    fn open_objects_accept_unknown_keys() {
        let shape = Shape::parse(
            &json!({ "type": "object", "properties": {} }),
            "inputSchema",
        )
        .expect("shape");
        assert!(validate_value(&json!({ "anything": [1, 2] }), &shape, "input").is_empty());
    }

    #[test]
    fn non_object_value_is_reported_once() {
        let errors = validate_value(&json!([1]), &task_shape(), "input");
        assert_eq!(errors, vec!["input must be object".to_string()]);
    }

    #[test]
    fn number_accepts_integers_and_floats() {
        let shape = task_shape();
        let value = json!({ "taskId": "t", "fileScope": [], "limit": 2.5 });
        assert!(validate_value(&value, &shape, "input").is_empty());
        let value = json!({ "taskId": "t", "fileScope": [], "limit": "2" });
        assert_eq!(
            validate_value(&value, &shape, "input"),
            vec!["input.limit must be number".to_string()]
        );
    }

    #[test]
    fn parsed_shape_serializes_back_to_descriptor_form() {
        let shape = Shape::parse(
            &json!({ "type": "object", "properties": { "n": { "type": "number" } } }),
            "s",
        )
        .expect("shape");
        let value = serde_json::to_value(&shape).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "object",
                "properties": { "n": { "type": "number" } },
                "required": [],
                "additionalProperties": true
            })
        );
    }
}
