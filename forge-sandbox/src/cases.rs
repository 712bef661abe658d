//! Default test inputs derived from a tool's input schema.
//!
//! Samples follow the schema's shape only: they say nothing about whether a
//! handler computes the right answer.

use serde_json::{Map, Value, json};

use crate::candidate::TestCase;

/// Builds the `required_only` and `all_properties` cases for `schema`.
#[must_use]
pub fn default_test_cases(schema: &Value) -> Vec<TestCase> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut required_only = Map::new();
    let mut all_properties = Map::new();
    if let Some(properties) = properties {
        for (name, property) in properties {
            let sample = sample_value(property);
            if required.contains(&name.as_str()) {
                required_only.insert(name.clone(), sample.clone());
            }
            all_properties.insert(name.clone(), sample);
        }
    }

    vec![
        TestCase::new("required_only", Value::Object(required_only)),
        TestCase::new("all_properties", Value::Object(all_properties)),
    ]
}

/// Produces one plausible value for a property schema.
///
/// Precedence: first `enum` entry, then `default`, then a value by `type`.
#[must_use]
pub fn sample_value(schema: &Value) -> Value {
    if let Some(first) = schema
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
    {
        return first.clone();
    }
    if let Some(default) = schema.get("default") {
        return default.clone();
    }

    match schema_type(schema) {
        Some("string") => json!("test_value"),
        Some(kind @ ("integer" | "number")) => sample_number(schema, kind == "integer"),
        Some("boolean") => Value::Bool(true),
        Some("array") => match schema.get("items") {
            Some(items) => Value::Array(vec![sample_value(items)]),
            None => Value::Array(Vec::new()),
        },
        Some("object") => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    object.insert(name.clone(), sample_value(property));
                }
            }
            Value::Object(object)
        }
        _ => Value::Null,
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(kind)) => Some(kind.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|kind| *kind != "null"),
        _ if schema.get("properties").is_some() => Some("object"),
        _ => None,
    }
}

fn sample_number(schema: &Value, integer: bool) -> Value {
    let minimum = schema.get("minimum").and_then(Value::as_f64);
    let maximum = schema.get("maximum").and_then(Value::as_f64);
    let mut value = minimum.unwrap_or(1.0);
    if let Some(maximum) = maximum {
        value = value.min(maximum);
    }

    if integer {
        #[allow(clippy::cast_possible_truncation)]
        let value = value.ceil() as i64;
        json!(value)
    } else {
        json!(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_required_and_full_inputs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "count": { "type": "integer", "minimum": 3 },
                "loud": { "type": "boolean" }
            },
            "required": ["text"]
        });

        let cases = default_test_cases(&schema);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].name, "required_only");
        assert_eq!(cases[0].input, json!({ "text": "test_value" }));
        assert_eq!(cases[1].name, "all_properties");
        assert_eq!(
            cases[1].input,
            json!({ "text": "test_value", "count": 3, "loud": true })
        );
    }

    #[test]
    fn enum_and_default_take_precedence() {
        assert_eq!(
            sample_value(&json!({ "type": "string", "enum": ["usd", "eur"], "default": "eur" })),
            json!("usd")
        );
        assert_eq!(
            sample_value(&json!({ "type": "string", "default": "eur" })),
            json!("eur")
        );
    }

    #[test]
    fn numbers_respect_bounds() {
        assert_eq!(sample_value(&json!({ "type": "integer" })), json!(1));
        assert_eq!(
            sample_value(&json!({ "type": "integer", "maximum": 0 })),
            json!(0)
        );
        assert_eq!(
            sample_value(&json!({ "type": "number", "minimum": 2.5 })),
            json!(2.5)
        );
    }

    #[test]
    fn nested_structures_are_sampled() {
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": { "id": { "type": ["string", "null"] } }
            }
        });
        assert_eq!(sample_value(&schema), json!([{ "id": "test_value" }]));
        assert_eq!(sample_value(&json!({ "type": "array" })), json!([]));
    }

    #[test]
    fn schema_without_properties_yields_empty_objects() {
        let cases = default_test_cases(&json!({ "type": "object" }));
        assert!(cases.iter().all(|case| case.input == json!({})));
    }
}
