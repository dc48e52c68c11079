//! Parameter validation against a tool's declared JSON schema
//!
//! Deliberately shallow: required keys and top-level property types. A tool
//! that needs deeper validation does it in its own execute.

use serde_json::Value;

/// Validate `params` against `schema`; the error string is surfaced to the
/// model as a structured tool failure
pub fn validate(schema: &Value, params: &Value) -> Result<(), String> {
    let expects_object = schema.get("type").and_then(|t| t.as_str()) == Some("object");
    if expects_object && !params.is_object() {
        return Err(format!("expected object parameters, got {}", type_name(params)));
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if params.get(key).is_none() {
                return Err(format!("missing required parameter: {}", key));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, prop_schema) in properties {
            let Some(value) = params.get(key) else { continue };
            if value.is_null() {
                continue;
            }
            if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str())
                && !matches_type(value, expected)
            {
                return Err(format!(
                    "parameter {} should be {}, got {}",
                    key,
                    expected,
                    type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
