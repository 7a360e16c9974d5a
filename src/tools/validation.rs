//! JSON Schema checks for tool arguments and structured model output.
//!
//! Covers the subset of JSON Schema used in tool declarations: `type`,
//! `required`, `properties`, `items` and `enum`, recursively.

use serde_json::Value;

/// Validate tool arguments against the tool's parameter schema.
///
/// Returns a message describing the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    // Models occasionally send `null` for argument-less calls.
    if args.is_null() && schema_type(schema).as_deref() == Some("object") {
        return Ok(());
    }
    validate_value(args, schema)
}

/// Validate an arbitrary value against a schema.
pub fn validate_value(value: &Value, schema: &Value) -> Result<(), String> {
    check(value, schema, "$")
}

fn schema_type(schema: &Value) -> Option<String> {
    schema
        .get("type")
        .and_then(|v| v.as_str())
        .map(str::to_ascii_lowercase)
}

fn check(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema_type(schema) {
        if !value_matches_type(value, &expected) {
            return Err(format!(
                "{path}: expected {expected}, got {}",
                json_type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value {value} is not one of {allowed:?}"));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
            for name in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(name) {
                    return Err(format!("{path}: missing required field '{name}'"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (key, field) in obj {
                if let Some(field_schema) = properties.get(key) {
                    check(field, field_schema, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(elements)) = (schema.get("items"), value.as_array()) {
        for (index, element) in elements.iter().enumerate() {
            check(element, items, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "unit": { "type": "string", "enum": ["c", "f"] },
                "days": { "type": "integer" },
            },
            "required": ["city"],
        })
    }

    #[test]
    fn rejects_non_object_args() {
        let err = validate_arguments(&json!("Oslo"), &weather_schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({"unit": "c"}), &weather_schema()).unwrap_err();
        assert!(err.contains("missing required field 'city'"));
    }

    #[test]
    fn rejects_wrong_property_type_and_enum() {
        let err = validate_arguments(&json!({"city": "Oslo", "days": "3"}), &weather_schema())
            .unwrap_err();
        assert!(err.contains("$.days"));
        let err = validate_arguments(&json!({"city": "Oslo", "unit": "k"}), &weather_schema())
            .unwrap_err();
        assert!(err.contains("$.unit"));
    }

    #[test]
    fn accepts_null_for_object_schema() {
        let schema = json!({ "type": "object", "properties": {} });
        assert!(validate_arguments(&Value::Null, &schema).is_ok());
        assert!(validate_value(&Value::Null, &schema).is_err());
    }

    #[test]
    fn nested_arrays_are_checked() {
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "items": { "type": "array", "items": { "type": "object", "required": ["sku"] } }
            }
        });
        assert!(validate_value(&json!({"items": [{"sku": "a"}]}), &schema).is_ok());
        let err = validate_value(&json!({"items": [{"sku": "a"}, {}]}), &schema).unwrap_err();
        assert!(err.contains("$.items[1]"));
    }
}
