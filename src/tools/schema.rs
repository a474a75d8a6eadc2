//! Validation of tool arguments against the JSON-schema subset tools declare:
//! `type`, `properties`, `required`, `enum`, `items` and `additionalProperties: false`.

use serde_json::Value;

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns a message naming the first offending path, e.g. `$.max_results: expected integer, got string`.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let schema = match schema.as_object() {
        Some(s) => s,
        None => {
            return Ok(());
        }
    };

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types.iter().filter_map(Value::as_str).any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!("{}: expected {}, got {}", path, expected_label(expected), describe(value)));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(format!("{}: value {} is not one of {}", path, value, Value::Array(allowed.clone())));
        }
    }

    if let Value::Object(obj) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(format!("{}: missing required property '{}'", path, name));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));
        for (key, item) in obj {
            match properties.and_then(|p| p.get(key)) {
                Some(sub) => validate_at(sub, item, &format!("{}.{}", path, key))?,
                None if closed => {
                    return Err(format!("{}: unexpected property '{}'", path, key));
                }
                None => {}
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

fn expected_label(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) =>
            types
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" or "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer"},
                "depth": {"type": "string", "enum": ["basic", "advanced"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_conforming_arguments() {
        let args = json!({"query": "rust", "max_results": 3, "depth": "basic", "tags": ["a", "b"]});
        assert!(validate(&search_schema(), &args).is_ok());
    }

    #[test]
    fn reports_missing_required_property() {
        let err = validate(&search_schema(), &json!({"max_results": 3})).unwrap_err();
        assert_eq!(err, "$: missing required property 'query'");
    }

    #[test]
    fn reports_type_mismatch_with_path() {
        let err = validate(&search_schema(), &json!({"query": "x", "max_results": "3"})).unwrap_err();
        assert_eq!(err, "$.max_results: expected integer, got string");

        let err = validate(&search_schema(), &json!({"query": "x", "tags": ["a", 1]})).unwrap_err();
        assert_eq!(err, "$.tags[1]: expected string, got integer");
    }

    #[test]
    fn rejects_enum_violations_and_extra_properties() {
        assert!(validate(&search_schema(), &json!({"query": "x", "depth": "deep"})).is_err());
        let err = validate(&search_schema(), &json!({"query": "x", "lang": "en"})).unwrap_err();
        assert!(err.contains("unexpected property 'lang'"));
    }

    #[test]
    fn non_object_arguments_fail_object_schema() {
        assert!(validate(&search_schema(), &json!("rust")).is_err());
    }
}
