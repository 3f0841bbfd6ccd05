//! JSON Schema validation for tool arguments.
//!
//! A small validator covering the schema subset tools actually declare:
//! type checking, required fields, nested properties, enums, array items,
//! string lengths, and numeric bounds. Arguments are checked against the
//! tool's `inputSchema` before the handler runs, so handlers never see
//! structurally invalid input. Not a full JSON Schema implementation.

use std::fmt;

use serde_json::Value;

/// Error returned when schema validation fails.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Path to the invalid value (e.g., `root.foo` or `root.items[0]`).
    pub path: String,
    /// Description of what went wrong.
    pub message: String,
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_owned(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result of JSON Schema validation.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validates a JSON value against a JSON Schema.
///
/// Collects every violation rather than stopping at the first, so a
/// rejected tool call can report all argument problems at once.
///
/// # Errors
///
/// Returns all violations found; an empty error list never escapes.
///
/// # Example
///
/// ```
/// use mcpgate_protocol::schema::validate;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "object",
///     "properties": {
///         "number1": { "type": "number" },
///         "number2": { "type": "number" }
///     },
///     "required": ["number1", "number2"]
/// });
///
/// assert!(validate(&schema, &json!({"number1": 5, "number2": 3})).is_ok());
/// assert!(validate(&schema, &json!({"number1": 5})).is_err());
/// ```
pub fn validate(schema: &Value, value: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    check(schema, value, "root", &mut errors);
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check(schema: &Value, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    // Boolean schemas: true accepts everything, false rejects everything.
    if let Some(accept) = schema.as_bool() {
        if !accept {
            errors.push(ValidationError::new(path, "schema rejects all values"));
        }
        return;
    }
    let Some(schema) = schema.as_object() else {
        // Not a schema we understand; accept rather than reject blindly.
        return;
    };

    if let Some(type_val) = schema.get("type") {
        if !type_matches(type_val, value) {
            errors.push(ValidationError::new(
                path,
                format!(
                    "expected type {}, got {}",
                    render_type(type_val),
                    type_name(value)
                ),
            ));
            // Remaining keywords assume the right type; stop here.
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(ValidationError::new(
                path,
                format!("value must be one of {allowed:?}"),
            ));
        }
    }

    match value {
        Value::Object(obj) => check_object(schema, obj, path, errors),
        Value::Array(items) => check_array(schema, items, path, errors),
        Value::String(s) => check_string(schema, s, path, errors),
        Value::Number(_) => check_number(schema, value, path, errors),
        _ => {}
    }
}

fn check_object(
    schema: &serde_json::Map<String, Value>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                errors.push(ValidationError::new(
                    path,
                    format!("missing required field: {name}"),
                ));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(properties) = properties {
        for (key, field) in obj {
            if let Some(field_schema) = properties.get(key) {
                check(field_schema, field, &format!("{path}.{key}"), errors);
            }
        }
    }

    if let Some(additional) = schema.get("additionalProperties") {
        for (key, field) in obj {
            if properties.is_some_and(|p| p.contains_key(key)) {
                continue;
            }
            match additional {
                Value::Bool(false) => {
                    errors.push(ValidationError::new(
                        path,
                        format!("unexpected field: {key}"),
                    ));
                }
                Value::Object(_) => check(additional, field, &format!("{path}.{key}"), errors),
                _ => {}
            }
        }
    }
}

fn check_array(
    schema: &serde_json::Map<String, Value>,
    items: &[Value],
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            errors.push(ValidationError::new(
                path,
                format!("expected at least {min} items, got {}", items.len()),
            ));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            errors.push(ValidationError::new(
                path,
                format!("expected at most {max} items, got {}", items.len()),
            ));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{path}[{i}]"), errors);
        }
    }
}

fn check_string(
    schema: &serde_json::Map<String, Value>,
    s: &str,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            errors.push(ValidationError::new(
                path,
                format!("string shorter than minLength {min}"),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            errors.push(ValidationError::new(
                path,
                format!("string longer than maxLength {max}"),
            ));
        }
    }
}

fn check_number(
    schema: &serde_json::Map<String, Value>,
    value: &Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let Some(n) = value.as_f64() else {
        return;
    };
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            errors.push(ValidationError::new(path, format!("value below minimum {min}")));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            errors.push(ValidationError::new(path, format!("value above maximum {max}")));
        }
    }
    if let Some(min) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
        if n <= min {
            errors.push(ValidationError::new(
                path,
                format!("value must be greater than {min}"),
            ));
        }
    }
    if let Some(max) = schema.get("exclusiveMaximum").and_then(Value::as_f64) {
        if n >= max {
            errors.push(ValidationError::new(
                path,
                format!("value must be less than {max}"),
            ));
        }
    }
}

fn type_matches(type_val: &Value, value: &Value) -> bool {
    match type_val {
        Value::String(t) => matches_name(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| matches_name(t, value)),
        _ => true,
    }
}

fn matches_name(type_name: &str, value: &Value) -> bool {
    match type_name {
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

fn render_type(type_val: &Value) -> String {
    match type_val {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "unknown".to_owned(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn adder_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "number1": { "type": "number" },
                "number2": { "type": "number" }
            },
            "required": ["number1", "number2"]
        })
    }

    #[test]
    fn accepts_valid_tool_arguments() {
        assert!(validate(&adder_schema(), &json!({"number1": 5, "number2": 3})).is_ok());
        assert!(validate(&adder_schema(), &json!({"number1": 5.5, "number2": -3})).is_ok());
    }

    #[test]
    fn reports_missing_required_fields() {
        let errors = validate(&adder_schema(), &json!({"number1": 5})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "root");
        assert!(errors[0].message.contains("number2"));
    }

    #[test]
    fn reports_type_mismatches_with_field_paths() {
        let errors = validate(
            &adder_schema(),
            &json!({"number1": "five", "number2": 3}),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "root.number1");
        assert!(errors[0].message.contains("expected type number"));
        assert!(errors[0].message.contains("got string"));
    }

    #[test]
    fn collects_every_violation() {
        let errors = validate(&adder_schema(), &json!({"number1": true})).unwrap_err();
        // One missing field plus one type mismatch.
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn integer_type_rejects_fractions() {
        let schema = json!({"type": "integer"});
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_err());
    }

    #[test]
    fn type_arrays_accept_any_listed_type() {
        let schema = json!({"type": ["string", "null"]});
        assert!(validate(&schema, &json!("hello")).is_ok());
        assert!(validate(&schema, &json!(null)).is_ok());
        assert!(validate(&schema, &json!(1)).is_err());
    }

    #[test]
    fn enum_restricts_values() {
        let schema = json!({"type": "string", "enum": ["asc", "desc"]});
        assert!(validate(&schema, &json!("asc")).is_ok());
        let errors = validate(&schema, &json!("sideways")).unwrap_err();
        assert!(errors[0].message.contains("one of"));
    }

    #[test]
    fn nested_object_paths_compose() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": { "limit": { "type": "integer" } }
                }
            }
        });
        let errors = validate(&schema, &json!({"filter": {"limit": "ten"}})).unwrap_err();
        assert_eq!(errors[0].path, "root.filter.limit");
    }

    #[test]
    fn array_items_are_validated_with_indices() {
        let schema = json!({
            "type": "array",
            "items": { "type": "number" },
            "minItems": 1,
            "maxItems": 3
        });
        assert!(validate(&schema, &json!([1, 2])).is_ok());
        let errors = validate(&schema, &json!([1, "two"])).unwrap_err();
        assert_eq!(errors[0].path, "root[1]");
        assert!(validate(&schema, &json!([])).is_err());
        assert!(validate(&schema, &json!([1, 2, 3, 4])).is_err());
    }

    #[test]
    fn closed_objects_reject_unknown_fields() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "additionalProperties": false
        });
        assert!(validate(&schema, &json!({"name": "ok"})).is_ok());
        let errors = validate(&schema, &json!({"name": "ok", "extra": 1})).unwrap_err();
        assert!(errors[0].message.contains("extra"));
    }

    #[test]
    fn additional_properties_schema_applies_to_unknown_fields() {
        let schema = json!({
            "type": "object",
            "additionalProperties": { "type": "integer" }
        });
        assert!(validate(&schema, &json!({"a": 1, "b": 2})).is_ok());
        let errors = validate(&schema, &json!({"a": "one"})).unwrap_err();
        assert_eq!(errors[0].path, "root.a");
    }

    #[test]
    fn string_length_bounds() {
        let schema = json!({"type": "string", "minLength": 2, "maxLength": 4});
        assert!(validate(&schema, &json!("abc")).is_ok());
        assert!(validate(&schema, &json!("a")).is_err());
        assert!(validate(&schema, &json!("abcde")).is_err());
    }

    #[test]
    fn numeric_bounds() {
        let schema = json!({"type": "number", "minimum": 0, "maximum": 10});
        assert!(validate(&schema, &json!(0)).is_ok());
        assert!(validate(&schema, &json!(10)).is_ok());
        assert!(validate(&schema, &json!(-1)).is_err());
        assert!(validate(&schema, &json!(11)).is_err());

        let schema = json!({"type": "number", "exclusiveMinimum": 0});
        assert!(validate(&schema, &json!(1)).is_ok());
        assert!(validate(&schema, &json!(0)).is_err());
    }

    #[test]
    fn boolean_schemas() {
        assert!(validate(&json!(true), &json!({"anything": 1})).is_ok());
        assert!(validate(&json!(false), &json!(1)).is_err());
    }

    #[test]
    fn empty_schema_accepts_everything() {
        let schema = json!({});
        assert!(validate(&schema, &json!(null)).is_ok());
        assert!(validate(&schema, &json!([1, "two", {"three": 3}])).is_ok());
    }
}
