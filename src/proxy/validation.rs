//! Inbound body validation against a declared JSON Schema subset.
//!
//! Supported keywords: `type` (single or list), `format: uuid`, `enum`,
//! `required`, `properties`, `items`, `minLength`, `maxLength`.
//! Unknown keywords are ignored.

use serde_json::Value;

use super::headers::is_valid_uuid;

/// A single violation, addressed by its instance path (`data/alias`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Instance path, rooted at `data`
    pub path: String,
    /// What is wrong
    pub message: String,
}

/// Every violation found in one body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Violations in document order
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    /// Comma-separated human-readable summary (`data/alias must be string, ...`)
    #[must_use]
    pub fn errors_text(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{} {}", v.path, v.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Validator for inbound JSON bodies; a missing schema accepts everything
#[derive(Debug, Clone, Default)]
pub struct BodyValidator {
    schema: Option<Value>,
}

impl BodyValidator {
    /// Create a validator for an optional schema
    #[must_use]
    pub fn new(schema: Option<Value>) -> Self {
        Self { schema }
    }

    /// Whether a schema is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.schema.is_some()
    }

    /// Validate a body
    ///
    /// # Errors
    ///
    /// Returns every violation found.
    pub fn validate(&self, body: &Value) -> Result<(), ValidationFailure> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };

        let mut violations = Vec::new();
        check(body, schema, "data", &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure { violations })
        }
    }
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            out.push(Violation {
                path: path.to_string(),
                message: format!("must be {}", allowed.join(",")),
            });
            // Further keywords assume the declared type
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array)
        && !options.contains(value)
    {
        out.push(Violation {
            path: path.to_string(),
            message: "must be equal to one of the allowed values".to_string(),
        });
    }

    match value {
        Value::String(s) => check_string(s, schema, path, out),
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        out.push(Violation {
                            path: path.to_string(),
                            message: format!("must have required property '{name}'"),
                        });
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, prop_schema) in properties {
                    if let Some(prop) = map.get(name) {
                        check(prop, prop_schema, &format!("{path}/{name}"), out);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item, item_schema, &format!("{path}/{i}"), out);
                }
            }
        }
        _ => {}
    }
}

fn check_string(s: &str, schema: &serde_json::Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;

    if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
        && len < min
    {
        out.push(Violation {
            path: path.to_string(),
            message: format!("must NOT have fewer than {min} characters"),
        });
    }

    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && len > max
    {
        out.push(Violation {
            path: path.to_string(),
            message: format!("must NOT have more than {max} characters"),
        });
    }

    if schema.get("format").and_then(Value::as_str) == Some("uuid") && !is_valid_uuid(s) {
        out.push(Violation {
            path: path.to_string(),
            message: "must match format \"uuid\"".to_string(),
        });
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_no_schema_accepts_everything() {
        let validator = BodyValidator::new(None);
        assert!(!validator.is_enabled());
        assert!(validator.validate(&json!({"anything": [1, 2]})).is_ok());
    }

    #[test]
    fn test_uuid_string_schema() {
        let validator = BodyValidator::new(Some(json!({"type": "string", "format": "uuid"})));
        assert!(validator.validate(&json!("3f2b8c1e-9d4a-4b7e-8c21-0a5f6e7d8b90")).is_ok());

        let err = validator.validate(&json!("nope")).unwrap_err();
        assert_eq!(err.errors_text(), "data must match format \"uuid\"");

        let err = validator.validate(&json!({"alias": "x"})).unwrap_err();
        assert_eq!(err.errors_text(), "data must be string");
    }

    #[test]
    fn test_object_schema_reports_all_violations() {
        let validator = BodyValidator::new(Some(json!({
            "type": "object",
            "required": ["alias", "password"],
            "properties": {
                "alias": {"type": "string", "minLength": 3},
                "role": {"enum": ["admin", "user"]}
            }
        })));

        assert!(validator
            .validate(&json!({"alias": "alice", "password": "pw", "role": "user"}))
            .is_ok());

        let err = validator.validate(&json!({"alias": "al", "role": "root"})).unwrap_err();
        assert_eq!(
            err.errors_text(),
            "data must have required property 'password', \
             data/alias must NOT have fewer than 3 characters, \
             data/role must be equal to one of the allowed values"
        );
    }

    #[test]
    fn test_array_items_are_checked() {
        let validator = BodyValidator::new(Some(json!({
            "type": "array",
            "items": {"type": "integer"}
        })));
        assert!(validator.validate(&json!([1, 2, 3])).is_ok());
        let err = validator.validate(&json!([1, "two"])).unwrap_err();
        assert_eq!(err.violations[0].path, "data/1");
    }

    #[test]
    fn test_type_lists_are_supported() {
        let validator = BodyValidator::new(Some(json!({"type": ["string", "null"]})));
        assert!(validator.validate(&Value::Null).is_ok());
        assert!(validator.validate(&json!("x")).is_ok());
        assert_eq!(
            validator.validate(&json!(1)).unwrap_err().errors_text(),
            "data must be string,null"
        );
    }
}
