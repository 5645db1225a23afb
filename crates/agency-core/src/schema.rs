//! Minimal schema descriptor for job inputs and outputs.
//!
//! A schema maps field names to `{required?, type?, enum?}`. Only those three
//! checks exist; anything richer belongs to the assignee.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Constraints for a single field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field must be present and non-null.
    #[serde(default)]
    pub required: bool,
    /// JSON type name: `string`, `number`, `integer`, `boolean`, `object`,
    /// `array` or `null`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    /// Allowed values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl FieldSchema {
    /// A required field of the given type.
    pub fn required(field_type: &str) -> Self {
        Self {
            required: true,
            field_type: Some(field_type.to_string()),
            allowed: None,
        }
    }

    /// An optional field of the given type.
    pub fn optional(field_type: &str) -> Self {
        Self {
            required: false,
            field_type: Some(field_type.to_string()),
            allowed: None,
        }
    }

    /// Restrict the field to a fixed set of values.
    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }
}

/// Field name → constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, FieldSchema>,
}

/// Result of validating a value against a [`Schema`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// True when `errors` is empty.
    pub valid: bool,
    /// One human-readable string per violation.
    pub errors: Vec<String>,
}

impl Schema {
    /// Empty schema (accepts any object).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field registration.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: FieldSchema) -> Self {
        let _ = self.fields.insert(name.into(), spec);
        self
    }

    /// Whether no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `value` against every declared field.
    pub fn validate(&self, value: &Value) -> ValidationOutcome {
        let mut errors = Vec::new();

        let Some(obj) = value.as_object() else {
            if !self.fields.is_empty() {
                errors.push(format!("expected an object, got {}", type_name(value)));
            }
            return ValidationOutcome {
                valid: errors.is_empty(),
                errors,
            };
        };

        for (name, spec) in &self.fields {
            let field = obj.get(name).filter(|v| !v.is_null());
            let Some(field) = field else {
                if spec.required {
                    errors.push(format!("missing required field '{name}'"));
                }
                continue;
            };

            if let Some(expected) = &spec.field_type {
                if !matches_type(field, expected) {
                    errors.push(format!(
                        "field '{name}' must be of type {expected}, got {}",
                        type_name(field)
                    ));
                }
            }

            if let Some(allowed) = &spec.allowed {
                if !allowed.contains(field) {
                    let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                    errors.push(format!(
                        "field '{name}' must be one of [{}], got {field}",
                        options.join(", ")
                    ));
                }
            }
        }

        ValidationOutcome {
            valid: errors.is_empty(),
            errors,
        }
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
        _ => false,
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
