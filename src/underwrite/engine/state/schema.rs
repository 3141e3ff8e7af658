// SPDX-License-Identifier: MIT

//! State schema definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::store::StateUpdate;
use crate::underwrite::engine::error::StateError;

/// Schema declaring the fixed set of fields a thread's state may hold
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StateSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: BTreeMap<String, StateFieldDef>,
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StateFieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// Supported field types. `null` is accepted for every type.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field
    pub fn field(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.insert(
            name.to_string(),
            StateFieldDef {
                field_type,
                description: description.to_string(),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Check every key of an update against the declared fields.
    /// An empty schema accepts anything.
    pub fn validate(&self, update: &StateUpdate) -> Result<(), StateError> {
        if self.fields.is_empty() {
            return Ok(());
        }

        for (key, value) in update.iter() {
            let def = self
                .fields
                .get(key)
                .ok_or_else(|| StateError::UnknownField(key.clone()))?;
            if !def.field_type.accepts(value) {
                return Err(StateError::TypeMismatch {
                    field: key.clone(),
                    expected: def.field_type,
                    found: json_kind(value).to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("name", FieldType::String, "")
            .field("tags", FieldType::Array, "")
            .field("meta", FieldType::Object, "")
    }

    #[test]
    fn test_state_schema_deserialize() {
        let yaml = r#"
            extracted_text:
              type: string
            missing_fields:
              type: array
              description: "Fields not found in the documents"
            rate_card:
              type: object
        "#;
        let schema: StateSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields["extracted_text"].field_type, FieldType::String);
        assert_eq!(schema.fields["missing_fields"].field_type, FieldType::Array);
        assert_eq!(
            schema.fields["missing_fields"].description,
            "Fields not found in the documents"
        );
    }

    #[test]
    fn test_validate_accepts_declared_fields_and_null() {
        let update = StateUpdate::new()
            .with("name", json!("acme"))
            .with("tags", json!(["a"]))
            .with("meta", json!(null));
        assert!(schema().validate(&update).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let update = StateUpdate::new().with("nope", json!(1));
        assert_eq!(
            schema().validate(&update),
            Err(StateError::UnknownField("nope".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let update = StateUpdate::new().with("tags", json!("a,b"));
        match schema().validate(&update) {
            Err(StateError::TypeMismatch {
                field,
                expected,
                found,
            }) => {
                assert_eq!(field, "tags");
                assert_eq!(expected, FieldType::Array);
                assert_eq!(found, "string");
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        let update = StateUpdate::new().with("whatever", json!({"x": 1}));
        assert!(StateSchema::new().validate(&update).is_ok());
    }
}
