//! Field Schema
//!
//! The static description of every piece of information the assistant has to
//! collect. It is loaded once at startup from a `{"fields": [...]}` document
//! and shared read-only by the voice relay and the chat agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading the field schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse schema document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Field '{field}' declares unknown type '{declared}'")]
    UnknownType { field: String, declared: String },
    #[error("Field '{0}' is declared more than once")]
    DuplicateField(String),
}

/// The primitive JSON-schema types a field may be collected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldType {
    /// Parses a declared type name. Returns `None` for anything unrecognised.
    pub fn parse(declared: &str) -> Option<Self> {
        match declared {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// The JSON-schema type keyword.
    pub fn as_json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

/// One piece of information to collect from the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// The type exactly as declared in the document.
    #[serde(rename = "type")]
    pub declared_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: &str, declared_type: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            prompt: Some(prompt.to_string()),
        }
    }

    /// The resolved type. Unrecognised declarations collapse to `String`.
    pub fn field_type(&self) -> FieldType {
        FieldType::parse(&self.declared_type).unwrap_or(FieldType::String)
    }

    /// The prompt text, or a generic one derived from the field name.
    pub fn prompt_text(&self) -> String {
        self.prompt
            .clone()
            .unwrap_or_else(|| format!("The user's {}", self.name))
    }
}

/// The ordered list of fields, as read from the schema document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldSchema {
    pub fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// Reads and validates the schema document at `path`.
    ///
    /// With `strict` set, a field declaring an unknown type is rejected;
    /// otherwise it is accepted and later compiled as a string.
    pub fn load(path: &Path, strict: bool) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path)?;
        let schema = Self::from_json(&raw, strict)?;
        info!(path = %path.display(), fields = schema.fields.len(), "Field schema loaded");
        Ok(schema)
    }

    /// Parses and validates a schema document held in memory.
    pub fn from_json(raw: &str, strict: bool) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(raw)?;
        schema.validate(strict)?;
        Ok(schema)
    }

    fn validate(&self, strict: bool) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if FieldType::parse(&field.declared_type).is_none() {
                if strict {
                    return Err(SchemaError::UnknownType {
                        field: field.name.clone(),
                        declared: field.declared_type.clone(),
                    });
                }
                warn!(
                    field = %field.name,
                    declared = %field.declared_type,
                    "Unknown field type, collecting as string"
                );
            }
        }
        Ok(())
    }

    /// Field names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Declared fields that have no entry in `data`.
    pub fn missing_fields<'a>(&'a self, data: &Map<String, Value>) -> Vec<&'a str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| data.get(*name).is_none_or(Value::is_null))
            .collect()
    }

    /// Parses a client-supplied schema echo. Returns `None` unless it carries
    /// a usable `fields` list.
    pub fn from_echo(echo: &Value) -> Option<Self> {
        let schema: Self = serde_json::from_value(echo.clone()).ok()?;
        if schema.fields.is_empty() || schema.validate(false).is_err() {
            return None;
        }
        Some(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const DOC: &str = r#"{
        "fields": [
            {"name": "name", "type": "string", "prompt": "What is your name?"},
            {"name": "age", "type": "integer", "prompt": "How old are you?"},
            {"name": "subscribed", "type": "boolean"}
        ]
    }"#;

    #[test]
    fn test_parse_document_keeps_order() {
        let schema = FieldSchema::from_json(DOC, true).unwrap();
        assert_eq!(schema.names(), vec!["name", "age", "subscribed"]);
        assert_eq!(schema.fields[1].field_type(), FieldType::Integer);
    }

    #[test]
    fn test_missing_prompt_gets_default_text() {
        let schema = FieldSchema::from_json(DOC, true).unwrap();
        assert_eq!(schema.fields[2].prompt_text(), "The user's subscribed");
        assert_eq!(schema.fields[0].prompt_text(), "What is your name?");
    }

    #[test]
    fn test_unknown_type_falls_back_when_lenient() {
        let raw = r#"{"fields": [{"name": "dob", "type": "date"}]}"#;
        let schema = FieldSchema::from_json(raw, false).unwrap();
        assert_eq!(schema.fields[0].field_type(), FieldType::String);
    }

    #[test]
    fn test_unknown_type_rejected_when_strict() {
        let raw = r#"{"fields": [{"name": "dob", "type": "date"}]}"#;
        match FieldSchema::from_json(raw, true).unwrap_err() {
            SchemaError::UnknownType { field, declared } => {
                assert_eq!(field, "dob");
                assert_eq!(declared, "date");
            }
            other => panic!("Expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let raw = r#"{"fields": [
            {"name": "email", "type": "string"},
            {"name": "email", "type": "string"}
        ]}"#;
        assert!(matches!(
            FieldSchema::from_json(raw, false),
            Err(SchemaError::DuplicateField(name)) if name == "email"
        ));
    }

    #[test]
    fn test_missing_fields_treats_null_as_missing() {
        let schema = FieldSchema::from_json(DOC, true).unwrap();
        let data = json!({"name": "Ana", "age": null});
        let missing = schema.missing_fields(data.as_object().unwrap());
        assert_eq!(missing, vec!["age", "subscribed"]);
    }

    #[test]
    fn test_from_echo_requires_fields() {
        assert!(FieldSchema::from_echo(&json!({})).is_none());
        assert!(FieldSchema::from_echo(&json!({"fields": []})).is_none());

        let echo = json!({"fields": [{"name": "city", "type": "string"}]});
        let schema = FieldSchema::from_echo(&echo).unwrap();
        assert_eq!(schema.names(), vec!["city"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let schema = FieldSchema::load(file.path(), true).unwrap();
        assert_eq!(schema.fields.len(), 3);

        let missing = FieldSchema::load(Path::new("/definitely/not/here.json"), false);
        assert!(matches!(missing, Err(SchemaError::Io(_))));
    }
}
