use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContentError, Result};
use crate::model::{FieldMap, FieldSchema, FieldType, SchemaDefinition};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: ValidationIssueType,
    pub field_name: String,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationIssueType {
    TypeMismatch,
    MissingRequiredField,
    UndefinedField,
}

/// Whether values for fields the schema does not define are rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    #[default]
    Strict,
    Lenient,
}

pub struct FieldValidator;

impl FieldValidator {
    /// Check field values against a schema definition
    pub fn validate(schema: &SchemaDefinition, fields: &FieldMap, mode: ValidationMode) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for field in &schema.fields {
            match fields.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.is_required() {
                        errors.push(ValidationIssue {
                            issue_type: ValidationIssueType::MissingRequiredField,
                            field_name: field.name.clone(),
                            message: format!("Required field '{}' is missing", field.name),
                            expected: Some(type_label(field)),
                            actual: None,
                        });
                    }
                }
                Some(value) => {
                    if !value_matches(field, value) {
                        errors.push(ValidationIssue {
                            issue_type: ValidationIssueType::TypeMismatch,
                            field_name: field.name.clone(),
                            message: format!("Field '{}' does not hold a {} value", field.name, type_label(field)),
                            expected: Some(type_label(field)),
                            actual: Some(json_kind(value).to_string()),
                        });
                    }
                }
            }
        }

        for name in fields.keys().filter(|name| schema.get_field(name).is_none()) {
            let issue = ValidationIssue {
                issue_type: ValidationIssueType::UndefinedField,
                field_name: name.clone(),
                message: format!("Field '{}' is not defined in schema '{}'", name, schema.name),
                expected: None,
                actual: None,
            };
            match mode {
                ValidationMode::Strict => errors.push(issue),
                ValidationMode::Lenient => warnings.push(issue),
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Like `validate` but folds every error into one `ContentError::Validation`
    pub fn ensure_valid(schema: &SchemaDefinition, fields: &FieldMap, mode: ValidationMode) -> Result<()> {
        let result = Self::validate(schema, fields, mode);
        if result.valid {
            return Ok(());
        }
        let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
        Err(ContentError::validation(messages.join("; ")))
    }
}

fn type_label(field: &FieldSchema) -> String {
    match (field.field_type, field.list_type) {
        (FieldType::List, Some(element)) => format!("list<{}>", element),
        (other, _) => other.to_string(),
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

fn value_matches(field: &FieldSchema, value: &Value) -> bool {
    match field.field_type {
        FieldType::List => match (value, field.list_type) {
            (Value::Array(items), Some(element)) => items.iter().all(|item| scalar_matches(element, item)),
            _ => false,
        },
        other => scalar_matches(other, value),
    }
}

fn scalar_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String | FieldType::Html => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        // node references are stored as an id or as {"uuid": ...}
        FieldType::Node => value.is_string() || value.get("uuid").map(Value::is_string).unwrap_or(false),
        FieldType::Micronode | FieldType::Binary => value.is_object(),
        FieldType::List => false,
    }
}
