use crate::model::FieldType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Definition of a single field within a schema. An explicit null label,
/// required flag or list type reads as unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Element type, only meaningful when `field_type` is `List`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_type: Option<FieldType>,
    /// Type specific attributes (allowed values, allowed schemas, ...) carried as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            label: None,
            required: None,
            list_type: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn list(name: impl Into<String>, list_type: FieldType) -> Self {
        Self {
            list_type: Some(list_type),
            ..Self::new(name, FieldType::List)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }
}

/// The shape of content bound to one schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_field: Option<String>,
    /// Whether nodes of this schema may have children
    #[serde(default)]
    pub container: bool,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            display_field: None,
            segment_field: None,
            container: false,
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_display_field(mut self, name: impl Into<String>) -> Self {
        self.display_field = Some(name.into());
        self
    }

    pub fn with_segment_field(mut self, name: impl Into<String>) -> Self {
        self.segment_field = Some(name.into());
        self
    }

    pub fn with_container(mut self, container: bool) -> Self {
        self.container = container;
        self
    }

    /// Find a field definition by name
    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn segment_field_schema(&self) -> Option<&FieldSchema> {
        self.segment_field
            .as_deref()
            .and_then(|name| self.get_field(name))
    }

    pub fn has_binary_field(&self) -> bool {
        self.fields
            .iter()
            .any(|field| field.field_type == FieldType::Binary)
    }

    /// Structural checks every persisted definition has to pass
    pub fn check_structure(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err("field names must not be empty".to_string());
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field '{}'", field.name));
            }
            match (field.field_type, field.list_type) {
                (FieldType::List, None) => {
                    return Err(format!("list field '{}' has no list type", field.name))
                }
                (FieldType::List, Some(FieldType::List)) => {
                    return Err(format!("list field '{}' cannot contain lists", field.name))
                }
                (other, Some(_)) if other != FieldType::List => {
                    return Err(format!(
                        "field '{}' of type {} cannot declare a list type",
                        field.name, other
                    ))
                }
                _ => {}
            }
        }

        if let Some(display) = &self.display_field {
            if self.get_field(display).is_none() {
                return Err(format!("display field '{}' is not defined", display));
            }
        }

        if let Some(segment) = &self.segment_field {
            let field = self
                .get_field(segment)
                .ok_or_else(|| format!("segment field '{}' is not defined", segment))?;
            if !field.field_type.can_be_segment() {
                return Err(format!(
                    "segment field '{}' must be of type string, html or binary, not {}",
                    segment, field.field_type
                ));
            }
        }

        Ok(())
    }

    /// SHA-256 over the canonical JSON form. Two definitions with the same
    /// fingerprint serialize to the same bytes.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}
