//! Schema change records and their wire representation.
//!
//! On the wire a change is a flat property bag (`SchemaChangeModel`). Inside
//! the engine it is a `SchemaChange`: one typed `ChangeKind` per operation plus
//! a passthrough map holding every property the operation does not recognize,
//! so `SchemaChange::from_wire(dto)?.to_wire() == dto`.
//!
//! Null and absent are the same for `migrationScript` and for the optional
//! attributes of a field definition (`label`, `required`, `listType`): an
//! explicit null is read as absent and not written back. Any other null
//! property is kept as a passthrough value.

use crate::model::{FieldSchema, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const FIELD_NAME_KEY: &str = "fieldName";
pub const TYPE_KEY: &str = "type";
pub const LIST_TYPE_KEY: &str = "listType";
pub const LABEL_KEY: &str = "label";
pub const NEW_FIELD_NAME_KEY: &str = "newFieldName";
pub const FIELD_KEY: &str = "field";
pub const AFTER_KEY: &str = "after";
pub const DISPLAY_FIELD_KEY: &str = "displayField";
pub const SEGMENT_FIELD_KEY: &str = "segmentField";
pub const CONTAINER_KEY: &str = "container";

/// Prefix of migration scripts provided by the engine itself
pub const BUILTIN_SCRIPT_PREFIX: &str = "builtin:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    #[serde(rename = "ADDFIELD")]
    AddField,
    #[serde(rename = "REMOVEFIELD")]
    RemoveField,
    #[serde(rename = "RENAMEFIELD")]
    RenameField,
    #[serde(rename = "UPDATEFIELD")]
    UpdateFieldLabel,
    #[serde(rename = "CHANGEFIELDTYPE")]
    FieldTypeChange,
    #[serde(rename = "UPDATESCHEMA")]
    UpdateSchema,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::AddField => "ADDFIELD",
            ChangeOperation::RemoveField => "REMOVEFIELD",
            ChangeOperation::RenameField => "RENAMEFIELD",
            ChangeOperation::UpdateFieldLabel => "UPDATEFIELD",
            ChangeOperation::FieldTypeChange => "CHANGEFIELDTYPE",
            ChangeOperation::UpdateSchema => "UPDATESCHEMA",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire DTO of a schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChangeModel {
    pub operation: ChangeOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_script: Option<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl SchemaChangeModel {
    pub fn new(operation: ChangeOperation) -> Self {
        Self {
            operation,
            migration_script: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn create_change_field_type_change(field_name: &str, new_type: &str) -> Self {
        Self::new(ChangeOperation::FieldTypeChange)
            .with_property(FIELD_NAME_KEY, Value::String(field_name.to_string()))
            .with_property(TYPE_KEY, Value::String(new_type.to_string()))
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn with_migration_script(mut self, script: impl Into<String>) -> Self {
        self.migration_script = Some(script.into());
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// The typed payload of a schema change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    AddField {
        field: FieldSchema,
        after: Option<String>,
    },
    RemoveField {
        field_name: String,
    },
    RenameField {
        field_name: String,
        new_name: String,
    },
    UpdateFieldLabel {
        field_name: String,
        label: String,
    },
    FieldTypeChange {
        field_name: String,
        new_type: FieldType,
        new_list_type: Option<FieldType>,
    },
    UpdateSchema {
        display_field: Option<String>,
        segment_field: Option<String>,
        container: Option<bool>,
    },
}

impl ChangeKind {
    pub fn operation(&self) -> ChangeOperation {
        match self {
            ChangeKind::AddField { .. } => ChangeOperation::AddField,
            ChangeKind::RemoveField { .. } => ChangeOperation::RemoveField,
            ChangeKind::RenameField { .. } => ChangeOperation::RenameField,
            ChangeKind::UpdateFieldLabel { .. } => ChangeOperation::UpdateFieldLabel,
            ChangeKind::FieldTypeChange { .. } => ChangeOperation::FieldTypeChange,
            ChangeKind::UpdateSchema { .. } => ChangeOperation::UpdateSchema,
        }
    }

    /// Name of the field the change operates on, if it targets a single field
    pub fn field_name(&self) -> Option<&str> {
        match self {
            ChangeKind::AddField { field, .. } => Some(&field.name),
            ChangeKind::RemoveField { field_name }
            | ChangeKind::RenameField { field_name, .. }
            | ChangeKind::UpdateFieldLabel { field_name, .. }
            | ChangeKind::FieldTypeChange { field_name, .. } => Some(field_name),
            ChangeKind::UpdateSchema { .. } => None,
        }
    }
}

/// A single atomic change in a schema version's change chain
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
    pub kind: ChangeKind,
    pub custom_migration_script: Option<String>,
    /// Properties the operation does not interpret, kept for forward compatibility
    pub extra: BTreeMap<String, Value>,
}

impl SchemaChange {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            custom_migration_script: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn add_field(field: FieldSchema) -> Self {
        Self::new(ChangeKind::AddField { field, after: None })
    }

    pub fn remove_field(field_name: impl Into<String>) -> Self {
        Self::new(ChangeKind::RemoveField {
            field_name: field_name.into(),
        })
    }

    pub fn rename_field(field_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::new(ChangeKind::RenameField {
            field_name: field_name.into(),
            new_name: new_name.into(),
        })
    }

    pub fn update_field_label(field_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(ChangeKind::UpdateFieldLabel {
            field_name: field_name.into(),
            label: label.into(),
        })
    }

    pub fn change_field_type(field_name: impl Into<String>, new_type: FieldType) -> Self {
        Self::new(ChangeKind::FieldTypeChange {
            field_name: field_name.into(),
            new_type,
            new_list_type: None,
        })
    }

    pub fn change_field_to_list(field_name: impl Into<String>, list_type: FieldType) -> Self {
        Self::new(ChangeKind::FieldTypeChange {
            field_name: field_name.into(),
            new_type: FieldType::List,
            new_list_type: Some(list_type),
        })
    }

    pub fn update_schema(
        display_field: Option<String>,
        segment_field: Option<String>,
        container: Option<bool>,
    ) -> Self {
        Self::new(ChangeKind::UpdateSchema {
            display_field,
            segment_field,
            container,
        })
    }

    pub fn with_custom_migration_script(mut self, script: impl Into<String>) -> Self {
        self.custom_migration_script = Some(script.into());
        self
    }

    pub fn operation(&self) -> ChangeOperation {
        self.kind.operation()
    }

    /// The script the engine derives for this change when no custom one is set
    pub fn auto_migration_script(&self) -> String {
        let operation = self.operation().as_str().to_lowercase();
        match &self.kind {
            ChangeKind::FieldTypeChange {
                new_type: FieldType::List,
                new_list_type: Some(list_type),
                ..
            } => format!("{}{}:list<{}>", BUILTIN_SCRIPT_PREFIX, operation, list_type),
            ChangeKind::FieldTypeChange { new_type, .. } => {
                format!("{}{}:{}", BUILTIN_SCRIPT_PREFIX, operation, new_type)
            }
            _ => format!("{}{}", BUILTIN_SCRIPT_PREFIX, operation),
        }
    }

    /// The custom script if one was set, the automatic one otherwise
    pub fn migration_script(&self) -> String {
        self.custom_migration_script
            .clone()
            .unwrap_or_else(|| self.auto_migration_script())
    }

    /// Parse a wire DTO. Properties the operation recognizes are consumed into
    /// the typed kind; everything else lands in `extra`.
    pub fn from_wire(model: &SchemaChangeModel) -> Result<Self, String> {
        let mut properties = model.properties.clone();
        let kind = match model.operation {
            ChangeOperation::AddField => {
                let raw = properties
                    .remove(FIELD_KEY)
                    .ok_or_else(|| format!("{} requires '{}'", model.operation, FIELD_KEY))?;
                let field: FieldSchema = serde_json::from_value(raw)
                    .map_err(|e| format!("invalid field definition: {}", e))?;
                let after = take_string(&mut properties, AFTER_KEY)?;
                ChangeKind::AddField { field, after }
            }
            ChangeOperation::RemoveField => ChangeKind::RemoveField {
                field_name: require_string(&mut properties, FIELD_NAME_KEY, model.operation)?,
            },
            ChangeOperation::RenameField => ChangeKind::RenameField {
                field_name: require_string(&mut properties, FIELD_NAME_KEY, model.operation)?,
                new_name: require_string(&mut properties, NEW_FIELD_NAME_KEY, model.operation)?,
            },
            ChangeOperation::UpdateFieldLabel => ChangeKind::UpdateFieldLabel {
                field_name: require_string(&mut properties, FIELD_NAME_KEY, model.operation)?,
                label: require_string(&mut properties, LABEL_KEY, model.operation)?,
            },
            ChangeOperation::FieldTypeChange => {
                let field_name = require_string(&mut properties, FIELD_NAME_KEY, model.operation)?;
                let new_type = require_string(&mut properties, TYPE_KEY, model.operation)?
                    .parse::<FieldType>()?;
                let new_list_type = take_string(&mut properties, LIST_TYPE_KEY)?
                    .map(|raw| raw.parse::<FieldType>())
                    .transpose()?;
                ChangeKind::FieldTypeChange {
                    field_name,
                    new_type,
                    new_list_type,
                }
            }
            ChangeOperation::UpdateSchema => ChangeKind::UpdateSchema {
                display_field: take_string(&mut properties, DISPLAY_FIELD_KEY)?,
                segment_field: take_string(&mut properties, SEGMENT_FIELD_KEY)?,
                container: take_bool(&mut properties, CONTAINER_KEY)?,
            },
        };

        Ok(Self {
            kind,
            custom_migration_script: model.migration_script.clone(),
            extra: properties,
        })
    }

    pub fn to_wire(&self) -> SchemaChangeModel {
        let mut properties = self.extra.clone();
        let mut put = |key: &str, value: Value| {
            properties.insert(key.to_string(), value);
        };

        match &self.kind {
            ChangeKind::AddField { field, after } => {
                put(
                    FIELD_KEY,
                    serde_json::to_value(field).unwrap_or(Value::Object(Map::new())),
                );
                if let Some(after) = after {
                    put(AFTER_KEY, Value::String(after.clone()));
                }
            }
            ChangeKind::RemoveField { field_name } => {
                put(FIELD_NAME_KEY, Value::String(field_name.clone()));
            }
            ChangeKind::RenameField {
                field_name,
                new_name,
            } => {
                put(FIELD_NAME_KEY, Value::String(field_name.clone()));
                put(NEW_FIELD_NAME_KEY, Value::String(new_name.clone()));
            }
            ChangeKind::UpdateFieldLabel { field_name, label } => {
                put(FIELD_NAME_KEY, Value::String(field_name.clone()));
                put(LABEL_KEY, Value::String(label.clone()));
            }
            ChangeKind::FieldTypeChange {
                field_name,
                new_type,
                new_list_type,
            } => {
                put(FIELD_NAME_KEY, Value::String(field_name.clone()));
                put(TYPE_KEY, Value::String(new_type.to_string()));
                if let Some(list_type) = new_list_type {
                    put(LIST_TYPE_KEY, Value::String(list_type.to_string()));
                }
            }
            ChangeKind::UpdateSchema {
                display_field,
                segment_field,
                container,
            } => {
                if let Some(display_field) = display_field {
                    put(DISPLAY_FIELD_KEY, Value::String(display_field.clone()));
                }
                if let Some(segment_field) = segment_field {
                    put(SEGMENT_FIELD_KEY, Value::String(segment_field.clone()));
                }
                if let Some(container) = container {
                    put(CONTAINER_KEY, Value::Bool(*container));
                }
            }
        }

        SchemaChangeModel {
            operation: self.operation(),
            migration_script: self.custom_migration_script.clone(),
            properties,
        }
    }
}

impl Serialize for SchemaChange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SchemaChange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let model = SchemaChangeModel::deserialize(deserializer)?;
        SchemaChange::from_wire(&model).map_err(serde::de::Error::custom)
    }
}

/// Remove a string property. Values that are not strings stay in the map
/// untouched so they survive as passthrough properties.
fn take_string(properties: &mut BTreeMap<String, Value>, key: &str) -> Result<Option<String>, String> {
    match properties.get(key) {
        Some(Value::String(_)) => match properties.remove(key) {
            Some(Value::String(value)) => Ok(Some(value)),
            _ => Ok(None),
        },
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(format!("property '{}' must be a string, got {}", key, other)),
    }
}

/// Remove a boolean property, with the same null handling as `take_string`
fn take_bool(properties: &mut BTreeMap<String, Value>, key: &str) -> Result<Option<bool>, String> {
    match properties.get(key) {
        Some(Value::Bool(flag)) => {
            let flag = *flag;
            properties.remove(key);
            Ok(Some(flag))
        }
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(format!("property '{}' must be a boolean, got {}", key, other)),
    }
}

fn require_string(
    properties: &mut BTreeMap<String, Value>,
    key: &str,
    operation: ChangeOperation,
) -> Result<String, String> {
    take_string(properties, key)?.ok_or_else(|| format!("{} requires '{}'", operation, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_from_wire() {
        let model = SchemaChangeModel::create_change_field_type_change("testField", "list")
            .with_migration_script("test")
            .with_property(LIST_TYPE_KEY, json!("html"));

        let change = SchemaChange::from_wire(&model).unwrap();
        assert_eq!(change.migration_script(), "test");
        assert_eq!(change.kind.field_name(), Some("testField"));
        match &change.kind {
            ChangeKind::FieldTypeChange {
                new_type,
                new_list_type,
                ..
            } => {
                assert_eq!(*new_type, FieldType::List);
                assert_eq!(*new_list_type, Some(FieldType::Html));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_transform_to_wire() {
        let change = SchemaChange::change_field_to_list("test", FieldType::Html)
            .with_custom_migration_script("script");
        let model = change.to_wire();
        assert_eq!(model.get_property(LIST_TYPE_KEY), Some(&json!("html")));
        assert_eq!(model.get_property(TYPE_KEY), Some(&json!("list")));
        assert_eq!(model.migration_script.as_deref(), Some("script"));
    }

    #[test]
    fn test_wire_round_trip_keeps_passthrough_properties() {
        let dtos = vec![
            json!({
                "operation": "CHANGEFIELDTYPE",
                "fieldName": "stringField",
                "type": "list",
                "listType": "html",
                "migrationScript": "custom",
                "futureFlag": {"nested": [1, 2]},
                "label": "kept although unused by this operation"
            }),
            json!({
                "operation": "ADDFIELD",
                "field": {"name": "teaser", "type": "html", "required": false},
                "after": "name",
                "order": 3
            }),
            json!({
                "operation": "UPDATESCHEMA",
                "segmentField": "filename",
                "container": false,
                "displayField": null
            }),
            json!({"operation": "RENAMEFIELD", "fieldName": "a", "newFieldName": "b"}),
        ];

        for dto in dtos {
            let model: SchemaChangeModel = serde_json::from_value(dto.clone()).unwrap();
            let change = SchemaChange::from_wire(&model).unwrap();
            assert_eq!(change.to_wire(), model);
            assert_eq!(serde_json::to_value(change.to_wire()).unwrap(), dto);
        }
    }

    #[test]
    fn test_null_script_and_field_attributes_read_as_absent() {
        let dtos = vec![
            (
                json!({"operation": "CHANGEFIELDTYPE", "fieldName": "a", "type": "html", "migrationScript": null}),
                json!({"operation": "CHANGEFIELDTYPE", "fieldName": "a", "type": "html"}),
            ),
            (
                json!({"operation": "ADDFIELD", "field": {"name": "teaser", "type": "html", "label": null}}),
                json!({"operation": "ADDFIELD", "field": {"name": "teaser", "type": "html"}}),
            ),
        ];

        for (dto, written) in dtos {
            let change: SchemaChange = serde_json::from_value(dto).unwrap();
            let canonical: SchemaChange = serde_json::from_value(written.clone()).unwrap();
            assert_eq!(change, canonical);
            assert_eq!(serde_json::to_value(&change).unwrap(), written);
        }
    }

    #[test]
    fn test_malformed_container_flag_is_rejected() {
        for value in [json!("yes"), json!(1), json!({"flag": true})] {
            let model = SchemaChangeModel::new(ChangeOperation::UpdateSchema).with_property(CONTAINER_KEY, value);
            assert!(SchemaChange::from_wire(&model).unwrap_err().contains("must be a boolean"));
        }

        let unset = SchemaChangeModel::new(ChangeOperation::UpdateSchema).with_property(CONTAINER_KEY, Value::Null);
        let change = SchemaChange::from_wire(&unset).unwrap();
        assert!(matches!(change.kind, ChangeKind::UpdateSchema { container: None, .. }));
        assert_eq!(change.to_wire(), unset);
    }

    #[test]
    fn test_migration_script_is_never_empty() {
        let change = SchemaChange::change_field_type("name", FieldType::Html);
        assert_eq!(change.auto_migration_script(), "builtin:changefieldtype:html");
        assert_eq!(change.migration_script(), change.auto_migration_script());

        let to_list = SchemaChange::change_field_to_list("name", FieldType::Number);
        assert_eq!(to_list.migration_script(), "builtin:changefieldtype:list<number>");

        let custom = to_list.with_custom_migration_script("test");
        assert_eq!(custom.migration_script(), "test");
        assert!(!SchemaChange::remove_field("x").migration_script().is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let model = SchemaChangeModel::create_change_field_type_change("f", "hypertext");
        assert!(SchemaChange::from_wire(&model).is_err());
    }
}
