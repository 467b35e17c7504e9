//! Replays schema change chains.
//!
//! The mutator is a pure function of its inputs: the same base definition and
//! change chain always produce the same definition, byte for byte.

use crate::error::{ContentError, Result};
use crate::model::{
    ChangeKind, FieldSchema, FieldType, SchemaChange, SchemaContainer, SchemaContainerVersion,
    SchemaDefinition,
};

pub struct SchemaMutator;

impl SchemaMutator {
    /// Apply the change chain that follows `version` in its container and
    /// return the resulting definition. A latest version has no follow-up
    /// chain and yields its own definition.
    pub fn apply(container: &SchemaContainer, version: &SchemaContainerVersion) -> Result<SchemaDefinition> {
        match container.next_changes(version.version) {
            Some(changes) => Self::apply_changes(&version.schema, changes),
            None => Ok(version.schema.clone()),
        }
    }

    /// Apply `changes` in order to a working copy of `base`
    pub fn apply_changes(base: &SchemaDefinition, changes: &[SchemaChange]) -> Result<SchemaDefinition> {
        let mut schema = base.clone();
        for (position, change) in changes.iter().enumerate() {
            Self::apply_change(&mut schema, change).map_err(|message| {
                ContentError::Validation(format!(
                    "change #{} ({}): {}",
                    position + 1,
                    change.operation(),
                    message
                ))
            })?;
        }

        schema.check_structure().map_err(ContentError::Validation)?;
        Ok(schema)
    }

    /// The definition after each change of `changes`, in order. Only the last
    /// one is checked structurally; intermediate states may be transient.
    pub fn steps(base: &SchemaDefinition, changes: &[SchemaChange]) -> Result<Vec<SchemaDefinition>> {
        let mut schema = base.clone();
        let mut steps = Vec::with_capacity(changes.len());
        for (position, change) in changes.iter().enumerate() {
            Self::apply_change(&mut schema, change).map_err(|message| {
                ContentError::Validation(format!(
                    "change #{} ({}): {}",
                    position + 1,
                    change.operation(),
                    message
                ))
            })?;
            steps.push(schema.clone());
        }
        schema.check_structure().map_err(ContentError::Validation)?;
        Ok(steps)
    }

    /// Replay the whole chain from version 0 and return each resulting
    /// definition, index `i` being the definition of version `i`
    pub fn replay(container: &SchemaContainer) -> Result<Vec<SchemaDefinition>> {
        let Some(initial) = container.version(0) else {
            return Ok(Vec::new());
        };

        let mut definitions = vec![initial.schema.clone()];
        for next in container.versions.iter().skip(1) {
            let previous = definitions
                .last()
                .ok_or_else(|| ContentError::validation("empty replay"))?;
            let replayed = Self::apply_changes(previous, &next.changes)?;
            definitions.push(replayed);
        }
        Ok(definitions)
    }

    fn apply_change(schema: &mut SchemaDefinition, change: &SchemaChange) -> std::result::Result<(), String> {
        match &change.kind {
            ChangeKind::AddField { field, after } => {
                if schema.get_field(&field.name).is_some() {
                    return Err(format!("field '{}' already exists", field.name));
                }
                match after {
                    Some(after) => {
                        let position = schema
                            .field_position(after)
                            .ok_or_else(|| format!("field '{}' not found", after))?;
                        schema.fields.insert(position + 1, field.clone());
                    }
                    None => schema.fields.push(field.clone()),
                }
            }
            ChangeKind::RemoveField { field_name } => {
                let position = Self::require_field(schema, field_name)?;
                if schema.segment_field.as_deref() == Some(field_name.as_str()) {
                    return Err(format!("field '{}' is the segment field and cannot be removed", field_name));
                }
                if schema.display_field.as_deref() == Some(field_name.as_str()) {
                    return Err(format!("field '{}' is the display field and cannot be removed", field_name));
                }
                schema.fields.remove(position);
            }
            ChangeKind::RenameField {
                field_name,
                new_name,
            } => {
                let position = Self::require_field(schema, field_name)?;
                if schema.get_field(new_name).is_some() {
                    return Err(format!("field '{}' already exists", new_name));
                }
                schema.fields[position].name = new_name.clone();
                for reference in [&mut schema.display_field, &mut schema.segment_field] {
                    if reference.as_deref() == Some(field_name.as_str()) {
                        *reference = Some(new_name.clone());
                    }
                }
            }
            ChangeKind::UpdateFieldLabel { field_name, label } => {
                let position = Self::require_field(schema, field_name)?;
                schema.fields[position].label = Some(label.clone());
            }
            ChangeKind::FieldTypeChange {
                field_name,
                new_type,
                new_list_type,
            } => {
                let position = Self::require_field(schema, field_name)?;
                let replacement = Self::retype(&schema.fields[position], *new_type, *new_list_type)?;
                schema.fields[position] = replacement;
            }
            ChangeKind::UpdateSchema {
                display_field,
                segment_field,
                container,
            } => {
                if let Some(display_field) = display_field {
                    Self::require_field(schema, display_field)?;
                    schema.display_field = Some(display_field.clone());
                }
                if let Some(segment_field) = segment_field {
                    Self::require_field(schema, segment_field)?;
                    schema.segment_field = Some(segment_field.clone());
                }
                if let Some(container) = container {
                    schema.container = *container;
                }
            }
        }
        Ok(())
    }

    /// Field schema after a type change. Scalar changes keep every other
    /// attribute; a change to `list` yields a fresh list field carrying the
    /// name, label and required flag.
    fn retype(
        field: &FieldSchema,
        new_type: FieldType,
        new_list_type: Option<FieldType>,
    ) -> std::result::Result<FieldSchema, String> {
        if new_type == FieldType::List {
            let list_type = new_list_type
                .ok_or_else(|| format!("changing '{}' to list requires a list type", field.name))?;
            if list_type == FieldType::List {
                return Err(format!("field '{}' cannot become a list of lists", field.name));
            }
            return Ok(FieldSchema {
                name: field.name.clone(),
                field_type: FieldType::List,
                label: field.label.clone(),
                required: field.required,
                list_type: Some(list_type),
                extra: Default::default(),
            });
        }

        if new_list_type.is_some() {
            return Err(format!(
                "a list type is only allowed when changing '{}' to list",
                field.name
            ));
        }

        let mut retyped = field.clone();
        retyped.field_type = new_type;
        retyped.list_type = None;
        Ok(retyped)
    }

    fn require_field(schema: &SchemaDefinition, name: &str) -> std::result::Result<usize, String> {
        schema
            .field_position(name)
            .ok_or_else(|| format!("field '{}' not found", name))
    }
}
