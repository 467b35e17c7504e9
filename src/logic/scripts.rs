//! Migration script execution.
//!
//! Every schema change carries a migration script name. Changes without a
//! custom script use the engine's builtin script for their operation; custom
//! scripts are looked up by name in the engine's registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::logic::convert::convert_value;
use crate::model::{ChangeKind, FieldMap, SchemaChange, SchemaDefinition};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("unknown migration script '{0}'")]
    UnknownScript(String),

    #[error("migration script '{script}' failed: {message}")]
    Failed { script: String, message: String },
}

/// What a script is migrating: one change and the schemas around it
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    pub change: &'a SchemaChange,
    /// Definition before the change chain hop
    pub old_schema: &'a SchemaDefinition,
    /// Definition after the change chain hop
    pub new_schema: &'a SchemaDefinition,
}

/// Runs a named transformation against a container's field values
pub trait ScriptEngine: Send + Sync {
    fn execute(
        &self,
        script: &str,
        context: &ScriptContext<'_>,
        fields: FieldMap,
    ) -> Result<FieldMap, ScriptError>;
}

pub type ScriptFn =
    Arc<dyn Fn(&ScriptContext<'_>, FieldMap) -> Result<FieldMap, String> + Send + Sync>;

/// Engine executing the builtin default scripts plus custom scripts
/// registered as Rust closures
#[derive(Default)]
pub struct BuiltinScriptEngine {
    custom: RwLock<HashMap<String, ScriptFn>>,
}

impl BuiltinScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, script: F)
    where
        F: Fn(&ScriptContext<'_>, FieldMap) -> Result<FieldMap, String> + Send + Sync + 'static,
    {
        self.custom.write().insert(name.into(), Arc::new(script));
    }

    fn run_default(context: &ScriptContext<'_>, mut fields: FieldMap) -> FieldMap {
        match &context.change.kind {
            ChangeKind::RemoveField { field_name } => {
                fields.remove(field_name);
            }
            ChangeKind::RenameField {
                field_name,
                new_name,
            } => {
                if let Some(value) = fields.remove(field_name) {
                    fields.insert(new_name.clone(), value);
                }
            }
            ChangeKind::FieldTypeChange { field_name, .. } => {
                let schemas = (
                    context.old_schema.get_field(field_name),
                    context.new_schema.get_field(field_name),
                );
                if let Some(value) = fields.remove(field_name) {
                    if let (Some(from), Some(to)) = schemas {
                        if let Some(converted) = convert_value(&value, from, to) {
                            fields.insert(field_name.clone(), converted);
                        }
                    }
                }
            }
            ChangeKind::AddField { .. }
            | ChangeKind::UpdateFieldLabel { .. }
            | ChangeKind::UpdateSchema { .. } => {}
        }
        fields
    }
}

impl std::fmt::Debug for BuiltinScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.custom.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("BuiltinScriptEngine")
            .field("custom", &names)
            .finish()
    }
}

impl ScriptEngine for BuiltinScriptEngine {
    fn execute(
        &self,
        script: &str,
        context: &ScriptContext<'_>,
        fields: FieldMap,
    ) -> Result<FieldMap, ScriptError> {
        if script == context.change.auto_migration_script() {
            return Ok(Self::run_default(context, fields));
        }

        let custom = self.custom.read().get(script).cloned();
        match custom {
            Some(run) => run(context, fields).map_err(|message| ScriptError::Failed {
                script: script.to_string(),
                message,
            }),
            None => Err(ScriptError::UnknownScript(script.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SchemaMutator;
    use crate::model::{FieldSchema, FieldType};
    use serde_json::json;

    fn run(engine: &BuiltinScriptEngine, change: &SchemaChange, old: &SchemaDefinition, fields: FieldMap) -> Result<FieldMap, ScriptError> {
        let new = SchemaMutator::apply_changes(old, std::slice::from_ref(change)).unwrap();
        let context = ScriptContext {
            change,
            old_schema: old,
            new_schema: &new,
        };
        engine.execute(&change.migration_script(), &context, fields)
    }

    fn schema() -> SchemaDefinition {
        SchemaDefinition::new("content")
            .with_field(FieldSchema::new("name", FieldType::String))
            .with_field(FieldSchema::new("count", FieldType::String))
    }

    fn fields() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), json!("News"));
        fields.insert("count".to_string(), json!("12"));
        fields
    }

    #[test]
    fn test_default_scripts() {
        let engine = BuiltinScriptEngine::new();

        let retyped = run(&engine, &SchemaChange::change_field_type("count", FieldType::Number), &schema(), fields()).unwrap();
        assert_eq!(retyped.get("count"), Some(&json!(12)));

        let renamed = run(&engine, &SchemaChange::rename_field("name", "title"), &schema(), fields()).unwrap();
        assert_eq!(renamed.get("title"), Some(&json!("News")));
        assert!(!renamed.contains_key("name"));

        let removed = run(&engine, &SchemaChange::remove_field("count"), &schema(), fields()).unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn test_custom_scripts() {
        let engine = BuiltinScriptEngine::new();
        engine.register("uppercase", |_, mut fields| {
            if let Some(serde_json::Value::String(name)) = fields.get_mut("name") {
                *name = name.to_uppercase();
            }
            Ok(fields)
        });
        engine.register("explode", |_, _| Err("boom".to_string()));

        let change = SchemaChange::update_field_label("name", "Name").with_custom_migration_script("uppercase");
        let migrated = run(&engine, &change, &schema(), fields()).unwrap();
        assert_eq!(migrated.get("name"), Some(&json!("NEWS")));

        let failing = SchemaChange::update_field_label("name", "Name").with_custom_migration_script("explode");
        assert!(matches!(run(&engine, &failing, &schema(), fields()), Err(ScriptError::Failed { .. })));

        let unknown = SchemaChange::update_field_label("name", "Name").with_custom_migration_script("nope");
        assert_eq!(
            run(&engine, &unknown, &schema(), fields()).unwrap_err(),
            ScriptError::UnknownScript("nope".to_string())
        );
    }
}
