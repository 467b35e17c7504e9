use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type Id = String;

/// Field values of a content container, keyed by field name.
/// A `BTreeMap` keeps serialization order stable across runs.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Data types a schema field can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Html,
    Number,
    Boolean,
    Date,
    Node,
    Micronode,
    Binary,
    List,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Html => "html",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Node => "node",
            FieldType::Micronode => "micronode",
            FieldType::Binary => "binary",
            FieldType::List => "list",
        }
    }

    /// Whether values of this type are stored as plain JSON strings
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Html)
    }

    /// Whether this type may be used as the segment field of a schema
    pub fn can_be_segment(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Html | FieldType::Binary)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            "html" => Ok(FieldType::Html),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "node" => Ok(FieldType::Node),
            "micronode" => Ok(FieldType::Micronode),
            "binary" => Ok(FieldType::Binary),
            "list" => Ok(FieldType::List),
            other => Err(format!("unknown field type '{}'", other)),
        }
    }
}

/// Draft/published dimension. Used both as the kind of a container pointer
/// and as the mode a lookup is performed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Draft,
    Published,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Draft => "draft",
            ContainerType::Published => "published",
        }
    }
}

impl Default for ContainerType {
    fn default() -> Self {
        ContainerType::Published
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContainerType::Draft),
            "published" => Ok(ContainerType::Published),
            other => Err(format!("unknown container type '{}'", other)),
        }
    }
}
