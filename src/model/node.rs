use crate::model::{generate_id, now_rfc3339, ContainerType, FieldMap, Id, SchemaVersionRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A tree entity. Its position in the tree is shared by every language and release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Id,
    pub project_id: Id,
    /// `None` only for the project's root node
    pub parent_id: Option<Id>,
    pub schema_container_id: Id,
    pub created_by: String,
    pub created_at: String,
}

impl Node {
    pub fn new(
        project_id: Id,
        parent_id: Option<Id>,
        schema_container_id: Id,
        created_by: String,
    ) -> Self {
        Self {
            id: generate_id(),
            project_id,
            parent_id,
            schema_container_id,
            created_by,
            created_at: now_rfc3339(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Edit-history version of a field container, rendered as `"major.minor"`.
/// Drafts bump the minor number; publishing produces the next major with minor 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerVersionTag {
    pub major: u32,
    pub minor: u32,
}

impl ContainerVersionTag {
    pub fn initial() -> Self {
        Self { major: 0, minor: 1 }
    }

    pub fn next_draft(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
        }
    }

    pub fn next_published(&self) -> Self {
        Self {
            major: self.major + 1,
            minor: 0,
        }
    }

    pub fn is_published(&self) -> bool {
        self.minor == 0
    }
}

impl fmt::Display for ContainerVersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ContainerVersionTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid version tag '{}'", s))?;
        Ok(Self {
            major: major
                .parse()
                .map_err(|_| format!("invalid major version in '{}'", s))?,
            minor: minor
                .parse()
                .map_err(|_| format!("invalid minor version in '{}'", s))?,
        })
    }
}

impl TryFrom<String> for ContainerVersionTag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContainerVersionTag> for String {
    fn from(tag: ContainerVersionTag) -> Self {
        tag.to_string()
    }
}

/// An immutable content snapshot of one node in one language, bound to one
/// schema version. Draft and published state are pointers to these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFieldContainer {
    pub id: Id,
    pub node_id: Id,
    pub language: String,
    pub schema_container_id: Id,
    pub schema_version: u32,
    pub fields: FieldMap,
    pub version: ContainerVersionTag,
    /// History link to the container this one superseded
    pub previous_id: Option<Id>,
    pub edited_by: String,
    pub edited_at: String,
}

impl NodeFieldContainer {
    pub fn new(
        node_id: Id,
        language: String,
        schema: SchemaVersionRef,
        fields: FieldMap,
        version: ContainerVersionTag,
        previous_id: Option<Id>,
        edited_by: String,
    ) -> Self {
        Self {
            id: generate_id(),
            node_id,
            language,
            schema_container_id: schema.container_id,
            schema_version: schema.version,
            fields,
            version,
            previous_id,
            edited_by,
            edited_at: now_rfc3339(),
        }
    }

    /// A successor of `self` carrying new field values
    pub fn successor(
        &self,
        schema: SchemaVersionRef,
        fields: FieldMap,
        version: ContainerVersionTag,
        edited_by: String,
    ) -> Self {
        Self::new(
            self.node_id.clone(),
            self.language.clone(),
            schema,
            fields,
            version,
            Some(self.id.clone()),
            edited_by,
        )
    }

    pub fn schema_ref(&self) -> SchemaVersionRef {
        SchemaVersionRef {
            container_id: self.schema_container_id.clone(),
            version: self.schema_version,
        }
    }

    /// The string a path segment is compared against, if the field is set.
    /// Binary fields contribute their file name.
    pub fn segment_value(&self, field_name: &str) -> Option<&str> {
        segment_value(&self.fields, field_name)
    }
}

pub fn segment_value<'a>(fields: &'a FieldMap, field_name: &str) -> Option<&'a str> {
    match fields.get(field_name)? {
        serde_json::Value::String(value) => Some(value.as_str()),
        serde_json::Value::Object(binary) => binary.get("fileName")?.as_str(),
        _ => None,
    }
}

/// A draft or published pointer of one (node, language, release)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPointer {
    pub node_id: Id,
    pub language: String,
    pub release_id: Id,
    pub container_type: ContainerType,
    pub container_id: Id,
    pub schema_container_id: Id,
    pub schema_version: u32,
}

/// Compare-and-swap instruction for a single pointer. `expected` is the
/// container the pointer must currently reference (`None`: unset); `new`
/// is what it references afterwards (`None`: removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerUpdate {
    pub node_id: Id,
    pub language: String,
    pub release_id: Id,
    pub container_type: ContainerType,
    pub expected: Option<Id>,
    pub new: Option<Id>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_tag_progression() {
        let first = ContainerVersionTag::initial();
        assert_eq!(first.to_string(), "0.1");
        assert_eq!(first.next_draft().to_string(), "0.2");
        let published = first.next_draft().next_published();
        assert_eq!(published.to_string(), "1.0");
        assert!(published.is_published());
        assert_eq!(published.next_draft().to_string(), "1.1");
        assert_eq!("2.15".parse::<ContainerVersionTag>().unwrap(), ContainerVersionTag { major: 2, minor: 15 });
        assert!("2".parse::<ContainerVersionTag>().is_err());
        assert_eq!(serde_json::to_value(published).unwrap(), json!("1.0"));
    }

    #[test]
    fn test_segment_value_of_binary_field() {
        let mut fields = FieldMap::new();
        fields.insert("binary".to_string(), json!({"fileName": "somefile.dat", "mimeType": "application/octet-stream"}));
        fields.insert("name".to_string(), json!("2015"));
        fields.insert("count".to_string(), json!(3));
        let container = NodeFieldContainer::new(
            "n1".to_string(),
            "en".to_string(),
            SchemaVersionRef { container_id: "s1".to_string(), version: 0 },
            fields,
            ContainerVersionTag::initial(),
            None,
            "admin".to_string(),
        );
        assert_eq!(container.segment_value("binary"), Some("somefile.dat"));
        assert_eq!(container.segment_value("name"), Some("2015"));
        assert_eq!(container.segment_value("count"), None);
        assert_eq!(container.segment_value("missing"), None);
    }
}
