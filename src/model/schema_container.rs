use crate::model::{generate_id, now_rfc3339, Id, SchemaChange, SchemaDefinition};
use serde::{Deserialize, Serialize};

/// A named schema family owning an append-only chain of versions.
/// `versions[i].version == i` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaContainer {
    pub id: Id,
    pub name: String,
    pub created_at: String,
    pub versions: Vec<SchemaContainerVersion>,
}

impl SchemaContainer {
    /// Create a container whose version 0 is `schema`
    pub fn new(name: String, schema: SchemaDefinition) -> Self {
        let id = generate_id();
        let initial = SchemaContainerVersion::new(id.clone(), 0, schema, Vec::new());
        Self {
            id,
            name,
            created_at: now_rfc3339(),
            versions: vec![initial],
        }
    }

    pub fn latest_version(&self) -> Option<&SchemaContainerVersion> {
        self.versions.last()
    }

    pub fn version(&self, version: u32) -> Option<&SchemaContainerVersion> {
        self.versions.get(version as usize)
    }

    /// The change chain leading from `version` to its successor, or `None`
    /// when `version` is the latest one
    pub fn next_changes(&self, version: u32) -> Option<&[SchemaChange]> {
        self.versions
            .get(version as usize + 1)
            .map(|next| next.changes.as_slice())
    }

    pub fn previous_version(&self, version: u32) -> Option<&SchemaContainerVersion> {
        version.checked_sub(1).and_then(|prev| self.version(prev))
    }
}

/// A sealed schema snapshot. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaContainerVersion {
    pub container_id: Id,
    pub version: u32,
    pub schema: SchemaDefinition,
    /// The change chain that produced this version from its predecessor.
    /// Empty for version 0.
    pub changes: Vec<SchemaChange>,
    pub fingerprint: String,
    pub created_at: String,
}

impl SchemaContainerVersion {
    pub fn new(
        container_id: Id,
        version: u32,
        schema: SchemaDefinition,
        changes: Vec<SchemaChange>,
    ) -> Self {
        let fingerprint = schema.fingerprint();
        Self {
            container_id,
            version,
            schema,
            changes,
            fingerprint,
            created_at: now_rfc3339(),
        }
    }

    pub fn reference(&self) -> SchemaVersionRef {
        SchemaVersionRef {
            container_id: self.container_id.clone(),
            version: self.version,
        }
    }
}

/// Identity of a schema container version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersionRef {
    pub container_id: Id,
    pub version: u32,
}

impl std::fmt::Display for SchemaVersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.container_id, self.version)
    }
}
