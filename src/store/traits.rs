use crate::model::{
    ContainerPointer, ContainerType, Id, Node, NodeFieldContainer, PointerUpdate, Project, Release,
    SchemaContainer, SchemaContainerVersion,
};
use anyhow::Result;

/// Transient write conflict reported by a store. Callers retry the whole
/// read-modify-write cycle; it travels inside `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("write conflict on {0}")]
pub struct WriteConflict(pub String);

impl WriteConflict {
    pub fn error(target: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(WriteConflict(target.into()))
    }
}

#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>>;
    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>>;
    /// Persist a project together with its root node and initial release in one step
    async fn insert_project(&self, project: Project, root: Node, initial_release: Release) -> Result<()>;
    /// Releases of a project in creation order
    async fn list_releases(&self, project_id: &Id) -> Result<Vec<Release>>;
    async fn get_release(&self, project_id: &Id, release_id: &Id) -> Result<Option<Release>>;
    async fn get_latest_release(&self, project_id: &Id) -> Result<Option<Release>>;
    /// Persist a release derived from its parent. The new release becomes the
    /// latest one and starts with a copy of every pointer of the parent.
    /// Fails with `WriteConflict` if the parent is no longer the latest release.
    async fn insert_release(&self, release: Release) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SchemaStore: Send + Sync {
    async fn get_schema_container(&self, id: &Id) -> Result<Option<SchemaContainer>>;
    async fn find_schema_container_by_name(&self, name: &str) -> Result<Option<SchemaContainer>>;
    async fn list_schema_containers(&self) -> Result<Vec<SchemaContainer>>;
    async fn insert_schema_container(&self, container: SchemaContainer) -> Result<()>;
    /// Append `version` to its container. Fails with `WriteConflict` when the
    /// container's latest version is not `expected_latest` anymore.
    async fn append_schema_version(&self, expected_latest: u32, version: SchemaContainerVersion) -> Result<()>;
}

#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_node(&self, id: &Id) -> Result<Option<Node>>;
    async fn insert_node(&self, node: Node) -> Result<()>;
    /// Children of a node ordered by id
    async fn list_children(&self, parent_id: &Id) -> Result<Vec<Node>>;
    async fn get_field_container(&self, id: &Id) -> Result<Option<NodeFieldContainer>>;
    async fn get_container_pointer(
        &self,
        node_id: &Id,
        language: &str,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Option<Id>>;
    /// The containers a node's pointers of `container_type` reference in a
    /// release, one per language, ordered by language tag. Read as one snapshot.
    async fn list_containers(
        &self,
        node_id: &Id,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Vec<NodeFieldContainer>>;
    /// Every pointer of a release referencing a container bound to the given schema version
    async fn list_pointers_for_version(
        &self,
        schema_container_id: &Id,
        schema_version: u32,
        release_id: &Id,
    ) -> Result<Vec<ContainerPointer>>;
    /// Insert new containers and apply pointer updates atomically. If any
    /// update's `expected` does not match the current pointer nothing is
    /// written and a `WriteConflict` is returned.
    async fn commit_containers(
        &self,
        containers: Vec<NodeFieldContainer>,
        updates: Vec<PointerUpdate>,
    ) -> Result<()>;
}

pub trait Store: ProjectStore + SchemaStore + NodeStore + Send + Sync {}
