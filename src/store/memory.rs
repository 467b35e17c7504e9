use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::{
    ContainerPointer, ContainerType, Id, Node, NodeFieldContainer, PointerUpdate, Project, Release,
    SchemaContainer, SchemaContainerVersion,
};
use crate::store::traits::{NodeStore, ProjectStore, SchemaStore, Store, WriteConflict};

/// (node, release, container type) -> language -> container id
type PointerKey = (Id, Id, ContainerType);
/// (schema container, schema version, release) -> {(node, language, container type)}
type VersionKey = (Id, u32, Id);
type VersionEntry = (Id, String, ContainerType);

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<Id, Project>,
    /// Releases per project in creation order
    releases: HashMap<Id, Vec<Release>>,
    schemas: HashMap<Id, SchemaContainer>,
    nodes: HashMap<Id, Node>,
    children: HashMap<Id, BTreeSet<Id>>,
    containers: HashMap<Id, NodeFieldContainer>,
    pointers: HashMap<PointerKey, BTreeMap<String, Id>>,
    version_index: HashMap<VersionKey, BTreeSet<VersionEntry>>,
}

impl Inner {
    fn pointer(&self, node_id: &Id, language: &str, release_id: &Id, container_type: ContainerType) -> Option<&Id> {
        self.pointers
            .get(&(node_id.clone(), release_id.clone(), container_type))
            .and_then(|languages| languages.get(language))
    }

    fn index_key(&self, container_id: &Id, release_id: &Id) -> Option<VersionKey> {
        self.containers.get(container_id).map(|container| {
            (
                container.schema_container_id.clone(),
                container.schema_version,
                release_id.clone(),
            )
        })
    }

    fn set_pointer(
        &mut self,
        node_id: &Id,
        language: &str,
        release_id: &Id,
        container_type: ContainerType,
        new: Option<Id>,
    ) {
        let key = (node_id.clone(), release_id.clone(), container_type);
        let entry = (node_id.clone(), language.to_string(), container_type);

        let previous = self
            .pointers
            .get(&key)
            .and_then(|languages| languages.get(language))
            .cloned();
        if let Some(previous) = previous {
            if let Some(index_key) = self.index_key(&previous, release_id) {
                if let Some(entries) = self.version_index.get_mut(&index_key) {
                    entries.remove(&entry);
                    if entries.is_empty() {
                        self.version_index.remove(&index_key);
                    }
                }
            }
        }

        match new {
            Some(container_id) => {
                if let Some(index_key) = self.index_key(&container_id, release_id) {
                    self.version_index.entry(index_key).or_default().insert(entry);
                }
                self.pointers
                    .entry(key)
                    .or_default()
                    .insert(language.to_string(), container_id);
            }
            None => {
                if let Some(languages) = self.pointers.get_mut(&key) {
                    languages.remove(language);
                    if languages.is_empty() {
                        self.pointers.remove(&key);
                    }
                }
            }
        }
    }
}

/// Store keeping everything in process memory. Each write happens inside a
/// single critical section, so readers see a write either completely or not at all.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    injected_conflicts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` conditional writes fail with a `WriteConflict`
    pub fn inject_write_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok()
    }

    /// Number of field containers ever written, history included
    pub fn container_count(&self) -> usize {
        self.inner.read().containers.len()
    }
}

#[async_trait::async_trait]
impl ProjectStore for InMemoryStore {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        Ok(self.inner.read().projects.get(id).cloned())
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        Ok(self
            .inner
            .read()
            .projects
            .values()
            .find(|project| project.name == name)
            .cloned())
    }

    async fn insert_project(&self, project: Project, root: Node, initial_release: Release) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.projects.values().any(|existing| existing.name == project.name) {
            return Err(anyhow!("Project '{}' already exists", project.name));
        }
        if root.id != project.root_node_id || initial_release.project_id != project.id {
            return Err(anyhow!("Root node and initial release must belong to project '{}'", project.name));
        }
        inner.releases.insert(project.id.clone(), vec![initial_release]);
        inner.nodes.insert(root.id.clone(), root);
        inner.projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn list_releases(&self, project_id: &Id) -> Result<Vec<Release>> {
        Ok(self
            .inner
            .read()
            .releases
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_release(&self, project_id: &Id, release_id: &Id) -> Result<Option<Release>> {
        Ok(self
            .inner
            .read()
            .releases
            .get(project_id)
            .and_then(|releases| releases.iter().find(|release| &release.id == release_id))
            .cloned())
    }

    async fn get_latest_release(&self, project_id: &Id) -> Result<Option<Release>> {
        Ok(self
            .inner
            .read()
            .releases
            .get(project_id)
            .and_then(|releases| releases.last())
            .cloned())
    }

    async fn insert_release(&self, release: Release) -> Result<()> {
        let mut inner = self.inner.write();
        let parent_id = release
            .parent_release_id
            .clone()
            .ok_or_else(|| anyhow!("Release '{}' has no parent release", release.name))?;

        let latest_id = inner
            .releases
            .get(&release.project_id)
            .and_then(|releases| releases.last())
            .map(|latest| latest.id.clone())
            .ok_or_else(|| anyhow!("Project '{}' not found", release.project_id))?;
        if latest_id != parent_id {
            return Err(WriteConflict::error(format!("latest release of project {}", release.project_id)));
        }

        let inherited: Vec<(Id, String, ContainerType, Id)> = inner
            .pointers
            .iter()
            .filter(|((_, release_id, _), _)| release_id == &parent_id)
            .flat_map(|((node_id, _, container_type), languages)| {
                languages.iter().map(move |(language, container_id)| {
                    (node_id.clone(), language.clone(), *container_type, container_id.clone())
                })
            })
            .collect();
        for (node_id, language, container_type, container_id) in inherited {
            inner.set_pointer(&node_id, &language, &release.id, container_type, Some(container_id));
        }

        inner
            .releases
            .entry(release.project_id.clone())
            .or_default()
            .push(release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SchemaStore for InMemoryStore {
    async fn get_schema_container(&self, id: &Id) -> Result<Option<SchemaContainer>> {
        Ok(self.inner.read().schemas.get(id).cloned())
    }

    async fn find_schema_container_by_name(&self, name: &str) -> Result<Option<SchemaContainer>> {
        Ok(self
            .inner
            .read()
            .schemas
            .values()
            .find(|container| container.name == name)
            .cloned())
    }

    async fn list_schema_containers(&self) -> Result<Vec<SchemaContainer>> {
        let mut containers: Vec<SchemaContainer> = self.inner.read().schemas.values().cloned().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn insert_schema_container(&self, container: SchemaContainer) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.schemas.values().any(|existing| existing.name == container.name) {
            return Err(anyhow!("Schema '{}' already exists", container.name));
        }
        inner.schemas.insert(container.id.clone(), container);
        Ok(())
    }

    async fn append_schema_version(&self, expected_latest: u32, version: SchemaContainerVersion) -> Result<()> {
        if self.take_injected_conflict() {
            return Err(WriteConflict::error(format!("schema {}", version.container_id)));
        }

        let mut inner = self.inner.write();
        let container = inner
            .schemas
            .get_mut(&version.container_id)
            .ok_or_else(|| anyhow!("Schema container '{}' not found", version.container_id))?;

        let latest = (container.versions.len() as u32)
            .checked_sub(1)
            .ok_or_else(|| anyhow!("Schema container '{}' has no versions", version.container_id))?;
        if latest != expected_latest || version.version != expected_latest + 1 {
            return Err(WriteConflict::error(format!("schema {}", version.container_id)));
        }
        container.versions.push(version);
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeStore for InMemoryStore {
    async fn get_node(&self, id: &Id) -> Result<Option<Node>> {
        Ok(self.inner.read().nodes.get(id).cloned())
    }

    async fn insert_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.write();
        let parent_id = node
            .parent_id
            .clone()
            .ok_or_else(|| anyhow!("Only project bootstrap may create root nodes"))?;
        if !inner.nodes.contains_key(&parent_id) {
            return Err(anyhow!("Parent node '{}' not found", parent_id));
        }
        inner
            .children
            .entry(parent_id)
            .or_default()
            .insert(node.id.clone());
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn list_children(&self, parent_id: &Id) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .children
            .get(parent_id)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child_id| inner.nodes.get(child_id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_field_container(&self, id: &Id) -> Result<Option<NodeFieldContainer>> {
        Ok(self.inner.read().containers.get(id).cloned())
    }

    async fn get_container_pointer(
        &self,
        node_id: &Id,
        language: &str,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Option<Id>> {
        Ok(self
            .inner
            .read()
            .pointer(node_id, language, release_id, container_type)
            .cloned())
    }

    async fn list_containers(
        &self,
        node_id: &Id,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Vec<NodeFieldContainer>> {
        let inner = self.inner.read();
        Ok(inner
            .pointers
            .get(&(node_id.clone(), release_id.clone(), container_type))
            .map(|languages| {
                languages
                    .values()
                    .filter_map(|container_id| inner.containers.get(container_id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_pointers_for_version(
        &self,
        schema_container_id: &Id,
        schema_version: u32,
        release_id: &Id,
    ) -> Result<Vec<ContainerPointer>> {
        let inner = self.inner.read();
        let key = (schema_container_id.clone(), schema_version, release_id.clone());
        let Some(entries) = inner.version_index.get(&key) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .filter_map(|(node_id, language, container_type)| {
                inner
                    .pointer(node_id, language, release_id, *container_type)
                    .map(|container_id| ContainerPointer {
                        node_id: node_id.clone(),
                        language: language.clone(),
                        release_id: release_id.clone(),
                        container_type: *container_type,
                        container_id: container_id.clone(),
                        schema_container_id: schema_container_id.clone(),
                        schema_version,
                    })
            })
            .collect())
    }

    async fn commit_containers(
        &self,
        containers: Vec<NodeFieldContainer>,
        updates: Vec<PointerUpdate>,
    ) -> Result<()> {
        if self.take_injected_conflict() {
            return Err(WriteConflict::error("field containers"));
        }

        let mut inner = self.inner.write();
        for update in &updates {
            let current = inner.pointer(
                &update.node_id,
                &update.language,
                &update.release_id,
                update.container_type,
            );
            if current != update.expected.as_ref() {
                return Err(WriteConflict::error(format!(
                    "{} pointer of node {} ({}, release {})",
                    update.container_type, update.node_id, update.language, update.release_id
                )));
            }
            if let Some(new) = &update.new {
                let known = inner.containers.contains_key(new)
                    || containers.iter().any(|container| &container.id == new);
                if !known {
                    return Err(anyhow!("Pointer target container '{}' does not exist", new));
                }
            }
        }
        for container in &containers {
            if inner.containers.contains_key(&container.id) {
                return Err(anyhow!("Field container '{}' already exists", container.id));
            }
        }

        for container in containers {
            inner.containers.insert(container.id.clone(), container);
        }
        for update in updates {
            inner.set_pointer(
                &update.node_id,
                &update.language,
                &update.release_id,
                update.container_type,
                update.new,
            );
        }
        Ok(())
    }
}

impl Store for InMemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerVersionTag, FieldMap, SchemaVersionRef};

    fn container(node_id: &str, language: &str, version: u32) -> NodeFieldContainer {
        NodeFieldContainer::new(
            node_id.to_string(),
            language.to_string(),
            SchemaVersionRef { container_id: "schema".to_string(), version },
            FieldMap::new(),
            ContainerVersionTag::initial(),
            None,
            "test".to_string(),
        )
    }

    fn draft_update(node_id: &str, language: &str, expected: Option<&Id>, new: &Id) -> PointerUpdate {
        PointerUpdate {
            node_id: node_id.to_string(),
            language: language.to_string(),
            release_id: "r1".to_string(),
            container_type: ContainerType::Draft,
            expected: expected.cloned(),
            new: Some(new.clone()),
        }
    }

    #[tokio::test]
    async fn test_commit_swaps_pointers_and_maintains_index() {
        let store = InMemoryStore::new();
        let first = container("n1", "en", 0);
        let first_id = first.id.clone();
        store
            .commit_containers(vec![first], vec![draft_update("n1", "en", None, &first_id)])
            .await
            .unwrap();

        let release = "r1".to_string();
        let schema = "schema".to_string();
        assert_eq!(store.list_pointers_for_version(&schema, 0, &release).await.unwrap().len(), 1);

        let second = container("n1", "en", 1);
        let second_id = second.id.clone();
        store
            .commit_containers(vec![second], vec![draft_update("n1", "en", Some(&first_id), &second_id)])
            .await
            .unwrap();

        assert!(store.list_pointers_for_version(&schema, 0, &release).await.unwrap().is_empty());
        let moved = store.list_pointers_for_version(&schema, 1, &release).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].container_id, second_id);
        // History stays reachable
        assert!(store.get_field_container(&first_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_expectation_is_a_write_conflict() {
        let store = InMemoryStore::new();
        let first = container("n1", "en", 0);
        let first_id = first.id.clone();
        store
            .commit_containers(vec![first], vec![draft_update("n1", "en", None, &first_id)])
            .await
            .unwrap();

        let other = container("n1", "en", 0);
        let other_id = other.id.clone();
        let err = store
            .commit_containers(vec![other], vec![draft_update("n1", "en", None, &other_id)])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<WriteConflict>().is_some());
        // Nothing from the rejected batch was written
        assert!(store.get_field_container(&other_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = InMemoryStore::new();
        store.inject_write_conflicts(1);
        let first = container("n1", "en", 0);
        let first_id = first.id.clone();
        assert!(store
            .commit_containers(vec![first.clone()], vec![draft_update("n1", "en", None, &first_id)])
            .await
            .is_err());
        assert!(store
            .commit_containers(vec![first], vec![draft_update("n1", "en", None, &first_id)])
            .await
            .is_ok());
    }
}
