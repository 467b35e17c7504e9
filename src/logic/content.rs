//! Editing operations on the content tree: projects, releases, nodes and
//! their draft/published field containers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ContentError, Result};
use crate::logic::validate::{FieldValidator, ValidationMode};
use crate::logic::versioning::{find_project, find_release, resolve_container};
use crate::logic::RetryPolicy;
use crate::model::{
    segment_value, ContainerType, ContainerVersionTag, FieldMap, Id, Node, NodeFieldContainer, PointerUpdate,
    Project, Release, SchemaContainerVersion, UserContext,
};
use crate::store::Store;

pub struct ContentService<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
    default_language: String,
}

impl<S: Store> ContentService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy, default_language: impl Into<String>) -> Self {
        Self {
            store,
            retry,
            default_language: default_language.into(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Create a project with its root node and initial release. The root gets
    /// an empty draft in the default language, so the whole structure exists
    /// before the first request is served.
    pub async fn bootstrap_project(
        &self,
        name: &str,
        root_schema_id: &Id,
        user: &UserContext,
    ) -> Result<(Project, Release)> {
        if self.store.find_project_by_name(name).await?.is_some() {
            return Err(ContentError::validation(format!("Project '{}' already exists", name)));
        }
        let schema = self.latest_schema_version(root_schema_id).await?;
        if !schema.schema.container {
            return Err(ContentError::validation(format!(
                "The root schema '{}' must be a container schema",
                schema.schema.name
            )));
        }

        let mut project = Project::new(name.to_string(), Id::new(), user.user_id.clone());
        let root = Node::new(project.id.clone(), None, root_schema_id.clone(), user.user_id.clone());
        project.root_node_id = root.id.clone();
        let release = Release::new_initial(project.id.clone(), name.to_string(), user.user_id.clone());
        self.store
            .insert_project(project.clone(), root.clone(), release.clone())
            .await?;

        let draft = NodeFieldContainer::new(
            root.id.clone(),
            self.default_language.clone(),
            schema.reference(),
            FieldMap::new(),
            ContainerVersionTag::initial(),
            None,
            user.user_id.clone(),
        );
        let update = PointerUpdate {
            node_id: root.id.clone(),
            language: self.default_language.clone(),
            release_id: release.id.clone(),
            container_type: ContainerType::Draft,
            expected: None,
            new: Some(draft.id.clone()),
        };
        self.store.commit_containers(vec![draft], vec![update]).await?;

        log::info!("Bootstrapped project '{}' ({}) with root node {}", name, project.id, root.id);
        Ok((project, release))
    }

    pub async fn get_project(&self, id_or_name: &str) -> Result<Project> {
        find_project(self.store.as_ref(), id_or_name).await
    }

    /// The given release of the project, or its latest one
    pub async fn release(&self, project_id: &Id, release: Option<&str>) -> Result<Release> {
        find_release(self.store.as_ref(), project_id, release).await
    }

    /// Derive a new release from the project's latest one. It starts with the
    /// draft and published state of its parent and becomes the latest release.
    pub async fn create_release(&self, project_id: &Id, name: &str, user: &UserContext) -> Result<Release> {
        let target = format!("releases of project {}", project_id);
        let release = self
            .retry
            .run(&target, || async move {
                let releases = self.store.list_releases(project_id).await?;
                if releases.iter().any(|release| release.name == name) {
                    return Err(ContentError::validation(format!("Release '{}' already exists", name)));
                }
                let parent = releases
                    .last()
                    .ok_or_else(|| ContentError::unknown("Project", project_id.as_str()))?;
                let release = Release::new_from_release(parent, name.to_string(), user.user_id.clone());
                self.store.insert_release(release.clone()).await?;
                Ok(release)
            })
            .await?;

        log::info!(
            "Created release '{}' ({}) from {:?}",
            release.name,
            release.id,
            release.parent_release_id
        );
        Ok(release)
    }

    pub async fn get_node(&self, node_id: &Id) -> Result<Node> {
        self.store
            .get_node(node_id)
            .await?
            .ok_or_else(|| ContentError::unknown("Node", node_id.as_str()))
    }

    pub async fn create_node(
        &self,
        project_id: &Id,
        parent_id: &Id,
        schema_id: &Id,
        user: &UserContext,
    ) -> Result<Node> {
        let parent = self.get_node(parent_id).await?;
        if &parent.project_id != project_id {
            return Err(ContentError::validation(format!(
                "Parent node {} does not belong to project {}",
                parent_id, project_id
            )));
        }
        let parent_schema = self.latest_schema_version(&parent.schema_container_id).await?;
        if !parent_schema.schema.container {
            return Err(ContentError::validation(format!(
                "Nodes of schema '{}' cannot have children",
                parent_schema.schema.name
            )));
        }
        self.latest_schema_version(schema_id).await?;

        let node = Node::new(project_id.clone(), Some(parent_id.clone()), schema_id.clone(), user.user_id.clone());
        self.store.insert_node(node.clone()).await?;
        log::debug!("Created node {} below {}", node.id, parent_id);
        Ok(node)
    }

    /// Store new field values as the node's draft in `language`. The previous
    /// draft stays reachable through the history link.
    pub async fn save_draft(
        &self,
        node_id: &Id,
        language: &str,
        release: Option<&str>,
        fields: FieldMap,
        user: &UserContext,
    ) -> Result<NodeFieldContainer> {
        let node = self.get_node(node_id).await?;
        let release = self.release(&node.project_id, release).await?;
        let schema = self.latest_schema_version(&node.schema_container_id).await?;
        FieldValidator::ensure_valid(&schema.schema, &fields, ValidationMode::Strict)?;

        let target = format!("draft of node {} ({})", node_id, language);
        self.retry
            .run(&target, || {
                let fields = fields.clone();
                let (node, release_id, schema, user) = (&node, &release.id, &schema, user);
                async move {
                    // re-checked on every attempt, a sibling may have taken the segment meanwhile
                    self.check_segment_conflict(node, language, release_id, ContainerType::Draft, schema, &fields)
                        .await?;
                    let current = resolve_container(self.store.as_ref(), node_id, language, release_id, ContainerType::Draft).await?;
                    let draft = match &current {
                        Some(current) => current.successor(
                            schema.reference(),
                            fields,
                            current.version.next_draft(),
                            user.user_id.clone(),
                        ),
                        None => NodeFieldContainer::new(
                            node_id.clone(),
                            language.to_string(),
                            schema.reference(),
                            fields,
                            ContainerVersionTag::initial(),
                            None,
                            user.user_id.clone(),
                        ),
                    };
                    let update = PointerUpdate {
                        node_id: node_id.clone(),
                        language: language.to_string(),
                        release_id: release_id.clone(),
                        container_type: ContainerType::Draft,
                        expected: current.map(|c| c.id),
                        new: Some(draft.id.clone()),
                    };
                    self.store.commit_containers(vec![draft.clone()], vec![update]).await?;
                    Ok(draft)
                }
            })
            .await
    }

    /// Publish the node's current draft in `language`. The published
    /// container gets the next major version and becomes the draft as well.
    pub async fn publish(
        &self,
        node_id: &Id,
        language: &str,
        release: Option<&str>,
        user: &UserContext,
    ) -> Result<NodeFieldContainer> {
        let node = self.get_node(node_id).await?;
        let release = self.release(&node.project_id, release).await?;
        let (node, release_id) = (&node, &release.id);

        let target = format!("published state of node {} ({})", node_id, language);
        let published = self
            .retry
            .run(&target, || async move {
                let draft = resolve_container(self.store.as_ref(), node_id, language, release_id, ContainerType::Draft)
                    .await?
                    .ok_or_else(|| {
                        ContentError::validation(format!("Node {} has no draft in '{}' to publish", node_id, language))
                    })?;
                let schema = self.schema_version(&draft.schema_container_id, draft.schema_version).await?;
                self.check_segment_conflict(node, language, release_id, ContainerType::Published, &schema, &draft.fields)
                    .await?;

                let current =
                    resolve_container(self.store.as_ref(), node_id, language, release_id, ContainerType::Published)
                        .await?;
                // a migration may have moved the published container past the draft
                let base = current
                    .as_ref()
                    .map_or(draft.version, |current| current.version.max(draft.version));
                let published = draft.successor(
                    draft.schema_ref(),
                    draft.fields.clone(),
                    base.next_published(),
                    user.user_id.clone(),
                );
                let updates = vec![
                    PointerUpdate {
                        node_id: node_id.clone(),
                        language: language.to_string(),
                        release_id: release_id.clone(),
                        container_type: ContainerType::Draft,
                        expected: Some(draft.id.clone()),
                        new: Some(published.id.clone()),
                    },
                    PointerUpdate {
                        node_id: node_id.clone(),
                        language: language.to_string(),
                        release_id: release_id.clone(),
                        container_type: ContainerType::Published,
                        expected: current.map(|current| current.id),
                        new: Some(published.id.clone()),
                    },
                ];
                self.store.commit_containers(vec![published.clone()], updates).await?;
                Ok(published)
            })
            .await?;

        log::info!("Published node {} ({}) as version {}", node_id, language, published.version);
        Ok(published)
    }

    /// Remove the published pointers of a node, for one language or all of
    /// them. Drafts are left alone. Returns the number of languages taken offline.
    pub async fn take_offline(
        &self,
        node_id: &Id,
        release: Option<&str>,
        language: Option<&str>,
        user: &UserContext,
    ) -> Result<usize> {
        let node = self.get_node(node_id).await?;
        if node.is_root() {
            return Err(ContentError::validation("The root node of a project cannot be taken offline"));
        }
        let release = self.release(&node.project_id, release).await?;
        let release_id = &release.id;

        let target = format!("published state of node {}", node_id);
        let count = self
            .retry
            .run(&target, || async move {
                let updates: Vec<PointerUpdate> = self
                    .store
                    .list_containers(node_id, release_id, ContainerType::Published)
                    .await?
                    .into_iter()
                    .filter(|container| language.map_or(true, |language| container.language == language))
                    .map(|container| PointerUpdate {
                        node_id: node_id.clone(),
                        language: container.language,
                        release_id: release_id.clone(),
                        container_type: ContainerType::Published,
                        expected: Some(container.id),
                        new: None,
                    })
                    .collect();
                let count = updates.len();
                if count > 0 {
                    self.store.commit_containers(Vec::new(), updates).await?;
                }
                Ok(count)
            })
            .await?;

        log::info!(
            "User {} took node {} offline in {} language(s) of release {}",
            user.user_id,
            node_id,
            count,
            release.name
        );
        Ok(count)
    }

    async fn latest_schema_version(&self, schema_id: &Id) -> Result<SchemaContainerVersion> {
        self.store
            .get_schema_container(schema_id)
            .await?
            .and_then(|container| container.latest_version().cloned())
            .ok_or_else(|| ContentError::unknown("Schema container", schema_id.as_str()))
    }

    async fn schema_version(&self, schema_id: &Id, version: u32) -> Result<SchemaContainerVersion> {
        self.store
            .get_schema_container(schema_id)
            .await?
            .and_then(|container| container.version(version).cloned())
            .ok_or_else(|| ContentError::unknown("Schema version", format!("{}@v{}", schema_id, version)))
    }

    /// Reject field values whose segment collides with a sibling's segment in
    /// the same language, release and mode
    async fn check_segment_conflict(
        &self,
        node: &Node,
        language: &str,
        release_id: &Id,
        mode: ContainerType,
        schema: &SchemaContainerVersion,
        fields: &FieldMap,
    ) -> Result<()> {
        let (Some(parent_id), Some(segment_field)) = (&node.parent_id, &schema.schema.segment_field) else {
            return Ok(());
        };
        let Some(segment) = segment_value(fields, segment_field) else {
            return Ok(());
        };

        let mut segment_fields: HashMap<(Id, u32), Option<String>> = HashMap::new();
        for sibling in self.store.list_children(parent_id).await? {
            if sibling.id == node.id {
                continue;
            }
            let Some(container) = resolve_container(self.store.as_ref(), &sibling.id, language, release_id, mode).await? else {
                continue;
            };
            let key = (container.schema_container_id.clone(), container.schema_version);
            if !segment_fields.contains_key(&key) {
                let field = self.schema_version(&key.0, key.1).await?.schema.segment_field;
                segment_fields.insert(key.clone(), field);
            }
            let sibling_field = segment_fields.get(&key).and_then(|field| field.as_deref());
            if sibling_field.and_then(|field| container.segment_value(field)) == Some(segment) {
                return Err(ContentError::validation(format!(
                    "Segment '{}' is already used by node {} in '{}' ({})",
                    segment, sibling.id, language, mode
                )));
            }
        }
        Ok(())
    }
}
