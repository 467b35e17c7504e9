//! WebRoot path resolution.
//!
//! A path is a sequence of segment field values. Resolution starts at the
//! project's root node and descends one segment at a time, matching each
//! segment against the segment field of the children that exist in the
//! requested release and mode.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ContentError, Result};
use crate::logic::permissions::PermissionChecker;
use crate::logic::versioning::{find_project, find_release};
use crate::model::{ContainerType, Id, Node, NodeFieldContainer, SchemaContainer, SchemaDefinition, UserContext};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRootRequest {
    /// Project id or name
    pub project: String,
    pub path: String,
    /// Release id or name, latest release when unset
    pub release: Option<String>,
    pub mode: ContainerType,
    /// Language preference, most preferred first
    pub languages: Vec<String>,
    pub user: UserContext,
}

impl WebRootRequest {
    pub fn new(project: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            path: path.into(),
            release: None,
            mode: ContainerType::Published,
            languages: Vec::new(),
            user: UserContext::anonymous(),
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_mode(mut self, mode: ContainerType) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_languages<I, L>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    /// Normalized path, without leading or trailing separator
    pub path: String,
    pub node: Node,
    pub release_id: Id,
    pub mode: ContainerType,
    /// Language of the last matched segment. For the root node the first
    /// preferred language it has content in, if any.
    pub language: Option<String>,
    pub container: Option<NodeFieldContainer>,
    /// Binary content of a non-container schema, served as a download
    pub download: bool,
}

/// Split a path into its segments, ignoring repeated, leading and trailing separators
pub fn normalize_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

struct Candidate {
    node: Node,
    container: NodeFieldContainer,
}

pub struct WebRootResolver<S: Store> {
    store: Arc<S>,
    permissions: Arc<dyn PermissionChecker>,
    default_language: String,
}

impl<S: Store> WebRootResolver<S> {
    pub fn new(store: Arc<S>, permissions: Arc<dyn PermissionChecker>, default_language: impl Into<String>) -> Self {
        Self {
            store,
            permissions,
            default_language: default_language.into(),
        }
    }

    pub async fn resolve(&self, request: &WebRootRequest) -> Result<ResolvedNode> {
        let project = find_project(self.store.as_ref(), &request.project).await?;
        let release = find_release(self.store.as_ref(), &project.id, request.release.as_deref()).await?;
        let languages: Vec<&str> = if request.languages.is_empty() {
            vec![self.default_language.as_str()]
        } else {
            request.languages.iter().map(String::as_str).collect()
        };
        let segments = normalize_path(&request.path);
        let not_found = || ContentError::NotFound {
            path: request.path.clone(),
        };

        let root = self
            .store
            .get_node(&project.root_node_id)
            .await?
            .ok_or_else(|| ContentError::unknown("Node", project.root_node_id.as_str()))?;
        self.check_read(&request.user, &root)?;

        let mut schemas = SchemaCache::default();
        let mut current = root;
        let mut matched: Option<NodeFieldContainer> = None;

        for segment in &segments {
            let mut candidates = Vec::new();
            for child in self.store.list_children(&current.id).await? {
                // one snapshot per child, so a concurrent pointer swap is seen entirely or not at all
                let containers = self.store.list_containers(&child.id, &release.id, request.mode).await?;
                for container in containers {
                    let schema = schemas.definition(self.store.as_ref(), &container).await?;
                    let hit = schema
                        .segment_field
                        .as_deref()
                        .and_then(|field| container.segment_value(field))
                        == Some(*segment);
                    if hit {
                        candidates.push(Candidate {
                            node: child.clone(),
                            container,
                        });
                    }
                }
            }

            let chosen = pick_candidate(candidates, &languages, segment).ok_or_else(not_found)?;
            self.check_read(&request.user, &chosen.node)?;
            current = chosen.node;
            matched = Some(chosen.container);
        }

        let container = match matched {
            Some(container) => Some(container),
            None => self.root_container(&current.id, &release.id, request.mode, &languages).await?,
        };
        let download = match &container {
            Some(container) => {
                let schema = schemas.definition(self.store.as_ref(), container).await?;
                !schema.container && schema.has_binary_field()
            }
            None => false,
        };

        Ok(ResolvedNode {
            path: segments.join("/"),
            node: current,
            release_id: release.id,
            mode: request.mode,
            language: container.as_ref().map(|c| c.language.clone()),
            container,
            download,
        })
    }

    fn check_read(&self, user: &UserContext, node: &Node) -> Result<()> {
        if self.permissions.can_read(user, &node.id) {
            Ok(())
        } else {
            Err(ContentError::Forbidden {
                node_id: node.id.clone(),
            })
        }
    }

    async fn root_container(
        &self,
        node_id: &Id,
        release_id: &Id,
        mode: ContainerType,
        languages: &[&str],
    ) -> Result<Option<NodeFieldContainer>> {
        let containers = self.store.list_containers(node_id, release_id, mode).await?;
        let preferred = languages
            .iter()
            .find_map(|language| containers.iter().position(|c| c.language == *language));
        Ok(preferred.map(|position| containers[position].clone()))
    }
}

/// Choose among the children matching a segment. A preferred language wins
/// in preference order; without one, the smallest language tag wins. Within
/// the chosen language the smallest node id wins.
fn pick_candidate(candidates: Vec<Candidate>, languages: &[&str], segment: &str) -> Option<Candidate> {
    let language = languages
        .iter()
        .find(|language| candidates.iter().any(|c| c.container.language == **language))
        .map(|language| language.to_string())
        .or_else(|| candidates.iter().map(|c| c.container.language.clone()).min())?;

    let mut matching: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.container.language == language)
        .collect();
    matching.sort_by(|a, b| a.node.id.cmp(&b.node.id));
    if matching.len() > 1 {
        log::warn!(
            "Segment '{}' matches {} sibling nodes in '{}', using node {}",
            segment,
            matching.len(),
            language,
            matching[0].node.id
        );
    }
    matching.into_iter().next()
}

/// Schema containers loaded during one resolution
#[derive(Default)]
struct SchemaCache {
    containers: HashMap<Id, SchemaContainer>,
}

impl SchemaCache {
    async fn definition<S: Store + ?Sized>(
        &mut self,
        store: &S,
        container: &NodeFieldContainer,
    ) -> Result<SchemaDefinition> {
        if !self.containers.contains_key(&container.schema_container_id) {
            let schema = store
                .get_schema_container(&container.schema_container_id)
                .await?
                .ok_or_else(|| ContentError::unknown("Schema container", container.schema_container_id.as_str()))?;
            self.containers.insert(schema.id.clone(), schema);
        }
        self.containers
            .get(&container.schema_container_id)
            .and_then(|schema| schema.version(container.schema_version))
            .map(|version| version.schema.clone())
            .ok_or_else(|| {
                ContentError::unknown(
                    "Schema version",
                    format!("{}@v{}", container.schema_container_id, container.schema_version),
                )
            })
    }
}
