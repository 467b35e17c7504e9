use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ContentError, Result};
use crate::logic::{RetryPolicy, SchemaMutator};
use crate::model::{Id, SchemaChange, SchemaContainer, SchemaContainerVersion, SchemaDefinition, SchemaVersionRef};
use crate::store::Store;

/// Outcome of replaying one schema container's change chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub container_id: Id,
    pub name: String,
    pub versions: usize,
    /// Versions whose stored fingerprint differs from the replayed definition
    pub mismatched_versions: Vec<u32>,
    /// Replay error, if a hop could not be applied at all
    pub error: Option<String>,
}

impl ChainVerification {
    pub fn is_consistent(&self) -> bool {
        self.mismatched_versions.is_empty() && self.error.is_none()
    }
}

/// Owns the append-only version chains of the schema containers
pub struct SchemaRegistry<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: Store> SchemaRegistry<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn create_schema_container(&self, name: &str, schema: SchemaDefinition) -> Result<SchemaContainer> {
        schema.check_structure().map_err(ContentError::Validation)?;
        if self.store.find_schema_container_by_name(name).await?.is_some() {
            return Err(ContentError::validation(format!(
                "Schema container '{}' already exists",
                name
            )));
        }

        let container = SchemaContainer::new(name.to_string(), schema);
        self.store.insert_schema_container(container.clone()).await?;
        log::info!("Created schema container '{}' ({})", name, container.id);
        Ok(container)
    }

    pub async fn get(&self, container_id: &Id) -> Result<SchemaContainer> {
        self.store
            .get_schema_container(container_id)
            .await?
            .ok_or_else(|| ContentError::unknown("Schema container", container_id.as_str()))
    }

    /// Look a container up by id first, then by name
    pub async fn find(&self, id_or_name: &str) -> Result<SchemaContainer> {
        if let Some(container) = self.store.get_schema_container(&id_or_name.to_string()).await? {
            return Ok(container);
        }
        self.store
            .find_schema_container_by_name(id_or_name)
            .await?
            .ok_or_else(|| ContentError::unknown("Schema container", id_or_name))
    }

    /// Append a new version produced by `changes` to the container's latest
    /// version. The whole chain is validated before anything is persisted;
    /// a rejected chain leaves the container untouched.
    pub async fn apply_changes(&self, container_id: &Id, changes: Vec<SchemaChange>) -> Result<SchemaVersionRef> {
        if changes.is_empty() {
            return Err(ContentError::validation("The change chain is empty"));
        }

        let target = format!("schema container {}", container_id);
        let version = self
            .retry
            .run(&target, || {
                let changes = changes.clone();
                async move {
                    let container = self.get(container_id).await?;
                    let latest = container
                        .latest_version()
                        .ok_or_else(|| ContentError::unknown("Schema version", container_id.as_str()))?;
                    let schema = SchemaMutator::apply_changes(&latest.schema, &changes)?;
                    let next = SchemaContainerVersion::new(container.id.clone(), latest.version + 1, schema, changes);
                    self.store.append_schema_version(latest.version, next.clone()).await?;
                    Ok(next)
                }
            })
            .await?;

        log::info!(
            "Appended version {} to schema container {} ({} changes, fingerprint {})",
            version.version,
            container_id,
            version.changes.len(),
            version.fingerprint
        );
        Ok(version.reference())
    }

    /// Replay the container's chain from version 0 and compare each result
    /// with the stored definition
    pub fn verify_chain(container: &SchemaContainer) -> ChainVerification {
        let mut verification = ChainVerification {
            container_id: container.id.clone(),
            name: container.name.clone(),
            versions: container.versions.len(),
            mismatched_versions: Vec::new(),
            error: None,
        };

        match SchemaMutator::replay(container) {
            Ok(definitions) => {
                for (stored, replayed) in container.versions.iter().zip(definitions.iter()) {
                    if stored.fingerprint != replayed.fingerprint() {
                        verification.mismatched_versions.push(stored.version);
                    }
                }
            }
            Err(e) => verification.error = Some(e.to_string()),
        }
        verification
    }

    pub async fn verify_all(&self) -> Result<Vec<ChainVerification>> {
        let containers = self.store.list_schema_containers().await?;
        Ok(containers.iter().map(Self::verify_chain).collect())
    }
}
