//! Content migration between schema versions.
//!
//! A migration walks every draft and published pointer of a release that
//! references a container bound to a version in `from..to`, runs the
//! migration scripts of each hop up to `to` and swaps the pointers to the new
//! container in one atomic commit. Failures of single containers are
//! collected in the report; the batch continues.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ContentError, Result};
use crate::logic::scripts::{ScriptContext, ScriptEngine};
use crate::logic::validate::{FieldValidator, ValidationIssueType, ValidationMode};
use crate::logic::{RetryPolicy, SchemaMutator};
use crate::model::{
    ContainerType, FieldMap, Id, NodeFieldContainer, PointerUpdate, SchemaChange, SchemaContainer,
    SchemaDefinition, SchemaVersionRef,
};
use crate::store::Store;

const MIGRATION_USER: &str = "system";

/// What a second migration of a busy (schema, release) target does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationLockPolicy {
    #[default]
    Wait,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub node_id: Id,
    pub language: String,
    pub release_id: Id,
    pub container_types: Vec<ContainerType>,
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub schema_container_id: Id,
    pub release_id: Id,
    pub from_version: u32,
    pub to_version: u32,
    /// New containers created
    pub migrated: usize,
    /// (node, language) pairs found already at the target version
    pub skipped: usize,
    pub failures: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One change of a hop with the definitions directly before and after it
struct MigrationStep {
    change: SchemaChange,
    before: SchemaDefinition,
    after: SchemaDefinition,
}

/// Everything a migration needs to know about the schema chain, computed once
struct MigrationPlan {
    container_id: Id,
    release_id: Id,
    from: u32,
    to: u32,
    /// `hops[v]` migrates from version `v` to `v + 1`
    hops: BTreeMap<u32, Vec<MigrationStep>>,
    target: SchemaVersionRef,
    target_schema: SchemaDefinition,
}

impl MigrationPlan {
    fn build(container: &SchemaContainer, from: u32, to: u32, release_id: &Id) -> Result<Self> {
        if from >= to {
            return Err(ContentError::validation(format!(
                "Cannot migrate from version {} to version {}",
                from, to
            )));
        }
        let target = container
            .version(to)
            .ok_or_else(|| ContentError::unknown("Schema version", format!("{}@v{}", container.id, to)))?;

        let mut hops = BTreeMap::new();
        for version in from..to {
            let current = container
                .version(version)
                .ok_or_else(|| ContentError::unknown("Schema version", format!("{}@v{}", container.id, version)))?;
            let changes = container.next_changes(version).unwrap_or_default();
            let definitions = SchemaMutator::steps(&current.schema, changes)?;

            let mut before = current.schema.clone();
            let mut steps = Vec::with_capacity(changes.len());
            for (change, after) in changes.iter().zip(definitions) {
                steps.push(MigrationStep {
                    change: change.clone(),
                    before: std::mem::replace(&mut before, after.clone()),
                    after,
                });
            }
            hops.insert(version, steps);
        }

        Ok(Self {
            container_id: container.id.clone(),
            release_id: release_id.clone(),
            from,
            to,
            hops,
            target: target.reference(),
            target_schema: target.schema.clone(),
        })
    }

    fn covers(&self, container: &NodeFieldContainer) -> bool {
        container.schema_container_id == self.container_id
            && container.schema_version >= self.from
            && container.schema_version < self.to
    }
}

enum UnitOutcome {
    Migrated(usize),
    Skipped,
}

pub struct MigrationExecutor<S: Store> {
    store: Arc<S>,
    scripts: Arc<dyn ScriptEngine>,
    retry: RetryPolicy,
    lock_policy: MigrationLockPolicy,
    locks: parking_lot::Mutex<HashMap<(Id, Id), Arc<Mutex<()>>>>,
}

impl<S: Store> MigrationExecutor<S> {
    pub fn new(
        store: Arc<S>,
        scripts: Arc<dyn ScriptEngine>,
        retry: RetryPolicy,
        lock_policy: MigrationLockPolicy,
    ) -> Self {
        Self {
            store,
            scripts,
            retry,
            lock_policy,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, container_id: &Id, release_id: &Id) -> Result<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .lock()
            .entry((container_id.clone(), release_id.clone()))
            .or_default()
            .clone();

        match self.lock_policy {
            MigrationLockPolicy::Wait => Ok(lock.lock_owned().await),
            MigrationLockPolicy::Reject => lock.try_lock_owned().map_err(|_| ContentError::ConcurrencyConflict {
                target: format!("migration of schema {} in release {}", container_id, release_id),
            }),
        }
    }

    /// Migrate all content of `release` bound to versions `from..to` of the
    /// schema container to version `to`
    pub async fn migrate(&self, container_id: &Id, from: u32, to: u32, release_id: &Id) -> Result<MigrationReport> {
        let container = self
            .store
            .get_schema_container(container_id)
            .await?
            .ok_or_else(|| ContentError::unknown("Schema container", container_id.as_str()))?;
        let plan = MigrationPlan::build(&container, from, to, release_id)?;

        let guard = self.acquire(container_id, release_id).await?;
        let result = self.run_plan(&container, &plan, from, to, release_id).await;
        drop(guard);
        self.release_lock(container_id, release_id);
        result
    }

    /// Drop the lock entry of a target nobody holds or waits for
    fn release_lock(&self, container_id: &Id, release_id: &Id) {
        let mut locks = self.locks.lock();
        let key = (container_id.clone(), release_id.clone());
        if locks.get(&key).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    async fn run_plan(
        &self,
        container: &SchemaContainer,
        plan: &MigrationPlan,
        from: u32,
        to: u32,
        release_id: &Id,
    ) -> Result<MigrationReport> {
        let container_id = &container.id;
        log::info!(
            "Migrating content of schema '{}' from v{} to v{} in release {}",
            container.name,
            from,
            to,
            release_id
        );

        // (node, language) -> pointer types, every version in the range
        let mut units: BTreeMap<(Id, String), BTreeSet<ContainerType>> = BTreeMap::new();
        for version in from..to {
            for pointer in self.store.list_pointers_for_version(container_id, version, release_id).await? {
                units
                    .entry((pointer.node_id, pointer.language))
                    .or_default()
                    .insert(pointer.container_type);
            }
        }

        let mut report = MigrationReport {
            schema_container_id: container_id.clone(),
            release_id: release_id.clone(),
            from_version: from,
            to_version: to,
            migrated: 0,
            skipped: 0,
            failures: Vec::new(),
        };

        for ((node_id, language), types) in units {
            let types: Vec<ContainerType> = types.into_iter().collect();
            match self.migrate_unit(plan, &node_id, &language, &types).await {
                Ok(UnitOutcome::Migrated(count)) => report.migrated += count,
                Ok(UnitOutcome::Skipped) => report.skipped += 1,
                Err(e @ (ContentError::Script(_) | ContentError::Validation(_))) => {
                    log::warn!(
                        "Migration of node {} ({}) in release {} failed: {}",
                        node_id,
                        language,
                        release_id,
                        e
                    );
                    report.failures.push(MigrationFailure {
                        node_id,
                        language,
                        release_id: release_id.clone(),
                        container_types: types,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        log::info!(
            "Migration of schema '{}' to v{} in release {} finished: {} migrated, {} skipped, {} failed",
            container.name,
            to,
            release_id,
            report.migrated,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Migrate the current pointers of one (node, language). Pointers are
    /// re-read on every attempt, so a retry after a conflict picks up
    /// whatever a concurrent writer left behind.
    async fn migrate_unit(
        &self,
        plan: &MigrationPlan,
        node_id: &Id,
        language: &str,
        types: &[ContainerType],
    ) -> Result<UnitOutcome> {
        let target = format!("node {} ({}) in release {}", node_id, language, plan.release_id);
        self.retry
            .run(&target, || async move {
                // current container id -> pointer types referencing it
                let mut current: BTreeMap<Id, Vec<ContainerType>> = BTreeMap::new();
                for container_type in types {
                    let pointer = self
                        .store
                        .get_container_pointer(node_id, language, &plan.release_id, *container_type)
                        .await?;
                    if let Some(container_id) = pointer {
                        current.entry(container_id).or_default().push(*container_type);
                    }
                }

                let mut existing = Vec::with_capacity(current.len());
                for (container_id, pointer_types) in current {
                    let container = self
                        .store
                        .get_field_container(&container_id)
                        .await?
                        .ok_or_else(|| ContentError::unknown("Field container", container_id.as_str()))?;
                    existing.push((container, pointer_types));
                }
                // published content first, so a separate draft lands on top of it
                existing.sort_by_key(|(_, pointer_types)| !pointer_types.contains(&ContainerType::Published));

                // tags grow along every history link, the current containers hold the highest one
                let Some(mut highest) = existing.iter().map(|(container, _)| container.version).max() else {
                    return Ok(UnitOutcome::Skipped);
                };

                let mut created = Vec::new();
                let mut updates = Vec::new();
                for (existing, pointer_types) in existing {
                    if !plan.covers(&existing) {
                        continue;
                    }

                    let fields = self.run_scripts(plan, &existing)?;
                    let version = if pointer_types.contains(&ContainerType::Published) {
                        highest.next_published()
                    } else {
                        highest.next_draft()
                    };
                    highest = version;
                    let migrated = existing.successor(plan.target.clone(), fields, version, MIGRATION_USER.to_string());
                    for container_type in pointer_types {
                        updates.push(PointerUpdate {
                            node_id: node_id.clone(),
                            language: language.to_string(),
                            release_id: plan.release_id.clone(),
                            container_type,
                            expected: Some(existing.id.clone()),
                            new: Some(migrated.id.clone()),
                        });
                    }
                    created.push(migrated);
                }

                if created.is_empty() {
                    return Ok(UnitOutcome::Skipped);
                }
                let count = created.len();
                self.store.commit_containers(created, updates).await?;
                Ok(UnitOutcome::Migrated(count))
            })
            .await
    }

    fn run_scripts(&self, plan: &MigrationPlan, container: &NodeFieldContainer) -> Result<FieldMap> {
        let mut fields = container.fields.clone();
        for (_, steps) in plan.hops.range(container.schema_version..plan.to) {
            for step in steps {
                let context = ScriptContext {
                    change: &step.change,
                    old_schema: &step.before,
                    new_schema: &step.after,
                };
                fields = self
                    .scripts
                    .execute(&step.change.migration_script(), &context, fields)
                    .map_err(|e| ContentError::Script(e.to_string()))?;
            }
        }

        // content added before a field became required stays valid
        let result = FieldValidator::validate(&plan.target_schema, &fields, ValidationMode::Strict);
        let errors: Vec<String> = result
            .errors
            .into_iter()
            .filter(|issue| issue.issue_type != ValidationIssueType::MissingRequiredField)
            .map(|issue| issue.message)
            .collect();
        if !errors.is_empty() {
            return Err(ContentError::validation(errors.join("; ")));
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::scripts::BuiltinScriptEngine;
    use crate::model::{ContainerVersionTag, FieldSchema, FieldType, Node, Project, Release};
    use crate::store::{InMemoryStore, NodeStore, ProjectStore, SchemaStore};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        schema: SchemaContainer,
        release: Release,
    }

    async fn fixture(changes: Vec<SchemaChange>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let base = SchemaDefinition::new("content")
            .with_field(FieldSchema::new("slug", FieldType::String))
            .with_field(FieldSchema::new("count", FieldType::String))
            .with_segment_field("slug");
        let mut schema = SchemaContainer::new("content".to_string(), base.clone());
        let next = SchemaMutator::apply_changes(&base, &changes).unwrap();
        schema
            .versions
            .push(crate::model::SchemaContainerVersion::new(schema.id.clone(), 1, next, changes));
        store.insert_schema_container(schema.clone()).await.unwrap();

        let root = Node::new("project".to_string(), None, schema.id.clone(), "test".to_string());
        let project = Project::new("demo".to_string(), root.id.clone(), "test".to_string());
        let mut root = root;
        root.project_id = project.id.clone();
        let release = Release::new_initial(project.id.clone(), "initial".to_string(), "test".to_string());
        store.insert_project(project, root, release.clone()).await.unwrap();

        Fixture { store, schema, release }
    }

    async fn add_content(fixture: &Fixture, language: &str, count: &str, publish: bool) -> Id {
        let container = NodeFieldContainer::new(
            crate::model::generate_id(),
            language.to_string(),
            fixture.schema.versions[0].reference(),
            serde_json::from_value(json!({"slug": format!("page-{}", count), "count": count})).unwrap(),
            ContainerVersionTag::initial(),
            None,
            "test".to_string(),
        );
        let mut updates = vec![pointer(&container, &fixture.release.id, ContainerType::Draft)];
        if publish {
            updates.push(pointer(&container, &fixture.release.id, ContainerType::Published));
        }
        let id = container.node_id.clone();
        fixture.store.commit_containers(vec![container], updates).await.unwrap();
        id
    }

    fn pointer(container: &NodeFieldContainer, release_id: &Id, container_type: ContainerType) -> PointerUpdate {
        PointerUpdate {
            node_id: container.node_id.clone(),
            language: container.language.clone(),
            release_id: release_id.clone(),
            container_type,
            expected: None,
            new: Some(container.id.clone()),
        }
    }

    fn executor(store: Arc<InMemoryStore>, scripts: Arc<BuiltinScriptEngine>, policy: MigrationLockPolicy) -> MigrationExecutor<InMemoryStore> {
        MigrationExecutor::new(store, scripts, RetryPolicy::new(5, Duration::ZERO), policy)
    }

    #[tokio::test]
    async fn test_shared_draft_and_published_migrate_once() {
        let fixture = fixture(vec![SchemaChange::change_field_type("count", FieldType::Number)]).await;
        let node_id = add_content(&fixture, "en", "7", true).await;
        let executor = executor(fixture.store.clone(), Arc::new(BuiltinScriptEngine::new()), MigrationLockPolicy::Wait);

        let report = executor.migrate(&fixture.schema.id, 0, 1, &fixture.release.id).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert!(report.is_complete());

        let draft = fixture
            .store
            .get_container_pointer(&node_id, "en", &fixture.release.id, ContainerType::Draft)
            .await
            .unwrap();
        let published = fixture
            .store
            .get_container_pointer(&node_id, "en", &fixture.release.id, ContainerType::Published)
            .await
            .unwrap();
        assert_eq!(draft, published);

        let migrated = fixture.store.get_field_container(&draft.unwrap()).await.unwrap().unwrap();
        assert_eq!(migrated.schema_version, 1);
        assert_eq!(migrated.fields.get("count"), Some(&json!(7)));
        assert_eq!(migrated.version.to_string(), "1.0");
        assert!(migrated.version.is_published());
        assert!(migrated.previous_id.is_some());
    }

    #[tokio::test]
    async fn test_separate_draft_is_tagged_above_migrated_published() {
        let fixture = fixture(vec![SchemaChange::change_field_type("count", FieldType::Number)]).await;
        let node_id = add_content(&fixture, "en", "7", true).await;
        let release_id = &fixture.release.id;
        let published_id = fixture
            .store
            .get_container_pointer(&node_id, "en", release_id, ContainerType::Published)
            .await
            .unwrap()
            .unwrap();
        let published = fixture.store.get_field_container(&published_id).await.unwrap().unwrap();
        let draft = published.successor(
            published.schema_ref(),
            serde_json::from_value(json!({"slug": "page-8", "count": "8"})).unwrap(),
            published.version.next_draft(),
            "test".to_string(),
        );
        let draft_id = draft.id.clone();
        let mut update = pointer(&draft, release_id, ContainerType::Draft);
        update.expected = Some(published_id.clone());
        fixture.store.commit_containers(vec![draft], vec![update]).await.unwrap();

        let report = executor(fixture.store.clone(), Arc::new(BuiltinScriptEngine::new()), MigrationLockPolicy::Wait)
            .migrate(&fixture.schema.id, 0, 1, release_id)
            .await
            .unwrap();
        assert_eq!(report.migrated, 2);

        let mut migrated = Vec::new();
        for container_type in [ContainerType::Published, ContainerType::Draft] {
            let id = fixture
                .store
                .get_container_pointer(&node_id, "en", release_id, container_type)
                .await
                .unwrap()
                .unwrap();
            migrated.push(fixture.store.get_field_container(&id).await.unwrap().unwrap());
        }
        let (new_published, new_draft) = (&migrated[0], &migrated[1]);

        assert_eq!(new_published.version.to_string(), "1.0");
        assert!(new_published.version.is_published());
        assert_eq!(new_published.previous_id.as_ref(), Some(&published_id));
        assert_eq!(new_published.fields.get("count"), Some(&json!(7)));

        assert_eq!(new_draft.version.to_string(), "1.1");
        assert!(!new_draft.version.is_published());
        assert_eq!(new_draft.previous_id.as_ref(), Some(&draft_id));
        assert_eq!(new_draft.fields.get("count"), Some(&json!(8)));
    }

    #[tokio::test]
    async fn test_validation_failure_is_recorded_and_batch_continues() {
        let fixture = fixture(vec![SchemaChange::change_field_type("count", FieldType::Number)
            .with_custom_migration_script("keep")])
        .await;
        let scripts = Arc::new(BuiltinScriptEngine::new());
        scripts.register("keep", |_, fields| Ok(fields));
        add_content(&fixture, "en", "1", false).await;
        add_content(&fixture, "de", "2", false).await;

        let report = executor(fixture.store.clone(), scripts, MigrationLockPolicy::Wait)
            .migrate(&fixture.schema.id, 0, 1, &fixture.release.id)
            .await
            .unwrap();
        // "keep" leaves strings in a number field
        assert_eq!(report.migrated, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].code, "validation_error");
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let fixture = fixture(vec![SchemaChange::remove_field("count")]).await;
        add_content(&fixture, "en", "1", true).await;
        fixture.store.inject_write_conflicts(2);

        let report = executor(fixture.store.clone(), Arc::new(BuiltinScriptEngine::new()), MigrationLockPolicy::Wait)
            .migrate(&fixture.schema.id, 0, 1, &fixture.release.id)
            .await
            .unwrap();
        assert_eq!(report.migrated, 1);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_busy_target() {
        let fixture = fixture(vec![SchemaChange::remove_field("count")]).await;
        let executor = executor(fixture.store.clone(), Arc::new(BuiltinScriptEngine::new()), MigrationLockPolicy::Reject);

        let _held = executor.acquire(&fixture.schema.id, &fixture.release.id).await.unwrap();
        let second = executor.migrate(&fixture.schema.id, 0, 1, &fixture.release.id).await;
        assert!(matches!(second, Err(ContentError::ConcurrencyConflict { .. })));

        let other_release = "other".to_string();
        assert!(executor.acquire(&fixture.schema.id, &other_release).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_entries_are_dropped_when_idle() {
        let fixture = fixture(vec![SchemaChange::remove_field("count")]).await;
        add_content(&fixture, "en", "1", true).await;
        let executor = Arc::new(executor(
            fixture.store.clone(),
            Arc::new(BuiltinScriptEngine::new()),
            MigrationLockPolicy::Wait,
        ));

        // a waiting second migration keeps the entry alive until it is done
        let held = executor.acquire(&fixture.schema.id, &fixture.release.id).await.unwrap();
        let waiting = {
            let (executor, schema_id, release_id) =
                (executor.clone(), fixture.schema.id.clone(), fixture.release.id.clone());
            tokio::spawn(async move { executor.migrate(&schema_id, 0, 1, &release_id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.locks.lock().len(), 1);
        drop(held);

        let report = waiting.await.unwrap().unwrap();
        assert_eq!(report.migrated, 1);
        assert!(executor.locks.lock().is_empty());

        executor.migrate(&fixture.schema.id, 0, 1, &fixture.release.id).await.unwrap();
        assert!(executor.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_range() {
        let fixture = fixture(vec![SchemaChange::remove_field("count")]).await;
        let executor = executor(fixture.store.clone(), Arc::new(BuiltinScriptEngine::new()), MigrationLockPolicy::Wait);
        assert!(matches!(
            executor.migrate(&fixture.schema.id, 1, 1, &fixture.release.id).await,
            Err(ContentError::Validation(_))
        ));
        assert!(matches!(
            executor.migrate(&fixture.schema.id, 0, 4, &fixture.release.id).await,
            Err(ContentError::UnknownEntity { .. })
        ));
    }
}
