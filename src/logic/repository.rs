use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{ContentError, Result};
use crate::logic::content::ContentService;
use crate::logic::migration::{MigrationExecutor, MigrationLockPolicy, MigrationReport};
use crate::logic::permissions::{AllowAll, PermissionChecker};
use crate::logic::registry::SchemaRegistry;
use crate::logic::scripts::{BuiltinScriptEngine, ScriptEngine};
use crate::logic::webroot::{ResolvedNode, WebRootRequest, WebRootResolver};
use crate::logic::RetryPolicy;
use crate::model::{Id, SchemaChange, SchemaVersionRef};
use crate::store::Store;

/// Entry point bundling the operations offered to transport layers
pub struct ContentRepository<S: Store> {
    pub schemas: SchemaRegistry<S>,
    pub content: ContentService<S>,
    pub migrations: MigrationExecutor<S>,
    pub webroot: WebRootResolver<S>,
}

pub struct ContentRepositoryBuilder<S: Store> {
    store: Arc<S>,
    retry: RetryPolicy,
    lock_policy: MigrationLockPolicy,
    default_language: String,
    scripts: Arc<dyn ScriptEngine>,
    permissions: Arc<dyn PermissionChecker>,
}

impl<S: Store> ContentRepositoryBuilder<S> {
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn lock_policy(mut self, lock_policy: MigrationLockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    pub fn default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn scripts(mut self, scripts: Arc<dyn ScriptEngine>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn build(self) -> ContentRepository<S> {
        ContentRepository {
            schemas: SchemaRegistry::new(self.store.clone(), self.retry),
            content: ContentService::new(self.store.clone(), self.retry, self.default_language.clone()),
            migrations: MigrationExecutor::new(self.store.clone(), self.scripts, self.retry, self.lock_policy),
            webroot: WebRootResolver::new(self.store, self.permissions, self.default_language),
        }
    }
}

impl<S: Store> ContentRepository<S> {
    pub fn builder(store: Arc<S>) -> ContentRepositoryBuilder<S> {
        ContentRepositoryBuilder {
            store,
            retry: RetryPolicy::default(),
            lock_policy: MigrationLockPolicy::default(),
            default_language: "en".to_string(),
            scripts: Arc::new(BuiltinScriptEngine::new()),
            permissions: Arc::new(AllowAll),
        }
    }

    /// Repository configured from the application settings
    pub fn from_config(store: Arc<S>, config: &AppConfig) -> ContentRepositoryBuilder<S> {
        Self::builder(store)
            .retry(config.retry_policy())
            .lock_policy(config.content.migration_lock)
            .default_language(config.content.default_language.clone())
    }

    /// Validate and append a change chain, returning the new version
    pub async fn apply_changes(&self, schema_id: &Id, changes: Vec<SchemaChange>) -> Result<SchemaVersionRef> {
        self.schemas.apply_changes(schema_id, changes).await
    }

    pub async fn migrate(&self, schema_id: &Id, from: u32, to: u32, release_id: &Id) -> Result<MigrationReport> {
        self.migrations.migrate(schema_id, from, to, release_id).await
    }

    /// Bring all content of `release` bound to older versions of the schema
    /// to its latest version
    pub async fn migrate_to_latest(&self, schema_id: &Id, release_id: &Id) -> Result<MigrationReport> {
        let schema = self.schemas.get(schema_id).await?;
        let latest = schema
            .latest_version()
            .map(|version| version.version)
            .ok_or_else(|| ContentError::unknown("Schema version", schema_id.as_str()))?;
        if latest == 0 {
            return Ok(MigrationReport {
                schema_container_id: schema_id.clone(),
                release_id: release_id.clone(),
                from_version: 0,
                to_version: 0,
                migrated: 0,
                skipped: 0,
                failures: Vec::new(),
            });
        }
        self.migrate(schema_id, 0, latest, release_id).await
    }

    pub async fn resolve_path(&self, request: &WebRootRequest) -> Result<ResolvedNode> {
        self.webroot.resolve(request).await
    }
}
