use anyhow::{anyhow, Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::model::{
    ContainerPointer, ContainerType, FieldMap, Id, Node, NodeFieldContainer, PointerUpdate, Project, Release,
    SchemaChange, SchemaContainer, SchemaContainerVersion, SchemaDefinition,
};
use crate::store::traits::{NodeStore, ProjectStore, SchemaStore, Store, WriteConflict};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_content.sql");

/// SQLSTATEs reported when a concurrent transaction got there first
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";

const CONTAINER_COLUMNS: &str = "id, node_id, language, schema_container_id, schema_version, fields, version, previous_id, edited_by, edited_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the tables if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        let script: String = SCHEMA_SQL
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run migration statement: {}", statement))?;
        }
        log::info!("Database schema is up to date");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_schema_container(&self, row: &PgRow) -> Result<SchemaContainer> {
        let id: String = row.try_get("id")?;
        let rows = sqlx::query(
            "SELECT container_id, version, definition, changes, fingerprint, created_at FROM schema_versions WHERE container_id = $1 ORDER BY version",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch schema versions")?;

        Ok(SchemaContainer {
            id,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            versions: rows.iter().map(schema_version_from_row).collect::<Result<_>>()?,
        })
    }
}

/// Turn races lost against another transaction into `WriteConflict`
fn write_error(error: sqlx::Error, target: &str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &error {
        if matches!(db.code().as_deref(), Some(UNIQUE_VIOLATION) | Some(SERIALIZATION_FAILURE)) {
            return WriteConflict::error(target);
        }
    }
    anyhow::Error::new(error).context(format!("Failed to write {}", target))
}

fn project_from_row(row: &PgRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        root_node_id: row.try_get("root_node_id")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
    })
}

fn release_from_row(row: &PgRow) -> Result<Release> {
    let sequence: i64 = row.try_get("sequence")?;
    Ok(Release {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        parent_release_id: row.try_get("parent_release_id")?,
        sequence: sequence as u64,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
    })
}

fn schema_version_from_row(row: &PgRow) -> Result<SchemaContainerVersion> {
    let version: i32 = row.try_get("version")?;
    let Json(schema): Json<SchemaDefinition> = row.try_get("definition")?;
    let Json(changes): Json<Vec<SchemaChange>> = row.try_get("changes")?;
    Ok(SchemaContainerVersion {
        container_id: row.try_get("container_id")?,
        version: version as u32,
        schema,
        changes,
        fingerprint: row.try_get("fingerprint")?,
        created_at: row.try_get("created_at")?,
    })
}

fn node_from_row(row: &PgRow) -> Result<Node> {
    Ok(Node {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        parent_id: row.try_get("parent_id")?,
        schema_container_id: row.try_get("schema_container_id")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn container_from_row(row: &PgRow) -> Result<NodeFieldContainer> {
    let schema_version: i32 = row.try_get("schema_version")?;
    let Json(fields): Json<FieldMap> = row.try_get("fields")?;
    let version: String = row.try_get("version")?;
    Ok(NodeFieldContainer {
        id: row.try_get("id")?,
        node_id: row.try_get("node_id")?,
        language: row.try_get("language")?,
        schema_container_id: row.try_get("schema_container_id")?,
        schema_version: schema_version as u32,
        fields,
        version: version.parse().map_err(|e: String| anyhow!(e))?,
        previous_id: row.try_get("previous_id")?,
        edited_by: row.try_get("edited_by")?,
        edited_at: row.try_get("edited_at")?,
    })
}

fn pointer_from_row(row: &PgRow) -> Result<ContainerPointer> {
    let container_type: String = row.try_get("container_type")?;
    let schema_version: i32 = row.try_get("schema_version")?;
    Ok(ContainerPointer {
        node_id: row.try_get("node_id")?,
        language: row.try_get("language")?,
        release_id: row.try_get("release_id")?,
        container_type: container_type.parse().map_err(|e: String| anyhow!(e))?,
        container_id: row.try_get("container_id")?,
        schema_container_id: row.try_get("schema_container_id")?,
        schema_version: schema_version as u32,
    })
}

async fn insert_node_row(tx: &mut Transaction<'_, Postgres>, node: &Node) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO nodes (id, project_id, parent_id, schema_container_id, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&node.id)
    .bind(&node.project_id)
    .bind(&node.parent_id)
    .bind(&node.schema_container_id)
    .bind(&node.created_by)
    .bind(&node.created_at)
    .execute(&mut **tx)
    .await
    .context("Failed to insert node")?;
    Ok(())
}

async fn insert_schema_version(tx: &mut Transaction<'_, Postgres>, version: &SchemaContainerVersion) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schema_versions (container_id, version, definition, changes, fingerprint, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&version.container_id)
    .bind(version.version as i32)
    .bind(Json(&version.schema))
    .bind(Json(&version.changes))
    .bind(&version.fingerprint)
    .bind(&version.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error(e, &format!("schema {} version {}", version.container_id, version.version)))?;
    Ok(())
}

#[async_trait::async_trait]
impl ProjectStore for PostgresStore {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, root_node_id, created_at, created_by FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project")?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, root_node_id, created_at, created_by FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project by name")?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn insert_project(&self, project: Project, root: Node, initial_release: Release) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, root_node_id, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.root_node_id)
        .bind(&project.created_at)
        .bind(&project.created_by)
        .execute(&mut *tx)
        .await
        .context("Failed to insert project")?;

        insert_node_row(&mut tx, &root).await?;

        sqlx::query(
            r#"
            INSERT INTO releases (id, project_id, name, parent_release_id, sequence, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&initial_release.id)
        .bind(&initial_release.project_id)
        .bind(&initial_release.name)
        .bind(&initial_release.parent_release_id)
        .bind(initial_release.sequence as i64)
        .bind(&initial_release.created_at)
        .bind(&initial_release.created_by)
        .execute(&mut *tx)
        .await
        .context("Failed to insert initial release")?;

        tx.commit().await.context("Failed to commit project")?;
        Ok(())
    }

    async fn list_releases(&self, project_id: &Id) -> Result<Vec<Release>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, parent_release_id, sequence, created_at, created_by FROM releases WHERE project_id = $1 ORDER BY sequence",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list releases")?;
        rows.iter().map(release_from_row).collect()
    }

    async fn get_release(&self, project_id: &Id, release_id: &Id) -> Result<Option<Release>> {
        let row = sqlx::query(
            "SELECT id, project_id, name, parent_release_id, sequence, created_at, created_by FROM releases WHERE project_id = $1 AND id = $2",
        )
        .bind(project_id)
        .bind(release_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch release")?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn get_latest_release(&self, project_id: &Id) -> Result<Option<Release>> {
        let row = sqlx::query(
            "SELECT id, project_id, name, parent_release_id, sequence, created_at, created_by FROM releases WHERE project_id = $1 ORDER BY sequence DESC LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest release")?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn insert_release(&self, release: Release) -> Result<()> {
        let parent_id = release
            .parent_release_id
            .clone()
            .ok_or_else(|| anyhow!("Release '{}' has no parent release", release.name))?;
        let target = format!("latest release of project {}", release.project_id);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let latest: Option<String> = sqlx::query_scalar(
            "SELECT id FROM releases WHERE project_id = $1 ORDER BY sequence DESC LIMIT 1 FOR UPDATE",
        )
        .bind(&release.project_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock latest release")?;
        if latest.as_ref() != Some(&parent_id) {
            return Err(WriteConflict::error(target));
        }

        sqlx::query(
            r#"
            INSERT INTO releases (id, project_id, name, parent_release_id, sequence, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&release.id)
        .bind(&release.project_id)
        .bind(&release.name)
        .bind(&release.parent_release_id)
        .bind(release.sequence as i64)
        .bind(&release.created_at)
        .bind(&release.created_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &target))?;

        sqlx::query(
            r#"
            INSERT INTO container_pointers (node_id, language, release_id, container_type, container_id, schema_container_id, schema_version)
            SELECT node_id, language, $1, container_type, container_id, schema_container_id, schema_version
            FROM container_pointers
            WHERE release_id = $2
            "#,
        )
        .bind(&release.id)
        .bind(&parent_id)
        .execute(&mut *tx)
        .await
        .context("Failed to copy pointers of the parent release")?;

        tx.commit().await.map_err(|e| write_error(e, &target))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SchemaStore for PostgresStore {
    async fn get_schema_container(&self, id: &Id) -> Result<Option<SchemaContainer>> {
        let row = sqlx::query("SELECT id, name, created_at FROM schema_containers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch schema container")?;
        match row {
            Some(row) => Ok(Some(self.load_schema_container(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_schema_container_by_name(&self, name: &str) -> Result<Option<SchemaContainer>> {
        let row = sqlx::query("SELECT id, name, created_at FROM schema_containers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch schema container by name")?;
        match row {
            Some(row) => Ok(Some(self.load_schema_container(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_schema_containers(&self) -> Result<Vec<SchemaContainer>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM schema_containers ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list schema containers")?;

        let mut containers = Vec::with_capacity(rows.len());
        for row in &rows {
            containers.push(self.load_schema_container(row).await?);
        }
        Ok(containers)
    }

    async fn insert_schema_container(&self, container: SchemaContainer) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("INSERT INTO schema_containers (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(&container.id)
            .bind(&container.name)
            .bind(&container.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert schema container")?;
        for version in &container.versions {
            insert_schema_version(&mut tx, version).await?;
        }

        tx.commit().await.context("Failed to commit schema container")?;
        Ok(())
    }

    async fn append_schema_version(&self, expected_latest: u32, version: SchemaContainerVersion) -> Result<()> {
        let target = format!("schema {}", version.container_id);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let locked: Option<String> = sqlx::query_scalar("SELECT id FROM schema_containers WHERE id = $1 FOR UPDATE")
            .bind(&version.container_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock schema container")?;
        if locked.is_none() {
            return Err(anyhow!("Schema container '{}' not found", version.container_id));
        }

        let latest: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_versions WHERE container_id = $1")
            .bind(&version.container_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read latest schema version")?;
        if latest != Some(expected_latest as i32) || version.version != expected_latest + 1 {
            return Err(WriteConflict::error(target));
        }

        insert_schema_version(&mut tx, &version).await?;
        tx.commit().await.map_err(|e| write_error(e, &target))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeStore for PostgresStore {
    async fn get_node(&self, id: &Id) -> Result<Option<Node>> {
        let row = sqlx::query(
            "SELECT id, project_id, parent_id, schema_container_id, created_by, created_at FROM nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch node")?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn insert_node(&self, node: Node) -> Result<()> {
        if node.parent_id.is_none() {
            return Err(anyhow!("Only project bootstrap may create root nodes"));
        }
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        insert_node_row(&mut tx, &node).await?;
        tx.commit().await.context("Failed to commit node")?;
        Ok(())
    }

    async fn list_children(&self, parent_id: &Id) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT id, project_id, parent_id, schema_container_id, created_by, created_at FROM nodes WHERE parent_id = $1 ORDER BY id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list child nodes")?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_field_container(&self, id: &Id) -> Result<Option<NodeFieldContainer>> {
        let row = sqlx::query(&format!("SELECT {} FROM field_containers WHERE id = $1", CONTAINER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch field container")?;
        row.as_ref().map(container_from_row).transpose()
    }

    async fn get_container_pointer(
        &self,
        node_id: &Id,
        language: &str,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Option<Id>> {
        sqlx::query_scalar(
            r#"
            SELECT container_id FROM container_pointers
            WHERE node_id = $1 AND language = $2 AND release_id = $3 AND container_type = $4
            "#,
        )
        .bind(node_id)
        .bind(language)
        .bind(release_id)
        .bind(container_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch container pointer")
    }

    async fn list_containers(
        &self,
        node_id: &Id,
        release_id: &Id,
        container_type: ContainerType,
    ) -> Result<Vec<NodeFieldContainer>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.node_id, c.language, c.schema_container_id, c.schema_version, c.fields,
                   c.version, c.previous_id, c.edited_by, c.edited_at
            FROM container_pointers p
            JOIN field_containers c ON c.id = p.container_id
            WHERE p.node_id = $1 AND p.release_id = $2 AND p.container_type = $3
            ORDER BY p.language
            "#,
        )
        .bind(node_id)
        .bind(release_id)
        .bind(container_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list field containers")?;
        rows.iter().map(container_from_row).collect()
    }

    async fn list_pointers_for_version(
        &self,
        schema_container_id: &Id,
        schema_version: u32,
        release_id: &Id,
    ) -> Result<Vec<ContainerPointer>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, language, release_id, container_type, container_id, schema_container_id, schema_version
            FROM container_pointers
            WHERE schema_container_id = $1 AND schema_version = $2 AND release_id = $3
            ORDER BY node_id, language, container_type
            "#,
        )
        .bind(schema_container_id)
        .bind(schema_version as i32)
        .bind(release_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pointers for schema version")?;
        rows.iter().map(pointer_from_row).collect()
    }

    async fn commit_containers(
        &self,
        containers: Vec<NodeFieldContainer>,
        updates: Vec<PointerUpdate>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for container in &containers {
            sqlx::query(&format!(
                "INSERT INTO field_containers ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                CONTAINER_COLUMNS
            ))
            .bind(&container.id)
            .bind(&container.node_id)
            .bind(&container.language)
            .bind(&container.schema_container_id)
            .bind(container.schema_version as i32)
            .bind(Json(&container.fields))
            .bind(container.version.to_string())
            .bind(&container.previous_id)
            .bind(&container.edited_by)
            .bind(&container.edited_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert field container {}", container.id))?;
        }

        for update in &updates {
            let target = format!(
                "{} pointer of node {} ({}, release {})",
                update.container_type, update.node_id, update.language, update.release_id
            );
            let affected = match (&update.expected, &update.new) {
                (None, Some(new)) => sqlx::query(
                    r#"
                    INSERT INTO container_pointers (node_id, language, release_id, container_type, container_id, schema_container_id, schema_version)
                    SELECT $1, $2, $3, $4, id, schema_container_id, schema_version FROM field_containers WHERE id = $5
                    "#,
                )
                .bind(&update.node_id)
                .bind(&update.language)
                .bind(&update.release_id)
                .bind(update.container_type.as_str())
                .bind(new)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(e, &target))?
                .rows_affected(),
                (Some(expected), Some(new)) => sqlx::query(
                    r#"
                    UPDATE container_pointers p
                    SET container_id = c.id, schema_container_id = c.schema_container_id, schema_version = c.schema_version
                    FROM field_containers c
                    WHERE c.id = $5 AND p.node_id = $1 AND p.language = $2 AND p.release_id = $3
                      AND p.container_type = $4 AND p.container_id = $6
                    "#,
                )
                .bind(&update.node_id)
                .bind(&update.language)
                .bind(&update.release_id)
                .bind(update.container_type.as_str())
                .bind(new)
                .bind(expected)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(e, &target))?
                .rows_affected(),
                (Some(expected), None) => sqlx::query(
                    r#"
                    DELETE FROM container_pointers
                    WHERE node_id = $1 AND language = $2 AND release_id = $3 AND container_type = $4 AND container_id = $5
                    "#,
                )
                .bind(&update.node_id)
                .bind(&update.language)
                .bind(&update.release_id)
                .bind(update.container_type.as_str())
                .bind(expected)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(e, &target))?
                .rows_affected(),
                (None, None) => {
                    let exists: bool = sqlx::query_scalar(
                        r#"
                        SELECT EXISTS (SELECT 1 FROM container_pointers
                        WHERE node_id = $1 AND language = $2 AND release_id = $3 AND container_type = $4)
                        "#,
                    )
                    .bind(&update.node_id)
                    .bind(&update.language)
                    .bind(&update.release_id)
                    .bind(update.container_type.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .context("Failed to check container pointer")?;
                    u64::from(!exists)
                }
            };
            if affected != 1 {
                return Err(WriteConflict::error(target));
            }
        }

        tx.commit().await.map_err(|e| write_error(e, "field containers"))?;
        Ok(())
    }
}

impl Store for PostgresStore {}
