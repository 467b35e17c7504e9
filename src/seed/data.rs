use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::logic::ContentRepository;
use crate::model::{FieldMap, FieldSchema, FieldType, Id, SchemaDefinition, UserContext};
use crate::store::Store;

pub const DEMO_PROJECT: &str = "dummy";

/// Ids of everything the demo content creates
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoContent {
    pub project_id: Id,
    pub release_id: Id,
    pub root_id: Id,
    pub folder_schema_id: Id,
    pub content_schema_id: Id,
    pub binary_schema_id: Id,
    pub news_id: Id,
    pub news_2015_folder_id: Id,
    pub news_2015_id: Id,
    pub binary_id: Id,
    pub products_id: Id,
}

fn folder_schema() -> SchemaDefinition {
    SchemaDefinition::new("folder")
        .with_field(FieldSchema::new("name", FieldType::String).with_label("Name").with_required(true))
        .with_display_field("name")
        .with_segment_field("name")
        .with_container(true)
}

fn content_schema() -> SchemaDefinition {
    SchemaDefinition::new("content")
        .with_field(FieldSchema::new("filename", FieldType::String).with_label("Filename"))
        .with_field(FieldSchema::new("title", FieldType::String).with_label("Title").with_required(true))
        .with_field(FieldSchema::new("teaser", FieldType::String).with_label("Teaser"))
        .with_field(FieldSchema::new("content", FieldType::Html).with_label("Content"))
        .with_display_field("title")
        .with_segment_field("filename")
}

fn binary_schema() -> SchemaDefinition {
    SchemaDefinition::new("binary-content")
        .with_field(FieldSchema::new("name", FieldType::String).with_label("Name"))
        .with_field(FieldSchema::new("binary", FieldType::Binary).with_label("Binary"))
        .with_display_field("name")
        .with_segment_field("binary")
}

fn fields(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => FieldMap::new(),
    }
}

/// Create the demo project with a small, fully published tree:
///
/// ```text
/// /News                      (en "News", de "Neuigkeiten")
/// /News/2015                 (en, de)
/// /News/2015/News_2015.en.html   de: News_2015.de.html
/// /News/2015/somefile.dat    binary content, en only
/// /Products                  (en "Products", de "Produkte")
/// ```
pub async fn load_demo_content<S: Store>(repository: &ContentRepository<S>) -> Result<DemoContent> {
    let user = UserContext::system();
    let folder = repository.schemas.create_schema_container("folder", folder_schema()).await?;
    let content = repository.schemas.create_schema_container("content", content_schema()).await?;
    let binary = repository
        .schemas
        .create_schema_container("binary-content", binary_schema())
        .await?;

    let service = &repository.content;
    let (project, release) = service.bootstrap_project(DEMO_PROJECT, &folder.id, &user).await?;
    let root_id = project.root_node_id.clone();

    let news = service.create_node(&project.id, &root_id, &folder.id, &user).await?;
    let y2015 = service.create_node(&project.id, &news.id, &folder.id, &user).await?;
    let news_2015 = service.create_node(&project.id, &y2015.id, &content.id, &user).await?;
    let somefile = service.create_node(&project.id, &y2015.id, &binary.id, &user).await?;
    let products = service.create_node(&project.id, &root_id, &folder.id, &user).await?;

    let translations = [
        (&news.id, "en", json!({"name": "News"})),
        (&news.id, "de", json!({"name": "Neuigkeiten"})),
        (&y2015.id, "en", json!({"name": "2015"})),
        (&y2015.id, "de", json!({"name": "2015"})),
        (
            &news_2015.id,
            "en",
            json!({
                "filename": "News_2015.en.html",
                "title": "News 2015",
                "teaser": "News for 2015",
                "content": "<p>Content for news 2015</p>"
            }),
        ),
        (
            &news_2015.id,
            "de",
            json!({
                "filename": "News_2015.de.html",
                "title": "Neuigkeiten 2015",
                "teaser": "Neuigkeiten für 2015",
                "content": "<p>Inhalt für Neuigkeiten 2015</p>"
            }),
        ),
        (
            &somefile.id,
            "en",
            json!({
                "name": "somefile",
                "binary": {"fileName": "somefile.dat", "mimeType": "application/octet-stream", "fileSize": 8000}
            }),
        ),
        (&products.id, "en", json!({"name": "Products"})),
        (&products.id, "de", json!({"name": "Produkte"})),
    ];

    for (node_id, language, values) in translations {
        service
            .save_draft(node_id, language, Some(release.id.as_str()), fields(values), &user)
            .await?;
        service
            .publish(node_id, language, Some(release.id.as_str()), &user)
            .await?;
    }

    log::info!("Loaded demo project '{}' ({})", DEMO_PROJECT, project.id);
    Ok(DemoContent {
        project_id: project.id,
        release_id: release.id,
        root_id,
        folder_schema_id: folder.id,
        content_schema_id: content.id,
        binary_schema_id: binary.id,
        news_id: news.id,
        news_2015_folder_id: y2015.id,
        news_2015_id: news_2015.id,
        binary_id: somefile.id,
        products_id: products.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_demo_content_loads() {
        let repository = ContentRepository::builder(Arc::new(InMemoryStore::new())).build();
        let demo = load_demo_content(&repository).await.unwrap();
        assert_eq!(repository.content.get_project(DEMO_PROJECT).await.unwrap().id, demo.project_id);
        assert!(load_demo_content(&repository).await.is_err());
    }
}
