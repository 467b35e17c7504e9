use crate::error::{ContentError, Result};
use crate::model::{ContainerType, Id, NodeFieldContainer, Project, Release};
use crate::store::Store;

/// Look a project up by id first, then by name
pub async fn find_project<S: Store + ?Sized>(store: &S, id_or_name: &str) -> Result<Project> {
    if let Some(project) = store.get_project(&id_or_name.to_string()).await? {
        return Ok(project);
    }
    store
        .find_project_by_name(id_or_name)
        .await?
        .ok_or_else(|| ContentError::unknown("Project", id_or_name))
}

/// The named release of a project (by id or name), or its latest release
pub async fn find_release<S: Store + ?Sized>(
    store: &S,
    project_id: &Id,
    release: Option<&str>,
) -> Result<Release> {
    let Some(id_or_name) = release else {
        return store
            .get_latest_release(project_id)
            .await?
            .ok_or_else(|| ContentError::unknown("Release", format!("latest of {}", project_id)));
    };
    if let Some(release) = store.get_release(project_id, &id_or_name.to_string()).await? {
        return Ok(release);
    }
    store
        .list_releases(project_id)
        .await?
        .into_iter()
        .find(|release| release.name == id_or_name)
        .ok_or_else(|| ContentError::unknown("Release", id_or_name))
}

/// The container `node` currently shows in `language` for `release` and `mode`.
/// A pure lookup: no fallback to other releases or languages.
pub async fn resolve_container<S: Store + ?Sized>(
    store: &S,
    node_id: &Id,
    language: &str,
    release_id: &Id,
    mode: ContainerType,
) -> anyhow::Result<Option<NodeFieldContainer>> {
    match store
        .get_container_pointer(node_id, language, release_id, mode)
        .await?
    {
        Some(container_id) => store.get_field_container(&container_id).await,
        None => Ok(None),
    }
}

/// Whether a node exists in `release` and `mode`, i.e. has a container in any language
pub async fn node_exists<S: Store + ?Sized>(
    store: &S,
    node_id: &Id,
    release_id: &Id,
    mode: ContainerType,
) -> anyhow::Result<bool> {
    Ok(!store.list_containers(node_id, release_id, mode).await?.is_empty())
}
