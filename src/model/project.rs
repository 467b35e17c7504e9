use crate::model::{generate_id, now_rfc3339, Id};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub root_node_id: Id,
    pub created_at: String, // ISO 8601 timestamp
    pub created_by: String,
}

impl Project {
    pub fn new(name: String, root_node_id: Id, created_by: String) -> Self {
        Self {
            id: generate_id(),
            name,
            root_node_id,
            created_at: now_rfc3339(),
            created_by,
        }
    }
}

/// A content deployment branch of a project. Nodes carry independent
/// draft/published state per release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub parent_release_id: Option<Id>, // Which release this was created from (within same project)
    /// Position in the project's creation order; the highest one is "latest"
    pub sequence: u64,
    pub created_at: String,
    pub created_by: String,
}

impl Release {
    pub fn new_initial(project_id: Id, name: String, created_by: String) -> Self {
        Self {
            id: generate_id(),
            project_id,
            name,
            parent_release_id: None, // Initial release has no parent
            sequence: 0,
            created_at: now_rfc3339(),
            created_by,
        }
    }

    pub fn new_from_release(parent: &Release, name: String, created_by: String) -> Self {
        Self {
            id: generate_id(),
            project_id: parent.project_id.clone(),
            name,
            parent_release_id: Some(parent.id.clone()),
            sequence: parent.sequence + 1,
            created_at: now_rfc3339(),
            created_by,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.parent_release_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_derivation() {
        let initial = Release::new_initial("p1".to_string(), "dummy".to_string(), "admin".to_string());
        assert!(initial.is_initial());

        let next = Release::new_from_release(&initial, "newrelease".to_string(), "admin".to_string());
        assert_eq!(next.parent_release_id.as_deref(), Some(initial.id.as_str()));
        assert_eq!(next.sequence, 1);
        assert_eq!(next.project_id, "p1");
        assert_ne!(next.id, initial.id);
    }
}
