use serde::{Deserialize, Serialize};

/// The caller on whose behalf an operation runs. Authentication happens
/// outside this crate; the context only carries the resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    /// Admins bypass read permission checks
    #[serde(default)]
    pub admin: bool,
}

impl UserContext {
    /// Create a new UserContext with just a user ID
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_email: None,
            user_name: None,
            admin: false,
        }
    }

    /// Create a UserContext with full user information
    pub fn with_details(user_id: String, email: Option<String>, name: Option<String>) -> Self {
        Self {
            user_id,
            user_email: email,
            user_name: name,
            admin: false,
        }
    }

    /// Create a system user context for internal operations such as migrations
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_email: Some("system@content-repo.internal".to_string()),
            user_name: Some("System".to_string()),
            admin: true,
        }
    }

    /// Create an anonymous reader
    pub fn anonymous() -> Self {
        Self::new("anonymous".to_string())
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
