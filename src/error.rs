//! Error types of the content core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, ContentError>;

#[derive(Error, Debug)]
pub enum ContentError {
    /// Malformed change, invalid type transition or content that does not fit its schema
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Migration script failed: {0}")]
    Script(String),

    #[error("Node not found for path: {path}")]
    NotFound { path: String },

    #[error("Missing read permission on node {node_id}")]
    Forbidden { node_id: String },

    #[error("Concurrent modification of {target} could not be resolved, retry the operation")]
    ConcurrencyConflict { target: String },

    #[error("{kind} not found: {id}")]
    UnknownEntity { kind: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ContentError {
    pub fn validation(message: impl Into<String>) -> Self {
        ContentError::Validation(message.into())
    }

    pub fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        ContentError::UnknownEntity {
            kind,
            id: id.into(),
        }
    }

    /// Whether the underlying store reported a transient write conflict
    pub fn is_write_conflict(&self) -> bool {
        match self {
            ContentError::Store(e) => e.downcast_ref::<crate::store::WriteConflict>().is_some(),
            _ => false,
        }
    }

    /// Stable machine readable code, used by the CLI output
    pub fn code(&self) -> &'static str {
        match self {
            ContentError::Validation(_) => "validation_error",
            ContentError::Script(_) => "script_error",
            ContentError::NotFound { .. } => "node_not_found_for_path",
            ContentError::Forbidden { .. } => "error_missing_perm",
            ContentError::ConcurrencyConflict { .. } => "concurrency_conflict",
            ContentError::UnknownEntity { .. } => "entity_not_found",
            ContentError::Store(_) => "store_error",
        }
    }
}
