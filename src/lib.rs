pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use error::{ContentError, Result};

// Export logic types
pub use logic::{
    BuiltinScriptEngine, ContentRepository, ContentService, MigrationExecutor, MigrationReport, ResolvedNode,
    RetryPolicy, SchemaMutator, SchemaRegistry, WebRootRequest, WebRootResolver,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{InMemoryStore, PostgresStore, Store};
