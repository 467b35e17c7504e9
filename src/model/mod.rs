pub mod change;
pub mod common;
pub mod node;
pub mod project;
pub mod schema;
pub mod schema_container;
pub mod user_context;

pub use change::*;
pub use common::*;
pub use node::*;
pub use project::*;
pub use schema::*;
pub use schema_container::*;
pub use user_context::*;
