pub mod content;
pub mod convert;
pub mod migration;
pub mod mutator;
pub mod permissions;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod scripts;
pub mod validate;
pub mod versioning;
pub mod webroot;

pub use content::*;
pub use convert::*;
pub use migration::*;
pub use mutator::*;
pub use permissions::*;
pub use registry::*;
pub use repository::*;
pub use retry::*;
pub use scripts::*;
pub use validate::*;
pub use versioning::*;
pub use webroot::*;
