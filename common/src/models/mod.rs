//! Shared data models.

pub mod backend;
pub mod query;
pub mod value;

// Re-export commonly used types
pub use backend::{BackendConfig, BackendRegistry, EngineKind};
pub use query::{OutputFormat, QueryResult, Row, SqlQueryParams};
pub use value::Value;
