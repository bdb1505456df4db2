//! Response body types.
//!
//! The query endpoint answers with one of a handful of fixed shapes; they
//! live here so the OpenAPI document and the handlers agree on them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::query::Row;

/// Acknowledgment message for statements that return no rows.
pub const QUERY_SUCCESS_MSG: &str = "Query executed successfully";

/// Error body, shared by every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Human-readable error message.
    pub detail: String,
}

/// Body returned for a successfully executed non-data statement.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    /// The fixed acknowledgment.
    pub fn executed() -> Self {
        Self {
            status: QUERY_SUCCESS_MSG.to_string(),
        }
    }
}

/// JSON body for a data-returning statement.
#[derive(Debug, Serialize, ToSchema)]
pub struct RowSet {
    /// Result rows, each a column-name to value mapping in column order.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,

    /// Whether rows beyond the JSON cap were dropped.
    pub truncated: bool,
}

/// Pool snapshot for a single backend.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackendStatus {
    /// Logical backend name (the `cloud` query parameter).
    pub name: String,
    /// Engine family.
    pub engine: String,
    /// Open connections, idle or in use.
    pub size: u32,
    /// Idle connections.
    pub idle: u32,
    /// Configured maximum pool size.
    pub max_size: u32,
}

/// Health check body.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub backends: Vec<BackendStatus>,
}
