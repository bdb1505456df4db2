//! Shared building blocks for the SQL query gateway.
//!
//! Holds configuration, error types, scalar/row models, SQL classification
//! and the HTTP middleware every service binary runs behind.

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
