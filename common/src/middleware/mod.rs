//! Middleware components for all services.

pub mod auth;
pub mod cors;
pub mod rate_limit;
pub mod request_id;
pub mod request_log;

// Re-export commonly used types
pub use auth::{auth_middleware, ApiKeyAuth};
pub use cors::cors_layer;
pub use rate_limit::{rate_limit_middleware, RateLimit, RateLimiter};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use request_log::{extract_client_ip, request_log_middleware};
