//! Application state for the query gateway.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::AppResult;
use common::middleware::{ApiKeyAuth, RateLimiter};
use common::utils::SqlClassifier;

use crate::encoder::ResultEncoder;
use crate::service::{QueryBackend, QueryService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub query_service: Arc<QueryService>,
    pub auth: ApiKeyAuth,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Creates the application state over `backend`.
    ///
    /// Fails when the configured rate limit cannot be parsed.
    pub fn new(config: AppConfig, backend: Arc<dyn QueryBackend>) -> AppResult<Self> {
        let limiter = RateLimiter::new(config.rate_limit.parse()?);
        let encoder = ResultEncoder::new(config.limits, config.csv.clone());
        let query_service = QueryService::new(backend, Arc::new(SqlClassifier), encoder);

        Ok(Self {
            auth: ApiKeyAuth::new(config.api_key.as_str()),
            query_service: Arc::new(query_service),
            limiter: Arc::new(limiter),
        })
    }
}
