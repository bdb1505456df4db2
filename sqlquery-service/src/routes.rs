//! 路由模块

use axum::{middleware, routing::get, Router};

use common::middleware::{auth_middleware, rate_limit_middleware};

use crate::handlers;
use crate::state::AppState;

/// Query routes sit behind authentication, then rate limiting; the health
/// check is open.
pub fn router(state: &AppState) -> Router<AppState> {
    let query_routes = Router::new()
        .route("/sqlquery/", get(handlers::sql_query))
        .route("/sqlquery", get(handlers::sql_query))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(query_routes)
        .route("/api/health", get(handlers::health_check))
}
