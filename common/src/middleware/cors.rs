//! CORS layer built from configuration.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer, ExposeHeaders};

use crate::config::CorsSettings;
use crate::errors::{AppError, AppResult};

/// Builds the CORS layer. A list consisting of `*` allows anything.
pub fn cors_layer(settings: &CorsSettings) -> AppResult<CorsLayer> {
    let origins = if is_any(&settings.allow_origins) {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(parse_all::<HeaderValue>(&settings.allow_origins, "origin")?)
    };
    let methods = if is_any(&settings.allow_methods) {
        AllowMethods::from(Any)
    } else {
        let upper: Vec<String> = settings.allow_methods.iter().map(|m| m.to_uppercase()).collect();
        AllowMethods::list(parse_all::<Method>(&upper, "method")?)
    };
    let headers = if is_any(&settings.allow_headers) {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&settings.allow_headers, "header")?)
    };
    let expose = if is_any(&settings.expose_headers) {
        ExposeHeaders::from(Any)
    } else {
        ExposeHeaders::list(parse_all::<HeaderName>(&settings.expose_headers, "header")?)
    };

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(expose))
}

fn is_any(items: &[String]) -> bool {
    items.iter().any(|item| item == "*")
}

fn parse_all<T>(items: &[String], what: &str) -> AppResult<Vec<T>>
where
    T: std::str::FromStr,
{
    items
        .iter()
        .map(|item| {
            item.parse::<T>()
                .map_err(|_| AppError::config(format!("invalid CORS {what} '{item}'")))
        })
        .collect()
}
