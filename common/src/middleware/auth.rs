//! Authentication middleware.
//!
//! Every query request must carry `Authorization: Bearer <API_KEY>`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppResult};

/// Shared API key verifier.
#[derive(Clone)]
pub struct ApiKeyAuth {
    api_key: Arc<str>,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<Arc<str>>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Checks a raw `Authorization` header value.
    ///
    /// # Errors
    /// - `MissingAuthHeader` when the header is absent
    /// - `InvalidAuthScheme` when the scheme is not `Bearer` or the token is empty
    /// - `InvalidApiKey` when the token does not match
    pub fn verify(&self, header: Option<&str>) -> AppResult<()> {
        let token = extract_bearer_token(header.ok_or(AppError::MissingAuthHeader)?)?;
        if bool::from(token.as_bytes().ct_eq(self.api_key.as_bytes())) {
            Ok(())
        } else {
            Err(AppError::InvalidApiKey)
        }
    }
}

/// Authentication middleware handler.
///
/// Rejects the request before it reaches the handler when verification
/// fails; the expected key is never echoed.
pub async fn auth_middleware(
    State(auth): State<ApiKeyAuth>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        // Non-ASCII header bytes cannot be a valid bearer token.
        Some(value) => Some(value.to_str().map_err(|_| AppError::InvalidAuthScheme)?),
    };
    auth.verify(header)?;
    Ok(next.run(req).await)
}

/// Splits `<scheme> <token>` on the first space and returns the token.
///
/// The scheme comparison is case-insensitive.
pub fn extract_bearer_token(value: &str) -> AppResult<&str> {
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::InvalidAuthScheme);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                ApiKeyAuth::new("secret"),
                auth_middleware,
            ))
    }

    async fn call(auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer_token("bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer_token("Bearer a b").unwrap(), "a b");
        assert!(extract_bearer_token("Bearer").is_err());
        assert!(extract_bearer_token("Bearer ").is_err());
        assert!(extract_bearer_token("Basic abc").is_err());
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let (status, body) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Missing Authorization header"));
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_401() {
        let (status, body) = call(Some("Basic c2VjcmV0")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Invalid auth scheme"));
    }

    #[tokio::test]
    async fn test_wrong_key_is_403() {
        let (status, body) = call(Some("Bearer nope")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("Invalid API key"));
        assert!(!body.contains("secret"));
    }

    #[tokio::test]
    async fn test_valid_key_passes() {
        let (status, body) = call(Some("Bearer secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
