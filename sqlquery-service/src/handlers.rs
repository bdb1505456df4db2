//! Handler模块

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::Utc;
use validator::Validate;

use common::errors::AppError;
use common::models::SqlQueryParams;
use common::response::HealthResponse;

use crate::encoder::RenderedResponse;
use crate::state::AppState;

const SERVICE_NAME: &str = "sqlquery-service";

/// 执行 SQL 查询
///
/// Runs one statement on the named backend and returns the rows as JSON or
/// as a CSV download.
#[utoipa::path(
    get,
    path = "/sqlquery/",
    tag = "query",
    params(SqlQueryParams),
    responses(
        (status = 200, description = "Rows (JSON or CSV download) or an execution acknowledgment", body = common::response::RowSet),
        (status = 400, description = "Unsupported format", body = common::response::ErrorDetail),
        (status = 401, description = "Missing or malformed Authorization header", body = common::response::ErrorDetail),
        (status = 403, description = "Invalid API key", body = common::response::ErrorDetail),
        (status = 422, description = "Missing or empty parameters", body = common::response::ErrorDetail),
        (status = 429, description = "Rate limit exceeded", body = common::response::ErrorDetail),
        (status = 500, description = "Unknown backend, connection or execution failure", body = common::response::ErrorDetail)
    )
)]
pub async fn sql_query(
    State(state): State<AppState>,
    params: Result<Query<SqlQueryParams>, QueryRejection>,
) -> Result<RenderedResponse, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;
    params
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state.query_service.run(&params).await
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        backends: state.query_service.backends(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value as Json};
    use tower::ServiceExt;

    use common::config::AppConfig;
    use common::models::{QueryResult, Row, Value};

    use crate::routes;
    use crate::service::fake::{FakeBackend, Script};
    use crate::state::AppState;

    const KEY: &str = "test-key";

    fn config(extra: &[(&str, &str)]) -> AppConfig {
        let mut vars: Vec<(String, String)> = vec![("API_KEY".into(), KEY.into())];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        AppConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn rows(n: i64) -> QueryResult {
        QueryResult::Rows(
            (1..=n)
                .map(|i| [("x", Value::Int(i))].into_iter().collect::<Row>())
                .collect(),
        )
    }

    fn app_with(backend: Arc<FakeBackend>, extra: &[(&str, &str)]) -> Router {
        let state = AppState::new(config(extra), backend).unwrap();
        routes::router(&state).with_state(state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn backend() -> Arc<FakeBackend> {
        Arc::new(
            FakeBackend::new()
                .with("aiven_postgres", Script::Result(rows(1)))
                .with("aiven_mysql", Script::Fail("Table 'db.t' doesn't exist".into())),
        )
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let (status, _, body) = send(
            app_with(backend(), &[]),
            get("/sqlquery/?sqlquery=SELECT%201%20AS%20x&cloud=aiven_postgres"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body, json!({"rows": [{"x": 1}], "truncated": false}));
    }

    #[tokio::test]
    async fn test_insert_returns_ack() {
        let (status, _, body) = send(
            app_with(backend(), &[]),
            get("/sqlquery?sqlquery=INSERT%20INTO%20t%20VALUES%20(1)&cloud=aiven_postgres"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body, json!({"status": "Query executed successfully"}));
    }

    #[tokio::test]
    async fn test_blank_format_defaults_to_json() {
        let backend = Arc::new(FakeBackend::new().with("pg", Script::Result(rows(1))));
        let (status, _, body) = send(
            app_with(backend, &[]),
            get("/sqlquery/?sqlquery=SELECT%201%20AS%20x&cloud=pg&format="),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body, json!({"rows": [{"x": 1}], "truncated": false}));
    }

    #[tokio::test]
    async fn test_json_truncation() {
        let backend = Arc::new(FakeBackend::new().with("pg", Script::Result(rows(5))));
        let (_, _, body) = send(
            app_with(backend, &[("MAX_JSON_ROWS", "2")]),
            get("/sqlquery/?sqlquery=select%20x&cloud=pg"),
        )
        .await;
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
        assert_eq!(body["truncated"], json!(true));
    }

    #[tokio::test]
    async fn test_csv_download() {
        let backend = Arc::new(FakeBackend::new().with("pg", Script::Result(rows(3))));
        let (status, headers, body) = send(
            app_with(backend, &[]),
            get("/sqlquery/?sqlquery=SELECT%20x&cloud=pg&format=CSV"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment"));
        assert_eq!(body, "x\r\n1\r\n2\r\n3\r\n");
    }

    #[tokio::test]
    async fn test_unknown_backend_is_500() {
        let (status, _, body) = send(
            app_with(backend(), &[]),
            get("/sqlquery/?sqlquery=SELECT%201&cloud=oracle_cloud"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body, json!({"detail": "No pool configured for cloud 'oracle_cloud'"}));
    }

    #[tokio::test]
    async fn test_execution_error_releases_lease() {
        let backend = backend();
        let (status, _, body) = send(
            app_with(backend.clone(), &[]),
            get("/sqlquery/?sqlquery=SELECT%20*%20FROM%20t&cloud=aiven_mysql"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body["detail"], "Table 'db.t' doesn't exist");
        assert_eq!(backend.acquired(), 1);
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn test_invalid_format_is_400_without_acquire() {
        let backend = backend();
        let (status, _, body) = send(
            app_with(backend.clone(), &[]),
            get("/sqlquery/?sqlquery=SELECT%201&cloud=aiven_postgres&format=xml"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Invalid format"));
        assert_eq!(backend.acquired(), 0);
    }

    #[tokio::test]
    async fn test_missing_or_empty_params_are_422() {
        for uri in [
            "/sqlquery/?cloud=aiven_postgres",
            "/sqlquery/?sqlquery=SELECT%201",
            "/sqlquery/?sqlquery=&cloud=aiven_postgres",
        ] {
            let (status, _, body) = send(app_with(backend(), &[]), get(uri)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
            assert!(body.contains("detail"), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_auth_runs_before_handler() {
        let backend = backend();
        let req = Request::builder()
            .uri("/sqlquery/?sqlquery=SELECT%201&cloud=aiven_postgres")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app_with(backend.clone(), &[]), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(backend.acquired(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_after_auth() {
        let app = app_with(backend(), &[("RATE_LIMIT", "1/minute")]);
        let uri = "/sqlquery/?sqlquery=SELECT%201&cloud=aiven_postgres";

        let (first, _, _) = send(app.clone(), get(uri)).await;
        assert_eq!(first, StatusCode::OK);

        let (second, _, body) = send(app.clone(), get(uri)).await;
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert!(body.contains("Rate limit exceeded"));

        // Authentication is checked before the limit.
        let anonymous = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (third, _, _) = send(app, anonymous).await;
        assert_eq!(third, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(app_with(backend(), &[]), req).await;
        assert_eq!(status, StatusCode::OK);
        let body: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backends"].as_array().unwrap().len(), 2);
    }
}
