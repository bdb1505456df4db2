//! SQL 查询网关服务
//!
//! 通过 HTTP 在多个已配置的数据库上执行 SQL：
//! - 每个后端一个连接池（PostgreSQL / MySQL）
//! - 结果以 JSON 或 CSV 下载返回
//! - Bearer 令牌认证与按客户端限流

mod encoder;
mod executor;
mod handlers;
mod lease;
mod pool_manager;
mod routes;
mod service;
mod state;
mod temp_artifact;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::{cors_layer, request_id_middleware, request_log_middleware, RateLimiter};
use common::models::BackendRegistry;
use pool_manager::PoolManager;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "sqlquery-service";

/// Upper bound on the rate limiter's pruning interval.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SQL 查询网关 API",
        version = "0.1.0",
        description = "多数据源 SQL 查询网关"
    ),
    paths(
        handlers::sql_query,
        handlers::health_check,
    ),
    components(schemas(
        common::response::RowSet,
        common::response::StatusResponse,
        common::response::ErrorDetail,
        common::response::HealthResponse,
        common::response::BackendStatus,
    )),
    tags(
        (name = "query", description = "查询执行端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 不覆盖已有环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let config = AppConfig::from_env().context("failed to load configuration")?;

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();
    info!(config = ?config, "Configuration loaded");

    // 创建连接池
    let registry = BackendRegistry::from_env();
    let pool_manager = Arc::new(PoolManager::initialize(&registry, config.pool.clone()).await);
    info!(pools = pool_manager.pool_count(), "Pool initialization finished");

    // 创建应用状态
    let addr = config.listen_addr();
    let cors = cors_layer(&config.cors).context("invalid CORS configuration")?;
    let state = AppState::new(config, pool_manager.clone()).context("invalid rate limit")?;
    spawn_limiter_pruning(state.limiter.clone());

    // 创建路由
    let app = create_router(state).layer(cors);

    // 启动服务
    info!(service = SERVICE_NAME, address = %addr, "启动服务");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // 关闭连接池
    pool_manager.shutdown().await;
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::router(&state))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_log_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn spawn_limiter_pruning(limiter: Arc<RateLimiter>) {
    let period = limiter.limit().window.min(PRUNE_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            limiter.prune();
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
