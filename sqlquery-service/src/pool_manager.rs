//! Database connection pool manager.
//!
//! Holds one pool per registered backend. Pools are created once at startup
//! and closed at shutdown; in between the set of pools never changes.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, MySqlPool, PgPool};

use common::config::PoolSettings;
use common::errors::{AppError, AppResult};
use common::models::{BackendConfig, BackendRegistry, EngineKind};
use common::response::BackendStatus;

use crate::lease::{LeasedConnection, PooledConnection};
use crate::service::{Lease, QueryBackend};

/// Connection pool wrapper for the supported engines.
#[derive(Clone)]
pub enum EnginePool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl EnginePool {
    pub fn engine(&self) -> EngineKind {
        match self {
            EnginePool::Postgres(_) => EngineKind::Postgres,
            EnginePool::MySql(_) => EngineKind::MySql,
        }
    }

    async fn close(&self) {
        match self {
            EnginePool::Postgres(pool) => pool.close().await,
            EnginePool::MySql(pool) => pool.close().await,
        }
    }

    fn size(&self) -> u32 {
        match self {
            EnginePool::Postgres(pool) => pool.size(),
            EnginePool::MySql(pool) => pool.size(),
        }
    }

    fn idle(&self) -> u32 {
        let idle = match self {
            EnginePool::Postgres(pool) => pool.num_idle(),
            EnginePool::MySql(pool) => pool.num_idle(),
        };
        u32::try_from(idle).unwrap_or(u32::MAX)
    }
}

struct PoolEntry {
    name: String,
    pool: EnginePool,
}

/// Manages database connection pools.
pub struct PoolManager {
    settings: PoolSettings,
    pools: Vec<PoolEntry>,
}

impl PoolManager {
    /// Creates a manager with no pools.
    pub fn empty(settings: PoolSettings) -> Self {
        Self {
            settings,
            pools: Vec::new(),
        }
    }

    /// Creates a pool for every backend in `registry`.
    ///
    /// A backend whose pool cannot be created is logged and left out; its
    /// name then fails at request time like an unknown one. An empty result
    /// is not an error.
    pub async fn initialize(registry: &BackendRegistry, settings: PoolSettings) -> Self {
        let mut manager = Self::empty(settings);

        for backend in registry.backends() {
            match manager.create_pool(backend).await {
                Ok(pool) => {
                    tracing::info!(backend = %backend.name, engine = %pool.engine(), "Created pool");
                    manager.pools.push(PoolEntry {
                        name: backend.name.clone(),
                        pool,
                    });
                }
                Err(e) => {
                    tracing::error!(backend = %backend.name, error = %e, "Pool creation failed; backend disabled");
                }
            }
        }

        if manager.pools.is_empty() {
            tracing::warn!("No database pools available; every query will fail");
        }
        manager
    }

    /// Attempts to create a database connection pool.
    async fn create_pool(&self, backend: &BackendConfig) -> AppResult<EnginePool> {
        let creation_error = |message: String| AppError::PoolCreation {
            backend: backend.name.clone(),
            message,
        };
        let settings = &self.settings;

        match backend.engine() {
            Some(EngineKind::Postgres) => {
                let options = PgConnectOptions::from_str(&backend.uri)
                    .map_err(|e| creation_error(e.to_string()))?
                    .statement_cache_capacity(settings.statement_cache_size);
                let pool = pg_pool_options(settings)
                    .connect_with(options)
                    .await
                    .map_err(|e| creation_error(e.to_string()))?;
                Ok(EnginePool::Postgres(pool))
            }
            Some(EngineKind::MySql) => {
                let options = MySqlConnectOptions::from_str(&backend.uri)
                    .map_err(|e| creation_error(e.to_string()))?;

                let pool = mysql_pool_options(settings)
                    .connect_with(options)
                    .await
                    .map_err(|e| creation_error(e.to_string()))?;
                Ok(EnginePool::MySql(pool))
            }
            None => Err(creation_error(format!(
                "unsupported URI scheme '{}'",
                backend.scheme()
            ))),
        }
    }

    /// Gets a connection pool by backend name.
    pub fn get_pool(&self, name: &str) -> Option<&EnginePool> {
        self.pools
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.pool)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Per-backend pool statistics, in registration order.
    pub fn pool_stats(&self) -> Vec<BackendStatus> {
        self.pools
            .iter()
            .map(|entry| BackendStatus {
                name: entry.name.clone(),
                engine: entry.pool.engine().to_string(),
                size: entry.pool.size(),
                idle: entry.pool.idle(),
                max_size: self.settings.max_size,
            })
            .collect()
    }

    /// Closes every pool, each bounded by the configured close timeout.
    ///
    /// A pool that does not drain in time is logged and skipped; the
    /// remaining pools are still closed.
    pub async fn shutdown(&self) {
        for entry in &self.pools {
            match tokio::time::timeout(self.settings.close_timeout, entry.pool.close()).await {
                Ok(()) => tracing::info!(backend = %entry.name, "Closed pool"),
                Err(_) => tracing::warn!(
                    backend = %entry.name,
                    timeout_secs = self.settings.close_timeout.as_secs(),
                    "Timed out closing pool"
                ),
            }
        }
    }
}

#[async_trait]
impl QueryBackend for PoolManager {
    async fn acquire(&self, backend: &str) -> AppResult<Box<dyn Lease>> {
        let pool = self
            .get_pool(backend)
            .ok_or_else(|| AppError::NoPoolConfigured(backend.to_string()))?;

        let conn = match pool {
            EnginePool::Postgres(pool) => {
                PooledConnection::Postgres(pool.acquire().await.map_err(acquire_error)?)
            }
            EnginePool::MySql(pool) => {
                let mut conn = pool.acquire().await.map_err(acquire_error)?;
                // Per-statement timeout; not every MySQL flavour has it.
                let stmt = format!(
                    "SET SESSION MAX_EXECUTION_TIME={}",
                    self.settings.execution_timeout_ms
                );
                if let Err(e) = Executor::execute(&mut *conn, stmt.as_str()).await {
                    tracing::debug!(backend = %backend, error = %e, "MAX_EXECUTION_TIME not supported; continuing");
                }
                PooledConnection::MySql(conn)
            }
        };

        Ok(Box::new(LeasedConnection::new(backend, conn)))
    }

    fn backends(&self) -> Vec<BackendStatus> {
        self.pool_stats()
    }
}

fn acquire_error(err: sqlx::Error) -> AppError {
    AppError::DatabaseConnection(format!("Failed to acquire connection: {err}"))
}

/// PostgreSQL sessions are read-only and carry a statement timeout.
fn pg_pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let statement_timeout_ms = settings.statement_timeout_ms;
    PgPoolOptions::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size)
        .idle_timeout(Some(settings.max_inactive_lifetime))
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                Executor::execute(&mut *conn, "SET default_transaction_read_only = on").await?;
                let timeout = format!("SET statement_timeout = {statement_timeout_ms}");
                Executor::execute(&mut *conn, timeout.as_str()).await?;
                Ok(())
            })
        })
}

/// MySQL connections idle for the recycle interval are closed; sessions
/// run in autocommit mode.
fn mysql_pool_options(settings: &PoolSettings) -> MySqlPoolOptions {
    MySqlPoolOptions::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size)
        .idle_timeout(Some(settings.recycle_time))
        .max_lifetime(None)
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                Executor::execute(&mut *conn, "SET autocommit = 1").await?;
                Ok(())
            })
        })
}
