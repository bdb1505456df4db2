//! Connection lease.
//!
//! A [`LeasedConnection`] owns one pooled connection for the duration of a
//! request. The connection goes back to the pool it came from when the lease
//! drops, on every exit path.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres};

use common::errors::AppResult;
use common::models::{EngineKind, QueryResult};
use common::utils::StatementKind;

use crate::executor;
use crate::service::Lease;

/// Engine-specific pooled connection.
pub enum PooledConnection {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
}

pub struct LeasedConnection {
    backend: String,
    conn: PooledConnection,
    acquired_at: Instant,
}

impl LeasedConnection {
    pub fn new(backend: impl Into<String>, conn: PooledConnection) -> Self {
        let backend = backend.into();
        tracing::debug!(backend = %backend, "Connection acquired");
        Self {
            backend,
            conn,
            acquired_at: Instant::now(),
        }
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        tracing::debug!(
            backend = %self.backend,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Connection released"
        );
    }
}

#[async_trait]
impl Lease for LeasedConnection {
    async fn execute(&mut self, sql: &str, kind: StatementKind) -> AppResult<QueryResult> {
        match &mut self.conn {
            PooledConnection::Postgres(conn) => executor::execute_postgres(conn, sql, kind).await,
            PooledConnection::MySql(conn) => executor::execute_mysql(conn, sql, kind).await,
        }
    }

    fn engine(&self) -> EngineKind {
        match self.conn {
            PooledConnection::Postgres(_) => EngineKind::Postgres,
            PooledConnection::MySql(_) => EngineKind::MySql,
        }
    }

    fn backend(&self) -> &str {
        &self.backend
    }
}
