//! Query execution service.
//!
//! Ties the pieces of one request together: format check, classification,
//! connection lease, execution and encoding.

use std::sync::Arc;

use async_trait::async_trait;

use common::errors::{AppError, AppResult};
use common::models::{EngineKind, OutputFormat, QueryResult, SqlQueryParams};
use common::response::BackendStatus;
use common::utils::{StatementClassifier, StatementKind};

use crate::encoder::{RenderedResponse, ResultEncoder};

/// Source of pooled connections, keyed by logical backend name.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Leases a connection from the named backend's pool.
    ///
    /// # Errors
    /// - `NoPoolConfigured` when the backend is unknown or its pool was
    ///   never created
    /// - `DatabaseConnection` when the pool cannot hand out a connection
    async fn acquire(&self, backend: &str) -> AppResult<Box<dyn Lease>>;

    /// Snapshot of every live pool.
    fn backends(&self) -> Vec<BackendStatus>;
}

/// A connection held exclusively for one request. Dropping the lease
/// returns the connection to its pool.
#[async_trait]
pub trait Lease: Send {
    /// Runs `sql` on the leased connection.
    async fn execute(&mut self, sql: &str, kind: StatementKind) -> AppResult<QueryResult>;

    fn engine(&self) -> EngineKind;

    fn backend(&self) -> &str;
}

/// Per-request orchestration.
pub struct QueryService {
    backend: Arc<dyn QueryBackend>,
    classifier: Arc<dyn StatementClassifier>,
    encoder: ResultEncoder,
}

impl QueryService {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        classifier: Arc<dyn StatementClassifier>,
        encoder: ResultEncoder,
    ) -> Self {
        Self {
            backend,
            classifier,
            encoder,
        }
    }

    /// Executes the requested statement and encodes the result.
    ///
    /// The format is checked before a connection is leased. The lease is
    /// held until encoding has finished and is released on every path.
    pub async fn run(&self, params: &SqlQueryParams) -> AppResult<RenderedResponse> {
        let format = OutputFormat::from_param(params.format.as_deref())?;
        let kind = self.classifier.classify(&params.sqlquery);

        let mut lease = self.backend.acquire(&params.cloud).await.map_err(|e| {
            tracing::error!(backend = %params.cloud, error = %e, "Failed to acquire connection");
            e
        })?;
        tracing::debug!(
            backend = lease.backend(),
            engine = %lease.engine(),
            kind = ?kind,
            "Executing query"
        );

        let rendered = match lease.execute(&params.sqlquery, kind).await {
            Ok(result) => self.encoder.render(result, format).await,
            Err(e) => {
                tracing::error!(backend = lease.backend(), error = %e, "Query execution failed");
                Err(e)
            }
        };
        drop(lease);

        if let Err(AppError::Encoding(e)) = &rendered {
            tracing::error!(backend = %params.cloud, error = %e, "Failed to encode result");
        }
        rendered
    }

    pub fn backends(&self) -> Vec<BackendStatus> {
        self.backend.backends()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::fake::{FakeBackend, Script};
    use super::*;
    use common::config::{CsvSettings, RowLimits};
    use common::models::{Row, Value};
    use common::utils::SqlClassifier;

    fn service(backend: Arc<FakeBackend>) -> QueryService {
        QueryService::new(
            backend,
            Arc::new(SqlClassifier),
            ResultEncoder::new(RowLimits::default(), CsvSettings::default()),
        )
    }

    fn params(sql: &str, cloud: &str, format: Option<&str>) -> SqlQueryParams {
        SqlQueryParams {
            sqlquery: sql.to_string(),
            cloud: cloud.to_string(),
            format: format.map(str::to_string),
        }
    }

    fn one_row() -> QueryResult {
        QueryResult::Rows(vec![[("x", Value::Int(1))].into_iter().collect::<Row>()])
    }

    #[tokio::test]
    async fn test_invalid_format_rejected_before_acquire() {
        let backend = Arc::new(FakeBackend::new().with("pg", Script::Result(one_row())));
        let err = service(backend.clone())
            .run(&params("SELECT 1", "pg", Some("xml")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat));
        assert_eq!(backend.acquired(), 0);
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let backend = Arc::new(FakeBackend::new());
        let err = service(backend.clone())
            .run(&params("SELECT 1", "nope", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No pool configured for cloud 'nope'");
        assert_eq!(backend.acquired(), 0);
    }

    #[tokio::test]
    async fn test_lease_released_on_success_and_failure() {
        let backend = Arc::new(
            FakeBackend::new()
                .with("pg", Script::Result(one_row()))
                .with("broken", Script::Fail("relation \"t\" does not exist".into())),
        );
        let svc = service(backend.clone());

        svc.run(&params("SELECT 1", "pg", None)).await.unwrap();
        let err = svc.run(&params("SELECT * FROM t", "broken", None)).await.unwrap_err();
        assert_eq!(err.to_string(), "relation \"t\" does not exist");

        assert_eq!(backend.acquired(), 2);
        assert_eq!(backend.released(), 2);
    }

    #[tokio::test]
    async fn test_backends_do_not_block_each_other() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(
            FakeBackend::new()
                .with("slow", Script::Park(gate.clone(), one_row()))
                .with("fast", Script::Result(one_row())),
        );
        let svc = Arc::new(service(backend.clone()));

        let parked = tokio::spawn({
            let svc = svc.clone();
            async move { svc.run(&params("SELECT 1", "slow", None)).await }
        });
        while backend.acquired() == 0 {
            tokio::task::yield_now().await;
        }

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            svc.run(&params("SELECT 1", "fast", None)),
        )
        .await
        .expect("request to another backend was blocked");
        assert!(matches!(fast.unwrap(), RenderedResponse::Json(_)));
        assert!(!parked.is_finished());
        assert_eq!(backend.released(), 1);

        gate.notify_one();
        let slow = parked.await.unwrap().unwrap();
        assert!(matches!(slow, RenderedResponse::Json(_)));
        assert_eq!(backend.released(), 2);
    }

    #[tokio::test]
    async fn test_classification_reaches_lease() {
        let backend = Arc::new(FakeBackend::new().with("pg", Script::Result(one_row())));
        let svc = service(backend.clone());

        let rendered = svc
            .run(&params("INSERT INTO t VALUES (1)", "pg", Some("csv")))
            .await
            .unwrap();
        assert!(matches!(rendered, RenderedResponse::Ack(_)));

        svc.run(&params("  with t as (select 1) select * from t", "pg", None))
            .await
            .unwrap();

        let kinds = backend.counters.kinds.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![StatementKind::NonDataReturning, StatementKind::DataReturning]
        );
    }
}
