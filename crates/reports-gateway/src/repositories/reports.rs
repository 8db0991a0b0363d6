//! Reports repository.
//!
//! Reads a caller's telemetry rows from the ClickHouse `reports` table.
//!
//! # Security
//!
//! - The owner email is always passed through `.bind()`, never formatted
//!   into the SQL text
//! - Emails are not logged

use crate::config::Config;
use crate::models::Record;
use crate::observability::metrics::record_store_query;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

/// Query for one owner's rows. Column order matches [`Record`].
const SELECT_REPORTS_BY_OWNER: &str = "SELECT user_email, prosthesis_id, signal_strength, battery_percentage FROM reports WHERE user_email = ?";

/// Report store failures.
///
/// Both variants carry the rows read before the failure, so a caller can
/// choose to serve a partial result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Report query failed: {message}")]
    Query {
        message: String,
        collected: Vec<Record>,
    },

    #[error("Report query timed out after {timeout:?}")]
    Timeout {
        timeout: Duration,
        collected: Vec<Record>,
    },
}

impl StoreError {
    /// Rows read before the failure.
    pub fn collected(&self) -> &[Record] {
        match self {
            StoreError::Query { collected, .. } | StoreError::Timeout { collected, .. } => {
                collected
            }
        }
    }

    pub fn into_collected(self) -> Vec<Record> {
        match self {
            StoreError::Query { collected, .. } | StoreError::Timeout { collected, .. } => {
                collected
            }
        }
    }

    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Query { .. } => "error",
            StoreError::Timeout { .. } => "timeout",
        }
    }
}

/// Read access to the `reports` table (enables mocking).
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Fetch every report whose `user_email` equals `user_email`.
    async fn fetch_reports(&self, user_email: &str) -> Result<Vec<Record>, StoreError>;
}

/// ClickHouse-backed report store.
///
/// `clickhouse::Client` pools HTTP connections internally and is cheap to
/// clone, so one instance serves every request.
#[derive(Clone)]
pub struct ClickHouseReportStore {
    client: clickhouse::Client,
    query_timeout: Duration,
}

impl ClickHouseReportStore {
    pub fn new(client: clickhouse::Client, query_timeout: Duration) -> Self {
        Self {
            client,
            query_timeout,
        }
    }

    /// Build a store from the service configuration.
    ///
    /// No connection is made here; the first query opens one.
    pub fn from_config(config: &Config) -> Self {
        let client = clickhouse::Client::default()
            .with_url(&config.clickhouse_url)
            .with_database(&config.clickhouse_database)
            .with_user(&config.clickhouse_username)
            .with_password(config.clickhouse_password.expose_secret());

        Self::new(client, config.store_query_timeout)
    }

    async fn read_rows(&self, user_email: &str) -> Result<Vec<Record>, StoreError> {
        let deadline = tokio::time::Instant::now() + self.query_timeout;
        let mut collected = Vec::new();

        let mut cursor = self
            .client
            .query(SELECT_REPORTS_BY_OWNER)
            .bind(user_email)
            .fetch::<Record>()
            .map_err(|e| StoreError::Query {
                message: e.to_string(),
                collected: Vec::new(),
            })?;

        loop {
            match tokio::time::timeout_at(deadline, cursor.next()).await {
                Ok(Ok(Some(record))) => collected.push(record),
                Ok(Ok(None)) => return Ok(collected),
                Ok(Err(e)) => {
                    return Err(StoreError::Query {
                        message: e.to_string(),
                        collected,
                    })
                }
                Err(_) => {
                    return Err(StoreError::Timeout {
                        timeout: self.query_timeout,
                        collected,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl ReportStore for ClickHouseReportStore {
    #[instrument(skip_all, name = "rg.repositories.reports.fetch")]
    async fn fetch_reports(&self, user_email: &str) -> Result<Vec<Record>, StoreError> {
        let start = Instant::now();
        let result = self.read_rows(user_email).await;

        match &result {
            Ok(rows) => {
                record_store_query("success", start.elapsed());
                tracing::debug!(
                    target: "rg.repositories.reports",
                    row_count = rows.len(),
                    "Report query completed"
                );
            }
            Err(e) => {
                record_store_query(e.kind(), start.elapsed());
                tracing::warn!(
                    target: "rg.repositories.reports",
                    error = %e,
                    rows_before_failure = e.collected().len(),
                    "Report query failed"
                );
            }
        }

        result
    }
}

/// In-memory report store for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// Report store backed by a `Vec`, honoring the equality filter exactly.
    pub struct InMemoryReportStore {
        rows: RwLock<Vec<Record>>,
        failing: AtomicBool,
        fail_after_rows: Option<usize>,
        ignore_filter: bool,
        query_count: AtomicUsize,
    }

    impl InMemoryReportStore {
        pub fn new(rows: Vec<Record>) -> Self {
            Self {
                rows: RwLock::new(rows),
                failing: AtomicBool::new(false),
                fail_after_rows: None,
                ignore_filter: false,
                query_count: AtomicUsize::new(0),
            }
        }

        /// A store whose every query fails with no rows.
        pub fn failing() -> Self {
            let store = Self::new(Vec::new());
            store.set_failing(true);
            store
        }

        /// A store that fails after returning `n` matching rows.
        pub fn failing_after(rows: Vec<Record>, n: usize) -> Self {
            Self {
                fail_after_rows: Some(n),
                ..Self::new(rows)
            }
        }

        /// A store that returns every row regardless of owner.
        pub fn ignoring_filter(rows: Vec<Record>) -> Self {
            Self {
                ignore_filter: true,
                ..Self::new(rows)
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub async fn insert(&self, record: Record) {
            self.rows.write().await.push(record);
        }

        /// Number of queries received.
        pub fn query_count(&self) -> usize {
            self.query_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReportStore for InMemoryReportStore {
        async fn fetch_reports(&self, user_email: &str) -> Result<Vec<Record>, StoreError> {
            self.query_count.fetch_add(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Query {
                    message: "mock store unavailable".to_string(),
                    collected: Vec::new(),
                });
            }

            let rows = self.rows.read().await;
            let matching: Vec<Record> = rows
                .iter()
                .filter(|r| self.ignore_filter || r.user_email == user_email)
                .cloned()
                .collect();

            match self.fail_after_rows {
                Some(n) => Err(StoreError::Query {
                    message: "mock store failed mid-read".to_string(),
                    collected: matching.into_iter().take(n).collect(),
                }),
                None => Ok(matching),
            }
        }
    }
}
