//! Identity-scoped report reads.
//!
//! Every read is keyed by a verified [`Identity`]. The store query binds the
//! identity, and rows are checked against it again before they are returned,
//! so a caller can never receive another owner's rows.

use crate::auth::Identity;
use crate::config::StoreFailurePolicy;
use crate::errors::GatewayError;
use crate::models::Record;
use crate::repositories::{ReportStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default number of attempts for one read.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Backoff ceiling.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Reads a caller's reports from the store.
pub struct ReportGateway {
    store: Arc<dyn ReportStore>,
    failure_policy: StoreFailurePolicy,
    retry: RetryPolicy,
}

impl ReportGateway {
    pub fn new(store: Arc<dyn ReportStore>, failure_policy: StoreFailurePolicy) -> Self {
        Self {
            store,
            failure_policy,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every report owned by `identity`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StoreUnavailable` when all attempts fail and
    /// the policy is `Surface`. Under `DegradeToEmpty` the rows read before
    /// the failure (possibly none) are returned instead.
    #[instrument(skip_all, name = "rg.services.report_gateway.fetch_records")]
    pub async fn fetch_records(&self, identity: &Identity) -> Result<Vec<Record>, GatewayError> {
        match self.fetch_with_retry(identity).await {
            Ok(rows) => Ok(retain_owned(identity, rows)),
            Err(e) => match self.failure_policy {
                StoreFailurePolicy::Surface => Err(GatewayError::StoreUnavailable(e.to_string())),
                StoreFailurePolicy::DegradeToEmpty => {
                    tracing::warn!(
                        target: "rg.services.report_gateway",
                        error = %e,
                        partial_rows = e.collected().len(),
                        "Report store failed, serving partial result"
                    );
                    Ok(retain_owned(identity, e.into_collected()))
                }
            },
        }
    }

    async fn fetch_with_retry(&self, identity: &Identity) -> Result<Vec<Record>, StoreError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.fetch_reports(identity.as_str()).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < max_attempts => {
                    let backoff = self.retry.backoff_after(attempt);
                    tracing::debug!(
                        target: "rg.services.report_gateway",
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Report query failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Drop rows whose owner is not `identity`.
fn retain_owned(identity: &Identity, mut rows: Vec<Record>) -> Vec<Record> {
    let before = rows.len();
    rows.retain(|r| r.user_email == identity.as_str());

    let dropped = before - rows.len();
    if dropped > 0 {
        tracing::error!(
            target: "rg.services.report_gateway",
            dropped,
            "Store returned rows owned by another user; discarded"
        );
    }

    rows
}
