//! Sync orchestrator
//!
//! Pulls raw transactions from the bank feed in date-window pages and
//! upserts them as local records keyed by external id. Safe to run
//! repeatedly and concurrently: every upsert converges per external id,
//! and records already reconciled or ignored are never touched.
//!
//! Failure policy: a page fetch failure (including timeout) is recorded in
//! the report and stops further fetching, but upserts from pages already
//! fetched are kept. The report is returned, not thrown, so callers can
//! inspect partial success.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use core_kernel::{AccountId, DateRange};

use crate::error::ReconciliationError;
use crate::ports::{BankFeedAdapter, ReconciliationStore, UpsertOutcome};

/// Sync tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days covered by each page fetch
    pub page_days: u32,
    /// Timeout applied to each page fetch
    pub page_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_days: 30,
            page_timeout: Duration::from_secs(10),
        }
    }
}

/// One failure observed during a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    /// The page window, when the failure was page-level
    pub window: Option<DateRange>,
    /// The offending record, when the failure was record-level
    pub external_id: Option<String>,
    pub message: String,
}

impl SyncError {
    fn page(window: DateRange, message: impl Into<String>) -> Self {
        Self {
            window: Some(window),
            external_id: None,
            message: message.into(),
        }
    }

    fn record(external_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            window: None,
            external_id: Some(external_id.into()),
            message: message.into(),
        }
    }
}

/// Outcome of a sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Raw transactions received from the adapter
    pub fetched: u64,
    /// New local records created as pending
    pub created: u64,
    /// Pending records whose mutable fields were overwritten
    pub updated: u64,
    /// Records skipped because they are reconciled or ignored
    pub skipped: u64,
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives ingestion from the bank feed into the local store
pub struct SyncOrchestrator {
    feed: Arc<dyn BankFeedAdapter>,
    store: Arc<dyn ReconciliationStore>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        feed: Arc<dyn BankFeedAdapter>,
        store: Arc<dyn ReconciliationStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            feed,
            store,
            config,
        }
    }

    /// Syncs `range` for `account_id`, page by page.
    #[instrument(skip(self), fields(%range))]
    pub async fn sync(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<SyncReport, ReconciliationError> {
        let mut report = SyncReport::default();

        for window in range.windows(self.config.page_days) {
            let fetch = self.feed.fetch_transactions(account_id, window);
            let page = match tokio::time::timeout(self.config.page_timeout, fetch).await {
                Err(_) => {
                    warn!(%window, "page fetch timed out, aborting remaining pages");
                    report.errors.push(SyncError::page(
                        window,
                        format!(
                            "page fetch timed out after {}ms",
                            self.config.page_timeout.as_millis()
                        ),
                    ));
                    break;
                }
                Ok(Err(err)) => {
                    warn!(%window, error = %err, "page fetch failed, aborting remaining pages");
                    report.errors.push(SyncError::page(window, err.to_string()));
                    break;
                }
                Ok(Ok(transactions)) => transactions,
            };

            debug!(%window, count = page.len(), "page fetched");

            for raw in page {
                report.fetched += 1;

                if let Err(err) = raw.validate() {
                    report
                        .errors
                        .push(SyncError::record(raw.external_id.clone(), err.to_string()));
                    continue;
                }

                let external_id = raw.external_id.clone();
                match self.store.upsert_pending(account_id, raw).await {
                    Ok(UpsertOutcome::Created) => report.created += 1,
                    Ok(UpsertOutcome::Updated) => report.updated += 1,
                    Ok(UpsertOutcome::Skipped) => report.skipped += 1,
                    Err(err) => {
                        warn!(external_id = %external_id, error = %err, "upsert failed");
                        report
                            .errors
                            .push(SyncError::record(external_id, err.to_string()));
                    }
                }
            }
        }

        debug!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            "sync finished"
        );
        Ok(report)
    }
}
