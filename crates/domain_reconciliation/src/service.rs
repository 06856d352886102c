//! Reconciliation service
//!
//! The facade the surrounding application calls. Collaborators arrive as
//! trait objects; all state lives behind the store port, so the service
//! itself is cheap to clone and share.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use core_kernel::{AccountId, DateRange, LedgerRecordId, Money, TransactionId};
use domain_ledger::{CostCategory, LedgerRecord, Sector};

use crate::allocation::{SplitRequest, SplitSet};
use crate::error::{PersistenceError, ReconciliationError, ValidationError};
use crate::matching::{MatchConfig, MatchSuggestion, MatchingEngine};
use crate::ports::{
    AccountBalance, BankFeedAdapter, LedgerTarget, ReconcileCommand, ReconciliationStore,
};
use crate::sync::{SyncConfig, SyncOrchestrator, SyncReport};
use crate::transaction::{BankTransaction, Classification, TransactionStatus, TransitionKind};

/// Aggregated movement totals over a date range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub credits: Money,
    pub debits: Money,
    pub net: Money,
    pub transaction_count: u64,
}

/// Entry point for the reconciliation core
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn ReconciliationStore>,
    feed: Arc<dyn BankFeedAdapter>,
    matching: MatchingEngine,
    sync_config: SyncConfig,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn ReconciliationStore>, feed: Arc<dyn BankFeedAdapter>) -> Self {
        Self {
            store,
            feed,
            matching: MatchingEngine::default(),
            sync_config: SyncConfig::default(),
        }
    }

    pub fn with_match_config(mut self, config: MatchConfig) -> Self {
        self.matching = MatchingEngine::new(config);
        self
    }

    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Ingests the bank feed for `range`; see [`SyncOrchestrator`]
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<SyncReport, ReconciliationError> {
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&self.feed),
            Arc::clone(&self.store),
            self.sync_config.clone(),
        );
        orchestrator.sync(account_id, range).await
    }

    /// Proposes ledger candidates for a pending transaction, most
    /// confident first. Terminal transactions yield an empty list.
    #[instrument(skip(self))]
    pub async fn suggest(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<MatchSuggestion>, ReconciliationError> {
        let transaction = self.store.get_transaction(transaction_id).await?;
        if transaction.status != TransactionStatus::Pending {
            return Ok(Vec::new());
        }

        let kind = transaction.sign().ledger_kind();
        let candidates = self.store.find_settleable_records(kind).await?;
        let suggestions = self.matching.suggest(&transaction, &candidates);
        debug!(
            candidates = candidates.len(),
            suggestions = suggestions.len(),
            "computed match suggestions"
        );
        Ok(suggestions)
    }

    /// Reconciles a pending transaction against `target`, splitting its
    /// value across the given cost centers.
    ///
    /// With `target == None` a fresh ledger record is created from the
    /// transaction itself (no-match flow). Side effects commit atomically
    /// in the store; a concurrent competitor loses with `InvalidState`.
    #[instrument(skip(self, splits))]
    pub async fn reconcile(
        &self,
        transaction_id: TransactionId,
        target: Option<LedgerRecordId>,
        splits: Vec<SplitRequest>,
        classification: Option<Classification>,
    ) -> Result<BankTransaction, ReconciliationError> {
        let transaction = self.store.get_transaction(transaction_id).await?;
        // Fast-fail; the authoritative check is the store's compare-and-set
        transaction.ensure_pending(TransitionKind::Reconcile)?;

        let split_set = SplitSet::new(splits)?;
        let allocations = split_set.allocate(transaction.amount())?;

        let target = match target {
            Some(record_id) => {
                let record = self.store.get_ledger_record(record_id).await?;
                if let Some(settled_by) = record.settled_by {
                    return Err(crate::error::InvalidStateError::AlreadySettled {
                        record: record_id,
                        settled_by,
                    }
                    .into());
                }
                LedgerTarget::Existing(record_id)
            }
            None => LedgerTarget::Create(self.record_from_transaction(
                &transaction,
                &allocations[0].cost_center_id,
                classification,
            )),
        };

        self.store
            .commit_reconcile(ReconcileCommand {
                transaction_id,
                expected_credit: transaction.credit,
                expected_debit: transaction.debit,
                target,
                allocations,
                classification,
            })
            .await
    }

    /// Ignores a pending transaction, recording the operator's reason
    #[instrument(skip(self))]
    pub async fn ignore(
        &self,
        transaction_id: TransactionId,
        reason: String,
    ) -> Result<BankTransaction, ReconciliationError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingIgnoreReason.into());
        }
        self.store.commit_ignore(transaction_id, reason).await
    }

    /// Reopens a reconciled or ignored transaction back to pending,
    /// destroying its allocations and reverting the settled record
    #[instrument(skip(self))]
    pub async fn reopen(
        &self,
        transaction_id: TransactionId,
    ) -> Result<BankTransaction, ReconciliationError> {
        self.store.commit_reopen(transaction_id).await
    }

    /// Current provider balance for the account
    pub async fn balance(
        &self,
        account_id: AccountId,
    ) -> Result<AccountBalance, ReconciliationError> {
        Ok(self.feed.get_balance(account_id).await?)
    }

    /// Credit/debit totals over local records in `range`.
    ///
    /// Ignored transactions are excluded; pending and reconciled count.
    /// An account whose stored transactions mix currencies yields a
    /// persistence error rather than a meaningless total.
    pub async fn period_summary(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<PeriodSummary, ReconciliationError> {
        let transactions = self.store.list_transactions(account_id, range).await?;

        let mut credits: Option<Money> = None;
        let mut debits: Option<Money> = None;
        let mut count = 0u64;

        for tx in transactions
            .iter()
            .filter(|tx| tx.status != TransactionStatus::Ignored)
        {
            count += 1;
            credits = Some(match credits {
                Some(total) => total.checked_add(&tx.credit).map_err(currency_conflict)?,
                None => tx.credit,
            });
            debits = Some(match debits {
                Some(total) => total.checked_add(&tx.debit).map_err(currency_conflict)?,
                None => tx.debit,
            });
        }

        let currency = core_kernel::Currency::default();
        let credits = credits.unwrap_or_else(|| Money::zero(currency));
        let debits = debits.unwrap_or_else(|| Money::zero(currency));
        let net = credits.checked_sub(&debits).map_err(currency_conflict)?;

        Ok(PeriodSummary {
            credits,
            debits,
            net,
            transaction_count: count,
        })
    }

    /// Builds the ledger record that a no-match reconcile creates
    fn record_from_transaction(
        &self,
        transaction: &BankTransaction,
        cost_center_id: &core_kernel::CostCenterId,
        classification: Option<Classification>,
    ) -> LedgerRecord {
        let (category, sector) = classification
            .map(|c| (c.category, c.sector))
            .unwrap_or((CostCategory::Other, Sector::Administrative));

        let description = if transaction.description.is_empty() {
            transaction.counterpart_name.clone()
        } else {
            transaction.description.clone()
        };

        LedgerRecord::new(
            transaction.sign().ledger_kind(),
            description,
            transaction.counterpart_name.clone(),
            transaction.amount(),
            transaction.occurred_on(),
            *cost_center_id,
            category,
            sector,
        )
    }
}

fn currency_conflict(err: core_kernel::MoneyError) -> PersistenceError {
    PersistenceError::backend(err.to_string())
}
