//! Reconciliation ports
//!
//! The core never talks to an ambient client singleton; collaborators are
//! injected as trait objects so tests can substitute in-memory fakes.
//!
//! - [`BankFeedAdapter`]: the external banking provider. Pagination and
//!   provider idempotency are its problem; the core treats a fetch as a
//!   pure function of (account, range).
//! - [`ReconciliationStore`]: the hosted database. It carries BOTH the
//!   bank-transaction records and the ledger records because a state
//!   transition's side effects must commit inside one transactional
//!   boundary, including the compare-and-set on the transaction status.
//! - [`CostCenterDirectory`]: display names for audit output only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, CostCenterId, DateRange, LedgerRecordId, Money, TransactionId};
use domain_ledger::{LedgerKind, LedgerRecord};

use crate::allocation::Allocation;
use crate::error::{AdapterError, PersistenceError, ReconciliationError};
use crate::transaction::{BankTransaction, Classification, RawTransaction};

/// Account balance as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub available: Money,
    pub blocked: Money,
}

/// Bank feed provider boundary
#[async_trait]
pub trait BankFeedAdapter: Send + Sync {
    /// Fetches the movements for `account_id` within `range`
    async fn fetch_transactions(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<RawTransaction>, AdapterError>;

    /// Current balance for the account
    async fn get_balance(&self, account_id: AccountId) -> Result<AccountBalance, AdapterError>;
}

/// Result of upserting one raw transaction during sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// First sight of this external id
    Created,
    /// Existing pending record, mutable fields overwritten
    Updated,
    /// Existing record in a terminal state, left untouched
    Skipped,
}

/// The ledger side of a reconcile commit
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerTarget {
    /// Settle an existing record
    Existing(LedgerRecordId),
    /// No match exists; create this record already settled
    Create(LedgerRecord),
}

/// Everything a reconcile transition persists, applied all-or-nothing
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileCommand {
    pub transaction_id: TransactionId,
    /// The credit/debit magnitudes the allocations were computed from.
    /// The commit's compare-and-set matches these against the stored
    /// values, so a sync overwrite between read and commit cannot land
    /// allocations that no longer sum to the transaction's amount.
    pub expected_credit: Money,
    pub expected_debit: Money,
    pub target: LedgerTarget,
    pub allocations: Vec<Allocation>,
    pub classification: Option<Classification>,
}

/// Persistence boundary for transactions and ledger records
///
/// The `commit_*` methods own the atomicity and concurrency rules:
/// each verifies the transaction's current status inside the same
/// transactional boundary as its side effects (compare-and-set), so of
/// two racing callers exactly one succeeds and the loser observes an
/// `InvalidState` error. Partial application is never allowed.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<BankTransaction, PersistenceError>;

    async fn find_by_external_id(
        &self,
        account_id: AccountId,
        external_id: &str,
    ) -> Result<Option<BankTransaction>, PersistenceError>;

    /// Upserts a raw transaction keyed by external id.
    ///
    /// Creates a pending record on first sight; overwrites mutable fields
    /// when the local record is still pending; skips unconditionally when
    /// it is reconciled or ignored. Must be atomic per external id.
    async fn upsert_pending(
        &self,
        account_id: AccountId,
        raw: RawTransaction,
    ) -> Result<UpsertOutcome, PersistenceError>;

    /// Transactions for the account whose movement date falls in `range`
    async fn list_transactions(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<BankTransaction>, PersistenceError>;

    async fn get_ledger_record(
        &self,
        id: LedgerRecordId,
    ) -> Result<LedgerRecord, PersistenceError>;

    /// Open or overdue records on the given side, the match candidate pool
    async fn find_settleable_records(
        &self,
        kind: LedgerKind,
    ) -> Result<Vec<LedgerRecord>, PersistenceError>;

    /// `pending -> reconciled` with all side effects, all-or-nothing
    async fn commit_reconcile(
        &self,
        command: ReconcileCommand,
    ) -> Result<BankTransaction, ReconciliationError>;

    /// `pending -> ignored` with the audit reason
    async fn commit_ignore(
        &self,
        transaction_id: TransactionId,
        reason: String,
    ) -> Result<BankTransaction, ReconciliationError>;

    /// `{reconciled, ignored} -> pending`: destroys allocations and
    /// reverts the settled ledger record to open
    async fn commit_reopen(
        &self,
        transaction_id: TransactionId,
    ) -> Result<BankTransaction, ReconciliationError>;
}

/// Cost-center display info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenterInfo {
    pub name: String,
}

/// Lookup of cost-center names for display and audit output
#[async_trait]
pub trait CostCenterDirectory: Send + Sync {
    async fn resolve(&self, id: CostCenterId) -> Result<CostCenterInfo, PersistenceError>;
}
