//! In-memory fakes for the reconciliation ports
//!
//! [`InMemoryStore`] mirrors the PostgreSQL store's contract: commits are
//! all-or-nothing (mutations happen on clones and are written back only
//! when every step succeeded) and run under one lock, so racing callers
//! serialize exactly like they would on row locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use core_kernel::{AccountId, CostCenterId, DateRange, LedgerRecordId, Money, TransactionId};
use domain_ledger::{LedgerKind, LedgerRecord};
use domain_reconciliation::{
    AccountBalance, AdapterError, Allocation, BankFeedAdapter, BankTransaction, CostCenterDirectory,
    CostCenterInfo, InvalidStateError, LedgerTarget, PersistenceError, RawTransaction,
    ReconcileCommand, ReconciliationError, ReconciliationStore, TransactionStatus, UpsertOutcome,
};

#[derive(Default)]
struct State {
    transactions: HashMap<TransactionId, BankTransaction>,
    by_external: HashMap<(AccountId, String), TransactionId>,
    ledger: HashMap<LedgerRecordId, LedgerRecord>,
}

/// In-memory reconciliation store
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a ledger record, as if created by procurement or payroll
    pub fn insert_ledger_record(&self, record: LedgerRecord) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.ledger.insert(record.id, record);
    }

    pub fn transaction_count(&self) -> usize {
        let state = self.state.lock().expect("store mutex poisoned");
        state.transactions.len()
    }

    /// Current stored state of a transaction, for assertions
    pub fn snapshot_transaction(&self, id: TransactionId) -> Option<BankTransaction> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.transactions.get(&id).cloned()
    }

    /// Current stored state of a ledger record, for assertions
    pub fn snapshot_record(&self, id: LedgerRecordId) -> Option<LedgerRecord> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.ledger.get(&id).cloned()
    }

    pub fn ledger_record_count(&self) -> usize {
        let state = self.state.lock().expect("store mutex poisoned");
        state.ledger.len()
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<BankTransaction, PersistenceError> {
        let state = self.state.lock().expect("store mutex poisoned");
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("bank transaction", id))
    }

    async fn find_by_external_id(
        &self,
        account_id: AccountId,
        external_id: &str,
    ) -> Result<Option<BankTransaction>, PersistenceError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .by_external
            .get(&(account_id, external_id.to_string()))
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn upsert_pending(
        &self,
        account_id: AccountId,
        raw: RawTransaction,
    ) -> Result<UpsertOutcome, PersistenceError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let key = (account_id, raw.external_id.clone());

        match state.by_external.get(&key).copied() {
            None => {
                let tx = BankTransaction::from_raw(account_id, raw)
                    .map_err(|e| PersistenceError::backend(e.to_string()))?;
                state.by_external.insert(key, tx.id);
                state.transactions.insert(tx.id, tx);
                Ok(UpsertOutcome::Created)
            }
            Some(id) => {
                let existing = state
                    .transactions
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| PersistenceError::backend("external-id index out of sync"))?;
                if existing.status != TransactionStatus::Pending {
                    return Ok(UpsertOutcome::Skipped);
                }
                let mut updated = existing;
                updated
                    .absorb_raw(raw)
                    .map_err(|e| PersistenceError::backend(e.to_string()))?;
                state.transactions.insert(id, updated);
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<BankTransaction>, PersistenceError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut transactions: Vec<BankTransaction> = state
            .transactions
            .values()
            .filter(|tx| tx.account_id == account_id && range.contains(tx.occurred_on()))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(transactions)
    }

    async fn get_ledger_record(
        &self,
        id: LedgerRecordId,
    ) -> Result<LedgerRecord, PersistenceError> {
        let state = self.state.lock().expect("store mutex poisoned");
        state
            .ledger
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("ledger record", id))
    }

    async fn find_settleable_records(
        &self,
        kind: LedgerKind,
    ) -> Result<Vec<LedgerRecord>, PersistenceError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut records: Vec<LedgerRecord> = state
            .ledger
            .values()
            .filter(|r| r.kind == kind && r.is_settleable())
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(records)
    }

    async fn commit_reconcile(
        &self,
        command: ReconcileCommand,
    ) -> Result<BankTransaction, ReconciliationError> {
        let mut state = self.state.lock().expect("store mutex poisoned");

        let mut tx = state
            .transactions
            .get(&command.transaction_id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("bank transaction", command.transaction_id))?;

        // Same predicate as the SQL compare-and-set: a pending transaction
        // whose amounts no longer match the read the allocations came from
        // rejects the commit
        if tx.status == TransactionStatus::Pending
            && (tx.credit != command.expected_credit || tx.debit != command.expected_debit)
        {
            let expected = if command.expected_credit.is_positive() {
                command.expected_credit
            } else {
                command.expected_debit
            };
            return Err(InvalidStateError::AmountChanged {
                transaction: tx.id,
                expected,
                actual: tx.amount(),
            }
            .into());
        }

        let mut record = match &command.target {
            LedgerTarget::Existing(record_id) => state
                .ledger
                .get(record_id)
                .cloned()
                .ok_or_else(|| PersistenceError::not_found("ledger record", *record_id))?,
            LedgerTarget::Create(record) => record.clone(),
        };

        // Mutate the clones; write back only once both transitions hold
        tx.apply_reconcile(record.id, command.allocations, command.classification)?;
        record.mark_paid(tx.id).map_err(InvalidStateError::from)?;

        state.ledger.insert(record.id, record);
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn commit_ignore(
        &self,
        transaction_id: TransactionId,
        reason: String,
    ) -> Result<BankTransaction, ReconciliationError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let mut tx = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("bank transaction", transaction_id))?;

        tx.apply_ignore(reason)?;
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn commit_reopen(
        &self,
        transaction_id: TransactionId,
    ) -> Result<BankTransaction, ReconciliationError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let mut tx = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("bank transaction", transaction_id))?;

        let unlinked = tx.apply_reopen()?;

        let reverted = match unlinked {
            Some(record_id) => {
                let mut record = state
                    .ledger
                    .get(&record_id)
                    .cloned()
                    .ok_or_else(|| PersistenceError::not_found("ledger record", record_id))?;
                record.reopen().map_err(InvalidStateError::from)?;
                Some(record)
            }
            None => None,
        };

        if let Some(record) = reverted {
            state.ledger.insert(record.id, record);
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }
}

/// Bank feed fake serving a fixed transaction list
///
/// Failures and delays can be scheduled per fetch call (0-based) to
/// exercise the sync orchestrator's partial-failure and timeout policy.
pub struct StaticBankFeed {
    transactions: Mutex<Vec<RawTransaction>>,
    failures: Mutex<HashMap<u32, AdapterError>>,
    delays: Mutex<HashMap<u32, Duration>>,
    balance: Mutex<AccountBalance>,
    calls: AtomicU32,
}

impl Default for StaticBankFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticBankFeed {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            balance: Mutex::new(AccountBalance {
                available: Money::zero(core_kernel::Currency::Brl),
                blocked: Money::zero(core_kernel::Currency::Brl),
            }),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_transactions(transactions: Vec<RawTransaction>) -> Self {
        let feed = Self::new();
        *feed.transactions.lock().expect("feed mutex poisoned") = transactions;
        feed
    }

    pub fn push_transaction(&self, raw: RawTransaction) {
        self.transactions
            .lock()
            .expect("feed mutex poisoned")
            .push(raw);
    }

    /// Replaces the transaction with the same external id, simulating a
    /// provider-side correction
    pub fn replace_transaction(&self, raw: RawTransaction) {
        let mut transactions = self.transactions.lock().expect("feed mutex poisoned");
        transactions.retain(|t| t.external_id != raw.external_id);
        transactions.push(raw);
    }

    /// Schedules `error` for the nth fetch call (0-based)
    pub fn fail_on_call(&self, call: u32, error: AdapterError) {
        self.failures
            .lock()
            .expect("feed mutex poisoned")
            .insert(call, error);
    }

    /// Makes the nth fetch call (0-based) sleep before responding
    pub fn delay_on_call(&self, call: u32, delay: Duration) {
        self.delays
            .lock()
            .expect("feed mutex poisoned")
            .insert(call, delay);
    }

    pub fn set_balance(&self, balance: AccountBalance) {
        *self.balance.lock().expect("feed mutex poisoned") = balance;
    }

    pub fn fetch_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BankFeedAdapter for StaticBankFeed {
    async fn fetch_transactions(
        &self,
        _account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<RawTransaction>, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().expect("feed mutex poisoned").remove(&call) {
            return Err(error);
        }
        let delay = self.delays.lock().expect("feed mutex poisoned").remove(&call);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let transactions = self.transactions.lock().expect("feed mutex poisoned");
        Ok(transactions
            .iter()
            .filter(|t| range.contains(t.occurred_at.date_naive()))
            .cloned()
            .collect())
    }

    async fn get_balance(&self, _account_id: AccountId) -> Result<AccountBalance, AdapterError> {
        Ok(*self.balance.lock().expect("feed mutex poisoned"))
    }
}

/// Cost-center directory fake backed by a map
#[derive(Default)]
pub struct StaticCostCenterDirectory {
    names: Mutex<HashMap<CostCenterId, String>>,
}

impl StaticCostCenterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>) -> CostCenterId {
        let id = CostCenterId::new_v7();
        self.names
            .lock()
            .expect("directory mutex poisoned")
            .insert(id, name.into());
        id
    }
}

#[async_trait]
impl CostCenterDirectory for StaticCostCenterDirectory {
    async fn resolve(&self, id: CostCenterId) -> Result<CostCenterInfo, PersistenceError> {
        let names = self.names.lock().expect("directory mutex poisoned");
        names
            .get(&id)
            .map(|name| CostCenterInfo { name: name.clone() })
            .ok_or_else(|| PersistenceError::not_found("cost center", id))
    }
}

/// Sum of allocation values, for assertions
pub fn allocation_total(allocations: &[Allocation]) -> i64 {
    allocations.iter().map(|a| a.value.to_minor()).sum()
}
