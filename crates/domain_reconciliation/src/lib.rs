//! Bank reconciliation domain
//!
//! Matches synced bank transactions against ledger records, splits their
//! value across cost centers, and drives the pending/reconciled/ignored
//! state machine. External collaborators (the bank feed and the database)
//! sit behind the ports in [`ports`].

pub mod allocation;
pub mod error;
pub mod matching;
pub mod ports;
pub mod service;
pub mod sync;
pub mod transaction;

pub use allocation::{Allocation, SplitRequest, SplitSet};
pub use error::{
    AdapterError, InvalidStateError, PersistenceError, ReconciliationError, ValidationError,
};
pub use matching::{MatchConfig, MatchSignals, MatchSuggestion, MatchWeights, MatchingEngine};
pub use ports::{
    AccountBalance, BankFeedAdapter, CostCenterDirectory, CostCenterInfo, LedgerTarget,
    ReconcileCommand, ReconciliationStore, UpsertOutcome,
};
pub use service::{PeriodSummary, ReconciliationService};
pub use sync::{SyncConfig, SyncError, SyncOrchestrator, SyncReport};
pub use transaction::{
    BankTransaction, Classification, RawTransaction, TransactionSign, TransactionStatus,
    TransitionKind,
};
