//! Reconciliation error taxonomy
//!
//! Four families, surfaced differently:
//! - [`ValidationError`]: malformed input, nothing mutated
//! - [`InvalidStateError`]: a transition the current state does not permit;
//!   never retried, the caller must re-read state
//! - [`AdapterError`]: bank feed failures; during sync these land in the
//!   `SyncReport` instead of being thrown
//! - [`PersistenceError`]: store failures; abort the whole transition

use rust_decimal::Decimal;
use thiserror::Error;

use core_kernel::{CostCenterId, LedgerRecordId, Money, TransactionId};
use domain_ledger::LedgerError;

use crate::transaction::{TransactionStatus, TransitionKind};

/// Malformed input to allocation or a transition request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Split set is empty")]
    EmptySplitSet,

    #[error("Split percentages must sum to 100, got {total}")]
    PercentageSumOutOfTolerance { total: Decimal },

    #[error("Cost center {0} appears more than once in the split set")]
    DuplicateCostCenter(CostCenterId),

    #[error("Percentage {percentage} for cost center {cost_center} is outside (0, 100]")]
    PercentageOutOfRange {
        cost_center: CostCenterId,
        percentage: Decimal,
    },

    #[error("Exactly one of credit/debit must be non-zero, got credit={credit}, debit={debit}")]
    InconsistentAmounts { credit: Money, debit: Money },

    #[error("Ignoring a transaction requires a reason")]
    MissingIgnoreReason,
}

/// A transition attempted from a state that does not permit it
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidStateError {
    #[error("Transaction {transaction} cannot {attempted:?} from status {from:?}")]
    Transition {
        transaction: TransactionId,
        from: TransactionStatus,
        attempted: TransitionKind,
    },

    #[error("Ledger record {record} is already settled by transaction {settled_by}")]
    AlreadySettled {
        record: LedgerRecordId,
        settled_by: TransactionId,
    },

    #[error("Ledger record {record} does not permit this operation: {reason}")]
    RecordNotSettleable {
        record: LedgerRecordId,
        reason: String,
    },

    #[error("Transaction {transaction} amount changed from {expected} to {actual} since it was read")]
    AmountChanged {
        transaction: TransactionId,
        expected: Money,
        actual: Money,
    },
}

impl From<LedgerError> for InvalidStateError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadySettled { record, settled_by } => {
                InvalidStateError::AlreadySettled { record, settled_by }
            }
            LedgerError::NotSettleable { record, status } => {
                InvalidStateError::RecordNotSettleable {
                    record,
                    reason: format!("status is {}", status),
                }
            }
            LedgerError::NotSettled(record) => InvalidStateError::RecordNotSettleable {
                record,
                reason: "record is not settled".to_string(),
            },
            LedgerError::Cancelled(record) => InvalidStateError::RecordNotSettleable {
                record,
                reason: "record is cancelled".to_string(),
            },
        }
    }
}

/// Failure communicating with the bank feed provider
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("Provider returned malformed data: {message}")]
    Provider { message: String },
}

impl AdapterError {
    pub fn connection(message: impl Into<String>) -> Self {
        AdapterError::Connection {
            message: message.into(),
        }
    }

    /// Returns true if a later retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Connection { .. }
                | AdapterError::RateLimited { .. }
                | AdapterError::Timeout { .. }
        )
    }
}

/// Failure reading from or writing to the record store
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Store error: {message}")]
    Backend { message: String },
}

impl PersistenceError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        PersistenceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        PersistenceError::Backend {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::NotFound { .. })
    }
}

/// Unified error for the reconciliation core's public operations
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ReconciliationError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ReconciliationError::Validation(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ReconciliationError::InvalidState(_))
    }
}
