//! Ledger domain errors

use core_kernel::{LedgerRecordId, TransactionId};
use thiserror::Error;

/// Errors that can occur in the ledger domain
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The record is already settled by a bank transaction
    #[error("Ledger record {record} is already settled by transaction {settled_by}")]
    AlreadySettled {
        record: LedgerRecordId,
        settled_by: TransactionId,
    },

    /// The record is not in a state that permits settlement
    #[error("Ledger record {record} cannot be settled from status {status}")]
    NotSettleable { record: LedgerRecordId, status: String },

    /// Reopen was requested on a record that is not settled
    #[error("Ledger record {0} is not settled")]
    NotSettled(LedgerRecordId),

    /// The record is cancelled and immutable
    #[error("Ledger record {0} is cancelled")]
    Cancelled(LedgerRecordId),
}
