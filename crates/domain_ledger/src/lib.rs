//! Ledger domain - internal financial obligations
//!
//! A `LedgerRecord` is a payable or receivable created elsewhere in the
//! application (procurement, payroll, contracts). Reconciliation settles
//! records against bank transactions; this crate owns the record's own
//! lifecycle and the single-settlement rule.

pub mod cost_center;
pub mod error;
pub mod record;

pub use cost_center::{CostCategory, CostCenter, Sector};
pub use error::LedgerError;
pub use record::{LedgerKind, LedgerRecord, LedgerStatus};
