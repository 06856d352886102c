//! Ledger record aggregate

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CostCenterId, LedgerRecordId, Money, TransactionId};

use crate::cost_center::{CostCategory, Sector};
use crate::error::LedgerError;

/// Whether the obligation is money owed or money expected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Money the company owes (conta a pagar)
    Payable,
    /// Money the company expects to receive (conta a receber)
    Receivable,
}

/// Ledger record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Open,
    Paid,
    Overdue,
    Cancelled,
}

/// An internal payable or receivable
///
/// Created independently of reconciliation (procurement, payroll,
/// contracts) and settled by at most one bank transaction at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: LedgerRecordId,
    pub kind: LedgerKind,
    /// Short description of the obligation
    pub description: String,
    /// Name of the counterparty (fornecedor/cliente)
    pub favored_party: String,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub cost_center_id: CostCenterId,
    pub category: CostCategory,
    pub sector: Sector,
    pub status: LedgerStatus,
    /// The bank transaction that settled this record, if any
    pub settled_by: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Creates a new open record
    pub fn new(
        kind: LedgerKind,
        description: impl Into<String>,
        favored_party: impl Into<String>,
        amount: Money,
        due_date: NaiveDate,
        cost_center_id: CostCenterId,
        category: CostCategory,
        sector: Sector,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LedgerRecordId::new_v7(),
            kind,
            description: description.into(),
            favored_party: favored_party.into(),
            amount,
            due_date,
            cost_center_id,
            category,
            sector,
            status: LedgerStatus::Open,
            settled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the record can be offered as a match candidate
    pub fn is_settleable(&self) -> bool {
        matches!(self.status, LedgerStatus::Open | LedgerStatus::Overdue)
    }

    /// Marks the record paid by `transaction_id`.
    ///
    /// At most one non-reopened transaction settles a record; a second
    /// settlement attempt fails even if the caller raced past a stale read.
    pub fn mark_paid(&mut self, transaction_id: TransactionId) -> Result<(), LedgerError> {
        if let Some(settled_by) = self.settled_by {
            return Err(LedgerError::AlreadySettled {
                record: self.id,
                settled_by,
            });
        }
        if !self.is_settleable() {
            return Err(LedgerError::NotSettleable {
                record: self.id,
                status: format!("{:?}", self.status),
            });
        }
        self.status = LedgerStatus::Paid;
        self.settled_by = Some(transaction_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reverts a settlement, returning the record to `Open`.
    ///
    /// Called when the settling transaction is reopened.
    pub fn reopen(&mut self) -> Result<(), LedgerError> {
        if self.status != LedgerStatus::Paid || self.settled_by.is_none() {
            return Err(LedgerError::NotSettled(self.id));
        }
        self.status = LedgerStatus::Open;
        self.settled_by = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancels an unsettled record
    pub fn cancel(&mut self) -> Result<(), LedgerError> {
        if let Some(settled_by) = self.settled_by {
            return Err(LedgerError::AlreadySettled {
                record: self.id,
                settled_by,
            });
        }
        if self.status == LedgerStatus::Cancelled {
            return Err(LedgerError::Cancelled(self.id));
        }
        self.status = LedgerStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Flips an open record past its due date to `Overdue`
    pub fn refresh_overdue(&mut self, today: NaiveDate) {
        if self.status == LedgerStatus::Open && self.due_date < today {
            self.status = LedgerStatus::Overdue;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn record() -> LedgerRecord {
        LedgerRecord::new(
            LedgerKind::Payable,
            "Cimento e areia",
            "ACME LTDA",
            Money::new(dec!(1000.00), Currency::Brl),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            CostCenterId::new(),
            CostCategory::Material,
            Sector::Works,
        )
    }

    #[test]
    fn test_new_record_is_open_and_settleable() {
        let r = record();
        assert_eq!(r.status, LedgerStatus::Open);
        assert!(r.is_settleable());
        assert!(r.settled_by.is_none());
    }

    #[test]
    fn test_mark_paid_links_transaction() {
        let mut r = record();
        let tx = TransactionId::new();
        r.mark_paid(tx).unwrap();

        assert_eq!(r.status, LedgerStatus::Paid);
        assert_eq!(r.settled_by, Some(tx));
        assert!(!r.is_settleable());
    }

    #[test]
    fn test_double_settlement_is_rejected() {
        let mut r = record();
        let first = TransactionId::new();
        r.mark_paid(first).unwrap();

        let err = r.mark_paid(TransactionId::new()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::AlreadySettled {
                record: r.id,
                settled_by: first,
            }
        );
    }

    #[test]
    fn test_reopen_round_trip() {
        let mut r = record();
        let tx = TransactionId::new();
        r.mark_paid(tx).unwrap();
        r.reopen().unwrap();

        assert_eq!(r.status, LedgerStatus::Open);
        assert!(r.settled_by.is_none());

        // A different transaction can settle it again
        r.mark_paid(TransactionId::new()).unwrap();
        assert_eq!(r.status, LedgerStatus::Paid);
    }

    #[test]
    fn test_reopen_of_unsettled_record_fails() {
        let mut r = record();
        assert_eq!(r.reopen().unwrap_err(), LedgerError::NotSettled(r.id));
    }

    #[test]
    fn test_cancelled_record_is_not_settleable() {
        let mut r = record();
        r.cancel().unwrap();
        assert!(!r.is_settleable());
        assert!(r.mark_paid(TransactionId::new()).is_err());
        assert_eq!(r.cancel().unwrap_err(), LedgerError::Cancelled(r.id));
    }

    #[test]
    fn test_refresh_overdue() {
        let mut r = record();
        r.refresh_overdue(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(r.status, LedgerStatus::Overdue);
        assert!(r.is_settleable());
    }
}
